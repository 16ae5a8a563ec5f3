pub mod config;
pub mod errors;
pub mod ombudsman;
pub mod telemetry;
