//! Protocol number issuance.
//!
//! A protocol is `<year>-<sequence>`: the four-digit civil year of the
//! submission and a per-year counter zero-padded to six digits. The counter
//! lives in the `protocol_sequences` table and is bumped with a single
//! upsert inside the caller's write transaction, so it survives restarts and
//! is shared by every process that opens the same database.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};
use regex::Regex;
use rusqlite::{Connection, params};

use crate::errors::{OmbudsmanError, Result};

static PROTOCOLO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{6,}$").unwrap());

/// Width of the zero-padded sequence part.
const SEQUENCE_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct ProtocolGenerator {
    offset: FixedOffset,
}

impl Default for ProtocolGenerator {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

impl ProtocolGenerator {
    /// Build a generator whose year boundary follows a civil UTC offset.
    pub fn with_utc_offset_hours(hours: i32) -> Result<Self> {
        if !(-12..=14).contains(&hours) {
            return Err(OmbudsmanError::validation(format!(
                "UTC offset must be between -12 and 14 hours, got {}",
                hours
            )));
        }
        let offset = FixedOffset::east_opt(hours * 3600).ok_or_else(|| {
            OmbudsmanError::validation(format!("Invalid UTC offset: {} hours", hours))
        })?;
        Ok(Self { offset })
    }

    pub fn year_of(&self, now: DateTime<Utc>) -> i32 {
        now.with_timezone(&self.offset).year()
    }

    /// Allocate the next protocol for the year of `now`.
    ///
    /// Must run inside a write transaction. Lock contention surfaces as
    /// `OmbudsmanError::Conflict`; the caller retries the whole creation and
    /// never reuses a value from a failed attempt.
    pub fn issue(&self, conn: &Connection, now: DateTime<Utc>) -> Result<String> {
        let year = self.year_of(now);
        let sequence: i64 = conn.query_row(
            "INSERT INTO protocol_sequences (year, last_value) VALUES (?1, 1)
             ON CONFLICT(year) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
            params![year],
            |row| row.get(0),
        )?;
        Ok(format_protocolo(year, sequence))
    }
}

pub fn format_protocolo(year: i32, sequence: i64) -> String {
    format!("{:04}-{:0width$}", year, sequence, width = SEQUENCE_WIDTH)
}

/// Shape check only; says nothing about whether the protocol exists.
pub fn is_well_formed(protocolo: &str) -> bool {
    PROTOCOLO_PATTERN.is_match(protocolo)
}
