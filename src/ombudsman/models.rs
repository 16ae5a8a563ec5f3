use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::lifecycle::Status;
use crate::errors::{OmbudsmanError, Result};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

// ── Enumerations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestationKind {
    Reclamacao,
    Sugestao,
    Solicitacao,
    Denuncia,
    Elogio,
}

impl ManifestationKind {
    pub const ALL: [ManifestationKind; 5] = [
        Self::Reclamacao,
        Self::Sugestao,
        Self::Solicitacao,
        Self::Denuncia,
        Self::Elogio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reclamacao => "RECLAMACAO",
            Self::Sugestao => "SUGESTAO",
            Self::Solicitacao => "SOLICITACAO",
            Self::Denuncia => "DENUNCIA",
            Self::Elogio => "ELOGIO",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reclamacao => "Reclamação",
            Self::Sugestao => "Sugestão",
            Self::Solicitacao => "Solicitação",
            Self::Denuncia => "Denúncia",
            Self::Elogio => "Elogio",
        }
    }

    pub fn catalog() -> Vec<KindDescriptor> {
        Self::ALL
            .iter()
            .map(|k| KindDescriptor {
                value: *k,
                label: k.label(),
            })
            .collect()
    }
}

impl FromStr for ManifestationKind {
    type Err = OmbudsmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RECLAMACAO" => Ok(Self::Reclamacao),
            "SUGESTAO" => Ok(Self::Sugestao),
            "SOLICITACAO" => Ok(Self::Solicitacao),
            "DENUNCIA" => Ok(Self::Denuncia),
            "ELOGIO" => Ok(Self::Elogio),
            _ => Err(OmbudsmanError::validation(format!(
                "Invalid manifestation type: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KindDescriptor {
    pub value: ManifestationKind,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentKind {
    Imagem,
    Video,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imagem => "IMAGEM",
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = OmbudsmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "IMAGEM" => Ok(Self::Imagem),
            "VIDEO" => Ok(Self::Video),
            "AUDIO" => Ok(Self::Audio),
            _ => Err(OmbudsmanError::validation(format!(
                "Invalid attachment type: {}",
                s
            ))),
        }
    }
}

// ── Entities ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub url: String,
    pub tipo: AttachmentKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffResponse {
    pub id: String,
    pub texto: String,
    pub gestor_nome: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored manifestation. Anonymous rows never carry contact data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifestation {
    pub id: String,
    pub protocolo: String,
    pub tipo: ManifestationKind,
    pub status: Status,
    pub orgao: String,
    pub assunto: String,
    pub relato: String,
    pub anonimo: bool,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub data_fato: Option<NaiveDate>,
    pub horario_fato: Option<String>,
    pub local: Option<String>,
    pub pessoas_envolvidas: Option<String>,
    pub audio_url: Option<String>,
    pub anexos: Vec<Attachment>,
    pub respostas: Vec<StaffResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Drafts ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDraft {
    pub url: String,
    pub tipo: AttachmentKind,
}

/// Submission payload as received from the presentation layer.
///
/// Every field is optional at the type level so that missing data turns into
/// a `Validation` error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestationDraft {
    pub tipo: Option<ManifestationKind>,
    pub orgao: String,
    pub assunto: String,
    pub relato: String,
    pub anonimo: bool,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub data_fato: Option<NaiveDate>,
    pub horario_fato: Option<String>,
    pub local: Option<String>,
    pub pessoas_envolvidas: Option<String>,
    pub audio_url: Option<String>,
    pub anexos: Vec<AttachmentDraft>,
}

impl ManifestationDraft {
    pub fn anonymous(tipo: ManifestationKind, orgao: &str, assunto: &str) -> Self {
        Self {
            tipo: Some(tipo),
            orgao: orgao.to_string(),
            assunto: assunto.to_string(),
            anonimo: true,
            ..Default::default()
        }
    }

    pub fn identified(tipo: ManifestationKind, orgao: &str, assunto: &str, nome: &str) -> Self {
        Self {
            tipo: Some(tipo),
            orgao: orgao.to_string(),
            assunto: assunto.to_string(),
            anonimo: false,
            nome: Some(nome.to_string()),
            ..Default::default()
        }
    }

    pub fn with_relato(mut self, relato: &str) -> Self {
        self.relato = relato.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_attachment(mut self, url: &str, tipo: AttachmentKind) -> Self {
        self.anexos.push(AttachmentDraft {
            url: url.to_string(),
            tipo,
        });
        self
    }

    /// Check required fields and normalize the draft for insertion.
    ///
    /// Anonymous drafts lose any contact data they carried.
    pub(crate) fn validate(self) -> Result<NewManifestation> {
        let tipo = self
            .tipo
            .ok_or_else(|| OmbudsmanError::validation("tipo is required"))?;
        let orgao = required(&self.orgao, "orgao")?;
        let assunto = required(&self.assunto, "assunto")?;

        let (nome, email, telefone) = if self.anonimo {
            (None, None, None)
        } else {
            let nome = optional(self.nome);
            let email = optional(self.email);
            let telefone = optional(self.telefone);
            if nome.is_none() && email.is_none() && telefone.is_none() {
                return Err(OmbudsmanError::validation(
                    "identified manifestations need at least one of nome, email or telefone",
                ));
            }
            if let Some(ref address) = email {
                if !EMAIL_PATTERN.is_match(address) {
                    return Err(OmbudsmanError::validation(format!(
                        "email is not a valid address: {}",
                        address
                    )));
                }
            }
            (nome, email, telefone)
        };

        let horario_fato = optional(self.horario_fato);
        if let Some(ref horario) = horario_fato {
            let parsed = NaiveTime::parse_from_str(horario, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(horario, "%H:%M:%S"));
            if parsed.is_err() {
                return Err(OmbudsmanError::validation(format!(
                    "horarioFato must be HH:MM or HH:MM:SS, got {}",
                    horario
                )));
            }
        }

        let mut anexos = Vec::with_capacity(self.anexos.len());
        for (index, anexo) in self.anexos.into_iter().enumerate() {
            let url = anexo.url.trim();
            if url.is_empty() {
                return Err(OmbudsmanError::validation(format!(
                    "anexos[{}].url must not be empty",
                    index
                )));
            }
            anexos.push(AttachmentDraft {
                url: url.to_string(),
                tipo: anexo.tipo,
            });
        }

        Ok(NewManifestation {
            tipo,
            orgao,
            assunto,
            relato: self.relato.trim().to_string(),
            anonimo: self.anonimo,
            nome,
            email,
            telefone,
            data_fato: self.data_fato,
            horario_fato,
            local: optional(self.local),
            pessoas_envolvidas: optional(self.pessoas_envolvidas),
            audio_url: optional(self.audio_url),
            anexos,
        })
    }
}

fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(OmbudsmanError::validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A validated draft, ready to be persisted.
#[derive(Debug, Clone)]
pub(crate) struct NewManifestation {
    pub tipo: ManifestationKind,
    pub orgao: String,
    pub assunto: String,
    pub relato: String,
    pub anonimo: bool,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub data_fato: Option<NaiveDate>,
    pub horario_fato: Option<String>,
    pub local: Option<String>,
    pub pessoas_envolvidas: Option<String>,
    pub audio_url: Option<String>,
    pub anexos: Vec<AttachmentDraft>,
}

// ── Query types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManifestationFilter {
    pub status: Option<Status>,
    pub tipo: Option<ManifestationKind>,
    pub orgao: Option<String>,
}

/// Keyset pagination request. `cursor` is the `nextCursor` of the previous page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub total: i64,
}

// ── API view types ────────────────────────────────────────────────────

/// Who is reading. Anonymity redaction applies to both audiences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Public,
    Staff,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOption {
    pub value: Status,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestationView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub protocolo: String,
    pub tipo: ManifestationKind,
    pub tipo_label: &'static str,
    pub status: Status,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximos_status: Option<Vec<StatusOption>>,
    pub orgao: String,
    pub assunto: String,
    pub relato: String,
    pub anonimo: bool,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub data_fato: Option<NaiveDate>,
    pub horario_fato: Option<String>,
    pub local: Option<String>,
    pub pessoas_envolvidas: Option<String>,
    pub audio_url: Option<String>,
    pub anexos: Vec<Attachment>,
    pub respostas: Vec<StaffResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManifestationView {
    pub fn render(m: Manifestation, audience: Audience) -> Self {
        let (nome, email, telefone) = if m.anonimo {
            (None, None, None)
        } else {
            (m.nome, m.email, m.telefone)
        };
        let (id, proximos_status) = match audience {
            Audience::Public => (None, None),
            Audience::Staff => (
                Some(m.id),
                Some(
                    m.status
                        .valid_transitions()
                        .iter()
                        .map(|s| StatusOption {
                            value: *s,
                            label: s.label(),
                        })
                        .collect(),
                ),
            ),
        };

        Self {
            id,
            protocolo: m.protocolo,
            tipo: m.tipo,
            tipo_label: m.tipo.label(),
            status: m.status,
            status_label: m.status.label(),
            proximos_status,
            orgao: m.orgao,
            assunto: m.assunto,
            relato: m.relato,
            anonimo: m.anonimo,
            nome,
            email,
            telefone,
            data_fato: m.data_fato,
            horario_fato: m.horario_fato,
            local: m.local,
            pessoas_envolvidas: m.pessoas_envolvidas,
            audio_url: m.audio_url,
            anexos: m.anexos,
            respostas: m.respostas,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestationSummary {
    pub id: String,
    pub protocolo: String,
    pub tipo: ManifestationKind,
    pub tipo_label: &'static str,
    pub status: Status,
    pub status_label: &'static str,
    pub orgao: String,
    pub assunto: String,
    pub anonimo: bool,
    pub respostas_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub id: String,
    pub protocolo: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(anonimo: bool) -> Manifestation {
        Manifestation {
            id: "m-1".into(),
            protocolo: "2025-000001".into(),
            tipo: ManifestationKind::Denuncia,
            status: Status::Recebida,
            orgao: "Secretaria X".into(),
            assunto: "Buraco na via".into(),
            relato: String::new(),
            anonimo,
            nome: Some("Maria".into()),
            email: Some("maria@example.org".into()),
            telefone: None,
            data_fato: None,
            horario_fato: None,
            local: None,
            pessoas_envolvidas: None,
            audio_url: None,
            anexos: vec![],
            respostas: vec![],
            created_at: "2025-01-01T00:00:00Z".parse().unwrap(),
            updated_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn anonymous_draft_drops_contact_fields() {
        let mut draft = ManifestationDraft::anonymous(ManifestationKind::Denuncia, "Secretaria X", "Buraco");
        draft.nome = Some("Maria".into());
        draft.email = Some("maria@example.org".into());
        let valid = draft.validate().unwrap();
        assert!(valid.nome.is_none());
        assert!(valid.email.is_none());
        assert!(valid.telefone.is_none());
    }

    #[test]
    fn required_fields_are_checked_after_trimming() {
        let missing_tipo = ManifestationDraft {
            orgao: "Secretaria".into(),
            assunto: "Assunto".into(),
            anonimo: true,
            ..Default::default()
        };
        assert!(matches!(missing_tipo.validate(), Err(OmbudsmanError::Validation(_))));

        let blank_orgao = ManifestationDraft::anonymous(ManifestationKind::Elogio, "   ", "Assunto");
        let err = blank_orgao.validate().unwrap_err();
        assert!(err.to_string().contains("orgao"));

        let blank_assunto = ManifestationDraft::anonymous(ManifestationKind::Elogio, "Orgao", "");
        let err = blank_assunto.validate().unwrap_err();
        assert!(err.to_string().contains("assunto"));
    }

    #[test]
    fn identified_draft_needs_some_contact() {
        let mut draft = ManifestationDraft::identified(ManifestationKind::Sugestao, "Orgao", "Assunto", " ");
        assert!(draft.clone().validate().is_err());

        draft.telefone = Some("61 99999-0000".into());
        let valid = draft.validate().unwrap();
        assert_eq!(valid.telefone.as_deref(), Some("61 99999-0000"));
        assert!(valid.nome.is_none());
    }

    #[test]
    fn email_and_time_shapes_are_validated() {
        let bad_email = ManifestationDraft::identified(ManifestationKind::Sugestao, "O", "A", "Ana")
            .with_email("not-an-email");
        assert!(bad_email.validate().is_err());

        let mut bad_time = ManifestationDraft::anonymous(ManifestationKind::Sugestao, "O", "A");
        bad_time.horario_fato = Some("25h".into());
        assert!(bad_time.validate().is_err());

        let mut good_time = ManifestationDraft::anonymous(ManifestationKind::Sugestao, "O", "A");
        good_time.horario_fato = Some("14:30".into());
        assert_eq!(good_time.validate().unwrap().horario_fato.as_deref(), Some("14:30"));
    }

    #[test]
    fn blank_attachment_url_is_rejected() {
        let draft = ManifestationDraft::anonymous(ManifestationKind::Reclamacao, "O", "A")
            .with_attachment("https://cdn.example/a.png", AttachmentKind::Imagem)
            .with_attachment("  ", AttachmentKind::Video);
        let err = draft.validate().unwrap_err();
        assert!(err.to_string().contains("anexos[1]"));
    }

    #[test]
    fn draft_deserializes_from_camel_case_json() {
        let json = serde_json::json!({
            "tipo": "DENUNCIA",
            "orgao": "Secretaria X",
            "assunto": "Buraco na via",
            "anonimo": true,
            "dataFato": "2025-02-14",
            "horarioFato": "08:15",
            "pessoasEnvolvidas": "Equipe de obras",
            "anexos": [{"url": "s3://bucket/1.jpg", "tipo": "IMAGEM"}]
        });
        let draft: ManifestationDraft = serde_json::from_value(json).unwrap();
        assert_eq!(draft.tipo, Some(ManifestationKind::Denuncia));
        assert_eq!(draft.data_fato, NaiveDate::from_ymd_opt(2025, 2, 14));
        assert_eq!(draft.anexos[0].tipo, AttachmentKind::Imagem);
    }

    #[test]
    fn views_redact_anonymous_contact_for_every_audience() {
        for audience in [Audience::Public, Audience::Staff] {
            let view = ManifestationView::render(stored(true), audience);
            assert!(view.nome.is_none());
            assert!(view.email.is_none());
            assert!(view.telefone.is_none());
        }
        let staff = ManifestationView::render(stored(false), Audience::Staff);
        assert_eq!(staff.nome.as_deref(), Some("Maria"));
    }

    #[test]
    fn public_view_hides_internal_id_and_next_statuses() {
        let public = ManifestationView::render(stored(false), Audience::Public);
        assert!(public.id.is_none());
        assert!(public.proximos_status.is_none());
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["statusLabel"], "Recebida");
        assert_eq!(json["tipoLabel"], "Denúncia");

        let staff = ManifestationView::render(stored(false), Audience::Staff);
        let next: Vec<Status> = staff
            .proximos_status
            .unwrap()
            .into_iter()
            .map(|o| o.value)
            .collect();
        assert_eq!(next, vec![Status::EmAnalise, Status::Arquivada]);
    }

    #[test]
    fn kind_codes_and_labels() {
        for kind in ManifestationKind::ALL {
            assert_eq!(ManifestationKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(ManifestationKind::catalog().len(), 5);
        assert!(ManifestationKind::from_str("PEDIDO").is_err());
        assert_eq!(AttachmentKind::from_str("AUDIO").unwrap(), AttachmentKind::Audio);
    }
}
