//! Inbound source records
//!
//! The normalized shapes the two ingestion adapters hand to the core, one
//! batch per sync run.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Which external source a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Government,
    Parliamentary,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Government => "government",
            SourceKind::Parliamentary => "parliamentary",
        }
    }

    /// The source on the other side of the link
    pub fn other(self) -> Self {
        match self {
            SourceKind::Government => SourceKind::Parliamentary,
            SourceKind::Parliamentary => SourceKind::Government,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for one adapter run
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: DeserializeOwned"))]
pub struct SyncBatch<T> {
    /// Adapter-assigned run identifier, generated when absent
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// Set when the adapter failed before producing (all of) its data
    #[serde(default)]
    pub source_error: Option<String>,
    #[serde(default = "Vec::new")]
    pub records: Vec<Lenient<T>>,
}

/// An inbound item that either parsed or is kept aside with its parse error,
/// so one malformed record or stage never fails the whole batch
#[derive(Debug, Clone, PartialEq)]
pub enum Lenient<T> {
    Parsed(T),
    Invalid(InvalidItem),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidItem {
    pub raw: serde_json::Value,
    pub reason: String,
}

impl InvalidItem {
    /// A scalar field of the raw item rendered as text
    pub fn field(&self, name: &str) -> Option<String> {
        match self.raw.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl<T> Lenient<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lenient<U> {
        match self {
            Lenient::Parsed(value) => Lenient::Parsed(f(value)),
            Lenient::Invalid(item) => Lenient::Invalid(item),
        }
    }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Lenient::Parsed(value)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value::<T>(raw.clone()) {
            Ok(parsed) => Lenient::Parsed(parsed),
            Err(e) => Lenient::Invalid(InvalidItem {
                raw,
                reason: e.to_string(),
            }),
        })
    }
}

impl<T: Serialize> Serialize for Lenient<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Lenient::Parsed(value) => value.serialize(serializer),
            Lenient::Invalid(item) => item.raw.serialize(serializer),
        }
    }
}

// =============================================================================
// GOVERNMENT SOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GovernmentRecord {
    #[validate(length(min = 1, message = "sourceId is required"))]
    pub source_id: String,
    /// Raw reference from which the registry number is extracted
    #[serde(default)]
    pub registry_ref: Option<String>,
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub creation_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub withdrawn: bool,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub stages: Vec<Lenient<GovernmentStageInput>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GovernmentStageInput {
    #[validate(range(min = 1, max = 14, message = "government stage seq must be within 1..=14"))]
    pub seq: u8,
    #[validate(length(min = 1, message = "stage name is required"))]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub last_modified: Option<NaiveDate>,
    #[serde(default)]
    pub catalog_id: Option<String>,
}

// =============================================================================
// PARLIAMENTARY SOURCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParliamentaryRecord {
    #[validate(length(min = 1, message = "sourceId is required"))]
    pub source_id: String,
    #[serde(default)]
    pub registry_ref: Option<String>,
    #[serde(default)]
    pub print_number: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub term: Option<u32>,
    #[serde(default)]
    pub withdrawn: bool,
    #[serde(default)]
    pub stages: Vec<Lenient<ParliamentaryStageInput>>,
    #[serde(default)]
    pub senate_position: Option<SenatePositionInput>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub presidential_signature_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub presidential_veto_date: Option<NaiveDate>,
    #[serde(default)]
    pub publication_ref: Option<String>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub publication_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ParliamentaryStageInput {
    #[validate(range(min = 1, message = "parliamentary stage seq starts at 1"))]
    pub seq: u32,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[validate(length(min = 1, message = "stage name is required"))]
    pub name: String,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub print_number: Option<String>,
    #[serde(default)]
    pub voting_yes: Option<u32>,
    #[serde(default)]
    pub voting_no: Option<u32>,
    #[serde(default)]
    pub voting_abstain: Option<u32>,
    #[serde(default)]
    pub voting_total: Option<u32>,
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub voting_date: Option<NaiveDate>,
    #[serde(default)]
    pub sitting: Option<u32>,
    #[serde(default)]
    pub voting_number: Option<u32>,
    #[serde(default)]
    pub voting_by_party: Option<Vec<PartyVoteInput>>,
    #[serde(default)]
    pub committee_code: Option<String>,
    #[serde(default)]
    pub rapporteur: Option<String>,
}

impl ParliamentaryStageInput {
    pub fn has_tally(&self) -> bool {
        self.voting_yes.is_some() || self.voting_no.is_some() || self.voting_abstain.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyVoteInput {
    pub party: String,
    #[serde(default)]
    pub yes: u32,
    #[serde(default)]
    pub no: u32,
    #[serde(default)]
    pub abstain: u32,
    #[serde(default)]
    pub absent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenatePositionInput {
    #[serde(default, deserialize_with = "flexible_date::deserialize")]
    pub date: Option<NaiveDate>,
    pub position: String,
    #[serde(default)]
    pub print_number: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
}

/// A record from either source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "record", rename_all = "snake_case")]
pub enum SourceRecord {
    Government(GovernmentRecord),
    Parliamentary(ParliamentaryRecord),
}

impl SourceRecord {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRecord::Government(_) => SourceKind::Government,
            SourceRecord::Parliamentary(_) => SourceKind::Parliamentary,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            SourceRecord::Government(r) => &r.source_id,
            SourceRecord::Parliamentary(r) => &r.source_id,
        }
    }

    pub fn registry_ref(&self) -> Option<&str> {
        match self {
            SourceRecord::Government(r) => r.registry_ref.as_deref(),
            SourceRecord::Parliamentary(r) => r.registry_ref.as_deref(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            SourceRecord::Government(r) => Some(r.title.as_str()),
            SourceRecord::Parliamentary(r) => r.title.as_deref(),
        }
    }

    pub fn initiator(&self) -> Option<&str> {
        match self {
            SourceRecord::Government(r) => r.initiator.as_deref(),
            SourceRecord::Parliamentary(r) => r.initiator.as_deref(),
        }
    }

    /// Record-level structural validation (stages are validated one by one later)
    pub fn validate_envelope(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();
        let mut check = |field: &'static str, ok: bool, message: &'static str| {
            if !ok {
                let mut err = validator::ValidationError::new("required");
                err.message = Some(message.into());
                errors.add(field, err);
            }
        };
        match self {
            SourceRecord::Government(r) => {
                check("sourceId", !r.source_id.trim().is_empty(), "sourceId is required");
                check("title", !r.title.trim().is_empty(), "title is required");
            }
            SourceRecord::Parliamentary(r) => {
                check("sourceId", !r.source_id.trim().is_empty(), "sourceId is required");
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Accepts `YYYY-MM-DD`, `DD-MM-YYYY` and RFC 3339 timestamps
pub mod flexible_date {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(raw, "%d-%m-%Y"))
            .or_else(|_| NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
            .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognized date '{}'", s))),
        }
    }
}
