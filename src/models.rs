use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An issue identifier as it appears on the wire.
///
/// The store key is an `i64` rowid, but callers treat identifiers as opaque
/// strings. Requests may carry the id as a JSON string or number; responses
/// always echo the string form the caller sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueId(pub String);

impl IssueId {
    /// Parse into the store's native key. `None` means the identifier is
    /// syntactically invalid (never "not found" — that is the store's call).
    pub fn as_key(&self) -> Option<i64> {
        self.0.trim().parse::<i64>().ok().filter(|id| *id > 0)
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for IssueId {
    fn from(id: i64) -> Self {
        IssueId(id.to_string())
    }
}

impl Serialize for IssueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IssueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(i64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Num(n) => IssueId(n.to_string()),
            Raw::Str(s) => IssueId(s),
        })
    }
}

fn id_to_string<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}

fn id_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let id = IssueId::deserialize(deserializer)?;
    id.as_key()
        .ok_or_else(|| serde::de::Error::custom(format!("invalid issue id '{}'", id)))
}

/// Accepts a JSON bool or the literal strings "true"/"false". Form-trained
/// clients send the string form.
fn opt_boolish<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Str(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Bool(b)) => Ok(Some(b)),
        Some(Raw::Str(s)) => match s.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected \"true\" or \"false\", got \"{}\"",
                other
            ))),
        },
    }
}

/// A stored issue, exactly as it is returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    #[serde(
        rename = "_id",
        serialize_with = "id_to_string",
        deserialize_with = "id_from_wire"
    )]
    pub id: i64,
    pub project: String,
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
    pub open: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// Create payload. Absent fields deserialize to empty strings so that
/// required-field validation is a plain emptiness check.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewIssue {
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
}

impl NewIssue {
    pub fn missing_required(&self) -> bool {
        self.issue_title.is_empty() || self.issue_text.is_empty() || self.created_by.is_empty()
    }
}

/// The mutable subset of an issue. Every field is optional; only supplied
/// fields are written, everything else is left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueChanges {
    pub issue_title: Option<String>,
    pub issue_text: Option<String>,
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
    pub status_text: Option<String>,
    #[serde(deserialize_with = "opt_boolish")]
    pub open: Option<bool>,
}

impl IssueChanges {
    pub fn is_empty(&self) -> bool {
        self.issue_title.is_none()
            && self.issue_text.is_none()
            && self.created_by.is_none()
            && self.assigned_to.is_none()
            && self.status_text.is_none()
            && self.open.is_none()
    }
}

/// Update payload: an identifier plus the fields to overwrite.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "_id")]
    pub id: Option<IssueId>,
    #[serde(flatten)]
    pub changes: IssueChanges,
}

/// Delete payload. Anything beyond `_id` is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "_id", default)]
    pub id: Option<IssueId>,
}

/// A list query after coercion through the filter allow-list.
///
/// Client filter parameters are never forwarded to the store verbatim; each
/// known field gets a typed parser and everything else marks the query
/// unsatisfiable, the same observable outcome as probing a field no stored
/// record has.
#[derive(Debug, Default, PartialEq)]
pub struct IssueFilter {
    pub id: Option<i64>,
    pub open: Option<bool>,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
    /// Column-name/value pairs compared by exact string equality. Column
    /// names come from `STRING_FILTER_FIELDS`, never from the caller.
    pub text_eq: Vec<(&'static str, String)>,
    /// Set when any filter value cannot be coerced (bad id, bad bool, bad
    /// datetime, unknown field). The query matches nothing but is not an
    /// error.
    pub unsatisfiable: bool,
}

const STRING_FILTER_FIELDS: [&str; 6] = [
    "project",
    "issue_title",
    "issue_text",
    "created_by",
    "assigned_to",
    "status_text",
];

impl IssueFilter {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let mut filter = IssueFilter::default();

        for (key, value) in params {
            match key.as_str() {
                "_id" => match IssueId(value.clone()).as_key() {
                    Some(id) => filter.id = Some(id),
                    None => filter.unsatisfiable = true,
                },
                "open" => match value.as_str() {
                    "true" => filter.open = Some(true),
                    "false" => filter.open = Some(false),
                    _ => filter.unsatisfiable = true,
                },
                "created_on" => match parse_rfc3339(value) {
                    Some(dt) => filter.created_on = Some(dt),
                    None => filter.unsatisfiable = true,
                },
                "updated_on" => match parse_rfc3339(value) {
                    Some(dt) => filter.updated_on = Some(dt),
                    None => filter.unsatisfiable = true,
                },
                other => match STRING_FILTER_FIELDS.iter().copied().find(|f| *f == other) {
                    Some(column) => filter.text_eq.push((column, value.clone())),
                    None => filter.unsatisfiable = true,
                },
            }
        }

        filter
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
