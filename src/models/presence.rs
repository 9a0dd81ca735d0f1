use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;
use utoipa::ToSchema;

/// Identifier of a record inside a section. Clients send either numbers or strings.
///
/// Numbers are kept as sent, so `7` and `7.0` are distinct records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RecordId {
    Number(Number),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Number(value.into())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

/// Public identity of an editor, as shown to other room members.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditorUser {
    pub id: String,
    pub display_name: String,
}

/// Advisory record that `user` is editing `(section, record_id)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditingClaim {
    pub section: String,
    #[schema(value_type = Option<String>)]
    pub record_id: Option<RecordId>,
    pub user: EditorUser,
    /// Unix epoch milliseconds
    pub started_at: i64,
}

impl EditingClaim {
    /// `None` matches any record in the section.
    pub fn matches(&self, section: &str, record_id: Option<&RecordId>) -> bool {
        self.section == section
            && match record_id {
                Some(id) => self.record_id.as_ref() == Some(id),
                None => true,
            }
    }
}

/// Payload of `editing:start` / `editing:end`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditingTarget {
    pub page: String,
    pub section: String,
    #[serde(default)]
    pub record_id: Option<RecordId>,
}

/// Payload of `editing:started` / `editing:ended`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditingDelta {
    pub page: String,
    pub section: String,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    pub user: EditorUser,
}

/// Payload of `editors:list`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditorsSnapshot {
    pub page: String,
    pub editors: Vec<EditingClaim>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claim(section: &str, record_id: Option<RecordId>) -> EditingClaim {
        EditingClaim {
            section: section.into(),
            record_id,
            user: EditorUser { id: "7".into(), display_name: "Kim".into() },
            started_at: 0,
        }
    }

    #[test]
    fn record_ids_accept_numbers_and_strings() {
        let n: RecordId = serde_json::from_value(json!(42)).unwrap();
        let s: RecordId = serde_json::from_value(json!("row-9")).unwrap();
        assert_eq!(n, RecordId::Number(42.into()));
        assert_eq!(s, RecordId::Text("row-9".into()));
        assert_eq!(n.to_string(), "42");
    }

    #[test]
    fn fractional_and_large_record_ids_survive() {
        let target: EditingTarget = serde_json::from_value(
            json!({"page": "sites", "section": "row", "recordId": 12.5}),
        )
        .unwrap();
        assert_eq!(serde_json::to_value(&target.record_id).unwrap(), json!(12.5));

        let big: RecordId = serde_json::from_value(json!(18_446_744_073_709_551_615_u64)).unwrap();
        assert_eq!(big.to_string(), "18446744073709551615");
        assert_ne!(big, RecordId::Number(i64::MAX.into()));
    }

    #[test]
    fn missing_record_id_deserializes_as_none() {
        let target: EditingTarget =
            serde_json::from_value(json!({"page": "sites", "section": "notes"})).unwrap();
        assert_eq!(target.record_id, None);
    }

    #[test]
    fn claim_matching_without_record_covers_whole_section() {
        let c = claim("row", Some(RecordId::Number(42.into())));
        assert!(c.matches("row", None));
        assert!(c.matches("row", Some(&RecordId::Number(42.into()))));
        assert!(!c.matches("row", Some(&RecordId::Number(43.into()))));
        assert!(!c.matches("header", None));
    }

    #[test]
    fn claim_serializes_camel_case() {
        let value = serde_json::to_value(claim("row", Some(RecordId::Number(42.into())))).unwrap();
        assert_eq!(value["recordId"], json!(42));
        assert_eq!(value["user"]["displayName"], json!("Kim"));
        assert!(value.get("startedAt").is_some());
    }
}
