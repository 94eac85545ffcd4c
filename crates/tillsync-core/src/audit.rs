use serde::{Deserialize, Serialize};

use crate::ids::TransactionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// One mutating sync operation, as handed to the audit recorder.
///
/// `table_name` is qualified with the store it touched (`chain.accounts`,
/// `local.accounts`). `field_name` is `None` for whole-row inserts, whose
/// `new_value` is a JSON snapshot of the inserted row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub transaction_id: TransactionId,
    pub table_name: String,
    pub entity_id: i64,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub action: AuditAction,
    pub actor: String,
}

impl AuditEntry {
    pub fn insert(
        transaction_id: &TransactionId,
        table_name: &str,
        entity_id: i64,
        snapshot: &serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            transaction_id: transaction_id.clone(),
            table_name: table_name.to_string(),
            entity_id,
            field_name: None,
            old_value: None,
            new_value: Some(snapshot.to_string()),
            action: AuditAction::Insert,
            actor: actor.to_string(),
        }
    }

    pub fn update(
        transaction_id: &TransactionId,
        table_name: &str,
        entity_id: i64,
        field_name: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: &str,
    ) -> Self {
        Self {
            transaction_id: transaction_id.clone(),
            table_name: table_name.to_string(),
            entity_id,
            field_name: Some(field_name.to_string()),
            old_value,
            new_value,
            action: AuditAction::Update,
            actor: actor.to_string(),
        }
    }
}

/// A persisted audit row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub changed_at: String,
}
