/// Structural checks applied at the request boundary, before a transaction
/// reaches the ledger.
use crate::error::ChainError;
use crate::transaction::types::Transaction;
use serde_json::Value;

/// Fields every submitted transaction must carry.
pub const REQUIRED_FIELDS: [&str; 3] = ["sender", "recipient", "amount"];

impl Transaction {
    /// Build a transaction from an untrusted JSON body.
    ///
    /// Only structural presence and shape are checked: `sender` and
    /// `recipient` must be strings and `amount` must be a number.
    pub fn from_json(values: &Value) -> Result<Self, ChainError> {
        let object = values.as_object().ok_or_else(|| {
            ChainError::InvalidTransaction("Request body must be a JSON object".to_string())
        })?;

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !object.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(ChainError::InvalidTransaction(format!(
                "Missing values: {}",
                missing.join(", ")
            )));
        }

        let sender = string_field(values, "sender")?;
        let recipient = string_field(values, "recipient")?;
        let amount = values["amount"].as_f64().ok_or_else(|| {
            ChainError::InvalidTransaction("Field 'amount' must be a number".to_string())
        })?;

        Ok(Transaction::new(sender, recipient, amount))
    }
}

fn string_field(values: &Value, field: &str) -> Result<String, ChainError> {
    values[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ChainError::InvalidTransaction(format!("Field '{}' must be a string", field)))
}
