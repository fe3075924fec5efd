pub mod http_polling;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Accepts the command id as either a JSON string or a number.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A pending command handed out by the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(default, deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub command: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub arguments: String,
}

/// Outcome report sent back through the `pickup` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub action: String,
    pub success: bool,
    pub message: String,
}

impl Acknowledgement {
    pub fn success(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: false,
            message: message.into(),
        }
    }

    /// Wire form of the success flag (`1` / `0`).
    pub fn success_flag(&self) -> &'static str {
        if self.success {
            "1"
        } else {
            "0"
        }
    }
}

/// Body of a `fetch` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub message: Option<Value>,
}

impl FetchResponse {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Command records in the batch. Entries that do not decode are logged and skipped.
    pub fn commands(&self) -> Vec<CommandRecord> {
        let Some(Value::Array(items)) = &self.message else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<CommandRecord>(item.clone()) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(entry = %item, error = %e, "skipping malformed command record");
                    None
                }
            })
            .collect()
    }
}
