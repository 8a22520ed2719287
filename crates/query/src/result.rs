//! The uniform response envelope. Errors never cross the query boundary as
//! exceptions — they arrive here as `[Error: …]` answers with `had_error`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub had_error: bool,
}

impl QueryResult {
    pub fn error(message: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            answer: format!("[Error: {}]", message.into()),
            metadata,
            had_error: true,
        }
    }
}
