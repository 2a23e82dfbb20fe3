// Blocked-account detection.
// Inspects 401/403 bodies for every shape the backend has used to report a block.

use reqwest::StatusCode;
use serde_json::Value;

pub const BLOCKED_CODE: &str = "user_blocked";

const DEFAULT_BLOCKED_MESSAGE: &str = "Your account has been blocked, please contact an administrator";

/// Matches block signals: a `blocked` flag, the `user_blocked` code, or a
/// configured phrase in `detail`, `message` or `non_field_errors`.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    phrases: Vec<String>,
}

impl BlockDetector {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|phrase| phrase.to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }

    /// Returns the message to show when the reply reports a blocked account.
    pub fn detect(&self, status: StatusCode, body: &Value) -> Option<String> {
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            return None;
        }

        let flagged = body.get("blocked").and_then(Value::as_bool) == Some(true);
        let coded = body.get("code").and_then(Value::as_str) == Some(BLOCKED_CODE);

        let messages: Vec<&str> = ["detail", "message"]
            .iter()
            .filter_map(|field| body.get(*field).and_then(Value::as_str))
            .chain(
                body.get("non_field_errors")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str),
            )
            .collect();
        let phrased = messages.iter().any(|message| self.mentions_block(message));

        if !(flagged || coded || phrased) {
            return None;
        }

        let message = messages
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| DEFAULT_BLOCKED_MESSAGE.to_string());
        Some(message)
    }

    fn mentions_block(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.phrases.iter().any(|phrase| lowered.contains(phrase))
    }
}
