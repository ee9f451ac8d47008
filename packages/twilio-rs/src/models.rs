use serde::Deserialize;

/// Response from the Twilio Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub sid: String,
    pub status: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl MessageResponse {
    /// Twilio reports synchronous failures as "failed" or "undelivered".
    pub fn is_failed(&self) -> bool {
        self.status == "failed" || self.status == "undelivered" || self.error_code.is_some()
    }
}
