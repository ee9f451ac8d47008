use thiserror::Error;

/// Login-sequence failures surfaced by the session manager.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The portal rejected the credentials outright. Retrying will not help.
    #[error("credentials rejected by the licensing portal")]
    InvalidCredentials,

    /// Transport failures during login count against the attempt bound and
    /// end up here when the bound is spent.
    #[error("login failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Failures turning the booking surface into appointment candidates.
///
/// Zero open appointments is NOT represented here — a recognized-but-empty
/// booking page is `Ok(vec![])` from the extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The portal bounced us to the login surface mid-session.
    #[error("session rejected while loading the booking page")]
    NotAuthenticated,

    /// The page loaded but none of the structural anchors matched.
    #[error("booking page structure not recognized: {0}")]
    MarkupChanged(String),

    #[error("transport failure while loading the booking page: {0}")]
    Transport(String),
}

/// A single notification channel failing to deliver.
#[derive(Debug, Clone, Error)]
#[error("{channel}: {reason}")]
pub struct DispatchError {
    pub channel: &'static str,
    pub reason: String,
}
