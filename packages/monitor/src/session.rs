//! Authenticated-session ownership for the polling loop.
//!
//! The rest of the engine only asks "give me a valid session" — session
//! internals (cookie lifetime, verification cadence) stay here.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::browser::{is_login_url, BaseBrowser, Credentials};
use crate::error::AuthError;

/// Login round-trips attempted per `acquire` before giving up.
const LOGIN_ATTEMPT_LIMIT: u32 = 2;

/// Sessions verified within this window are reused without touching the portal.
const SESSION_TTL_MINUTES: i64 = 20;

/// Opaque authenticated handle. Owned exclusively by the session manager.
#[derive(Debug, Clone)]
pub struct Session {
    pub established_at: DateTime<Utc>,
    last_verified: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            established_at: now,
            last_verified: now,
        }
    }

    fn minutes_since_verified(&self) -> i64 {
        (Utc::now() - self.last_verified).num_minutes()
    }
}

pub struct SessionManager {
    browser: Arc<dyn BaseBrowser>,
    credentials: Credentials,
    login_url: String,
    booking_url: String,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(
        browser: Arc<dyn BaseBrowser>,
        credentials: Credentials,
        login_url: String,
        booking_url: String,
    ) -> Self {
        Self {
            browser,
            credentials,
            login_url,
            booking_url,
            session: None,
        }
    }

    /// Return a session guaranteed valid at return time.
    ///
    /// A recently verified session is reused as-is. A stale one gets a cheap
    /// authenticated ping; only when that fails does a full login run, with
    /// up to [`LOGIN_ATTEMPT_LIMIT`] round-trips.
    pub async fn acquire(&mut self) -> Result<Session, AuthError> {
        if let Some(session) = &self.session {
            if session.minutes_since_verified() < SESSION_TTL_MINUTES {
                debug!(
                    established_at = %session.established_at,
                    "Reusing held session"
                );
                return Ok(session.clone());
            }

            if self.verify().await {
                let refreshed = Session {
                    established_at: session.established_at,
                    last_verified: Utc::now(),
                };
                debug!("Held session still valid, refreshed verification stamp");
                self.session = Some(refreshed.clone());
                return Ok(refreshed);
            }

            info!("Held session expired, re-authenticating");
            self.session = None;
        }

        let session = self.login().await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drop the held session. Called when the extractor sees the portal
    /// reject the session mid-cycle.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("Session invalidated");
        }
    }

    /// Lightweight freshness check: load an authenticated page and see
    /// whether the portal bounces us to the login surface.
    async fn verify(&self) -> bool {
        match self.browser.load(&self.booking_url).await {
            Ok(page) => !is_login_url(&page.url),
            Err(e) => {
                warn!(error = %e, "Session freshness check failed");
                false
            }
        }
    }

    async fn login(&self) -> Result<Session, AuthError> {
        let mut last_reason = String::new();
        for attempt in 1..=LOGIN_ATTEMPT_LIMIT {
            info!(attempt, "Logging in to the licensing portal");
            match self
                .browser
                .submit_credentials(&self.login_url, &self.credentials)
                .await
            {
                Ok(true) => {
                    info!("Login successful");
                    return Ok(Session::new());
                }
                // Rejected credentials will not get better on retry.
                Ok(false) => return Err(AuthError::InvalidCredentials),
                Err(e) => {
                    warn!(attempt, error = %e, "Login attempt failed");
                    last_reason = format!("{e:#}");
                }
            }
        }
        Err(AuthError::RetriesExhausted {
            attempts: LOGIN_ATTEMPT_LIMIT,
            reason: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Page;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Browser whose login outcomes are scripted per call.
    struct ScriptedBrowser {
        outcomes: Mutex<Vec<anyhow::Result<bool>>>,
        login_calls: Mutex<u32>,
    }

    impl ScriptedBrowser {
        fn new(outcomes: Vec<anyhow::Result<bool>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                login_calls: Mutex::new(0),
            }
        }

        fn login_calls(&self) -> u32 {
            *self.login_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl BaseBrowser for ScriptedBrowser {
        async fn load(&self, url: &str) -> anyhow::Result<Page> {
            Ok(Page {
                url: url.to_string(),
                body: String::new(),
            })
        }

        async fn submit_credentials(
            &self,
            _login_url: &str,
            _credentials: &Credentials,
        ) -> anyhow::Result<bool> {
            *self.login_calls.lock().unwrap() += 1;
            self.outcomes.lock().unwrap().remove(0)
        }

        fn current_url(&self) -> String {
            String::new()
        }
    }

    fn manager(browser: Arc<ScriptedBrowser>) -> SessionManager {
        SessionManager::new(
            browser,
            Credentials {
                last_name: "Doe".to_string(),
                license_number: "1234567".to_string(),
                keyword: "hunter2".to_string(),
            },
            "https://portal.example.com/login".to_string(),
            "https://portal.example.com/road-test-booking".to_string(),
        )
    }

    #[tokio::test]
    async fn test_acquire_retries_transport_failure_then_succeeds() {
        let browser = Arc::new(ScriptedBrowser::new(vec![
            Err(anyhow!("connection reset")),
            Ok(true),
        ]));
        let mut manager = manager(browser.clone());

        manager.acquire().await.expect("second attempt should succeed");
        assert_eq!(browser.login_calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried() {
        let browser = Arc::new(ScriptedBrowser::new(vec![Ok(false)]));
        let mut manager = manager(browser.clone());

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(browser.login_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_as_auth_error() {
        let browser = Arc::new(ScriptedBrowser::new(vec![
            Err(anyhow!("timeout")),
            Err(anyhow!("timeout")),
        ]));
        let mut manager = manager(browser.clone());

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, AuthError::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_fresh_session_is_reused_without_relogin() {
        let browser = Arc::new(ScriptedBrowser::new(vec![Ok(true)]));
        let mut manager = manager(browser.clone());

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();
        assert_eq!(browser.login_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_full_login() {
        let browser = Arc::new(ScriptedBrowser::new(vec![Ok(true), Ok(true)]));
        let mut manager = manager(browser.clone());

        manager.acquire().await.unwrap();
        manager.invalidate();
        manager.acquire().await.unwrap();
        assert_eq!(browser.login_calls(), 2);
    }
}
