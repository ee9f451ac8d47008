//! One poll cycle: session → extract → filter → dedup → dispatch.
//!
//! Component failures are classified into transient/fatal here, at the
//! cycle boundary — individual components never decide to stop the loop.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::browser::BaseBrowser;
use crate::error::{AuthError, ExtractError};
use crate::extract::{extract, ExtractCriteria};
use crate::filter::{qualifies, Preferences};
use crate::ledger::SeenLedger;
use crate::notify::{AppointmentAlert, Dispatcher};
use crate::scheduler::CycleRunner;
use crate::session::SessionManager;
use crate::types::{AppointmentCandidate, CycleReport, CycleStatus, SeenKey, TransientKind};

pub struct Engine {
    browser: Arc<dyn BaseBrowser>,
    session: SessionManager,
    criteria: ExtractCriteria,
    preferences: Preferences,
    ledger: SeenLedger,
    dispatcher: Dispatcher,
    booking_url: String,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        browser: Arc<dyn BaseBrowser>,
        session: SessionManager,
        criteria: ExtractCriteria,
        preferences: Preferences,
        ledger: SeenLedger,
        dispatcher: Dispatcher,
        booking_url: String,
    ) -> Self {
        Self {
            browser,
            session,
            criteria,
            preferences,
            ledger,
            dispatcher,
            booking_url,
        }
    }

    pub fn ledger(&self) -> &SeenLedger {
        &self.ledger
    }

    /// Run one full poll cycle.
    pub async fn poll(&mut self) -> CycleReport {
        let candidates = match self.gather_candidates().await {
            Ok(candidates) => candidates,
            Err(status) => return CycleReport::failed(status),
        };

        let candidates_seen = candidates.len();
        let qualifying: Vec<&AppointmentCandidate> = candidates
            .iter()
            .filter(|c| qualifies(c, &self.preferences))
            .collect();

        let mut notified = 0;
        for candidate in &qualifying {
            let key = SeenKey::from(*candidate);
            if !self.ledger.is_new(&key) {
                continue;
            }

            info!(slot = %key, "New qualifying appointment, dispatching alert");
            let alert = AppointmentAlert::new(candidate, &self.booking_url);
            let outcome = self.dispatcher.notify(&alert).await;

            if outcome.any_delivered() {
                // Mark before examining the next candidate so near-duplicate
                // listings collapsing to one key cannot dispatch twice.
                self.ledger.mark_notified(key, Utc::now());
                notified += 1;
            } else {
                warn!(slot = %key, "Every channel failed, slot will retry next cycle");
            }
        }

        self.ledger.expire_older_than(Utc::now().date_naive());
        if let Err(e) = self.ledger.save() {
            warn!(error = %e, "Failed to persist dedup ledger");
        }

        info!(
            candidates = candidates_seen,
            qualifying = qualifying.len(),
            notified,
            "Cycle complete"
        );

        CycleReport {
            candidates_seen,
            qualifying: qualifying.len(),
            notified,
            status: CycleStatus::Ok,
        }
    }

    /// Dry run: session acquisition and one extraction pass, nothing
    /// dispatched and nothing marked.
    pub async fn probe(&mut self) -> CycleReport {
        let candidates = match self.gather_candidates().await {
            Ok(candidates) => candidates,
            Err(status) => return CycleReport::failed(status),
        };

        let qualifying = candidates
            .iter()
            .filter(|c| qualifies(c, &self.preferences))
            .count();

        info!(
            candidates = candidates.len(),
            qualifying,
            "Probe complete, no alerts dispatched"
        );

        CycleReport {
            candidates_seen: candidates.len(),
            qualifying,
            notified: 0,
            status: CycleStatus::Ok,
        }
    }

    /// Acquire a session and extract candidates, with at most one
    /// invalidate-and-relogin retry when the portal rejects the session.
    async fn gather_candidates(&mut self) -> Result<Vec<AppointmentCandidate>, CycleStatus> {
        if let Err(e) = self.session.acquire().await {
            return Err(classify_auth(e));
        }

        match extract(self.browser.as_ref(), &self.booking_url, &self.criteria).await {
            Ok(candidates) => Ok(candidates),
            Err(ExtractError::NotAuthenticated) => {
                info!("Session rejected mid-cycle, re-authenticating once");
                self.session.invalidate();
                if let Err(e) = self.session.acquire().await {
                    return Err(classify_auth(e));
                }
                extract(self.browser.as_ref(), &self.booking_url, &self.criteria)
                    .await
                    .map_err(classify_extract)
            }
            Err(e) => Err(classify_extract(e)),
        }
    }
}

#[async_trait]
impl CycleRunner for Engine {
    async fn run_cycle(&mut self) -> CycleReport {
        self.poll().await
    }
}

fn classify_auth(e: AuthError) -> CycleStatus {
    match e {
        AuthError::InvalidCredentials => {
            error!("Session manager: {e}");
            CycleStatus::FatalError(format!("session manager: {e}"))
        }
        AuthError::RetriesExhausted { .. } => {
            warn!("Session manager: {e}");
            CycleStatus::TransientError(TransientKind::Auth)
        }
    }
}

fn classify_extract(e: ExtractError) -> CycleStatus {
    match e {
        ExtractError::NotAuthenticated => {
            warn!("Appointment extractor: session rejected again after re-login");
            CycleStatus::TransientError(TransientKind::Auth)
        }
        ExtractError::MarkupChanged(detail) => {
            warn!(detail = %detail, "Appointment extractor: booking page structure changed");
            CycleStatus::TransientError(TransientKind::Markup)
        }
        ExtractError::Transport(detail) => {
            warn!(detail = %detail, "Appointment extractor: transport failure");
            CycleStatus::TransientError(TransientKind::Transport)
        }
    }
}
