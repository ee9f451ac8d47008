//! Engine-level scenario tests.
//!
//! The automation layer is a scripted browser serving canned pages and the
//! notification channels record what they deliver, so whole poll cycles run
//! without a network.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use monitor_core::{
    AppointmentAlert, BaseBrowser, BaseChannel, Credentials, CycleStatus, DispatchError,
    Dispatcher, Engine, ExtractCriteria, LicenseType, Page, Preferences, SeenLedger,
    SessionManager, TransientKind,
};

const LOGIN_URL: &str = "https://portal.example.com/webdeas-ui/login;type=driver";
const BOOKING_URL: &str = "https://portal.example.com/road-test-booking";

const SLOT_PAGE: &str = r#"<html><body>
  <h2 class="location-name">Downtown </h2>
  <div class="date-group" data-date="2025-03-01">
    <button class="time-slot">9:00 AM</button>
  </div>
</body></html>"#;

const EMPTY_PAGE: &str = r#"<html><body>
  <h2 class="location-name">Downtown</h2>
  <div class="no-appointments">There are no road test appointments available.</div>
</body></html>"#;

/// Two near-duplicate listings whose labels normalize to the same key.
const DUPLICATE_LABEL_PAGE: &str = r#"<html><body>
  <div class="date-group" data-date="2025-03-01">
    <div class="location-name">Downtown </div>
    <button class="time-slot">9:00 AM</button>
  </div>
  <div class="date-group" data-date="2025-03-01">
    <div class="location-name">DOWNTOWN</div>
    <button class="time-slot">9:00 AM</button>
  </div>
</body></html>"#;

/// Serves a scripted sequence of pages; the last page repeats forever.
struct ScriptedBrowser {
    pages: Mutex<Vec<Page>>,
    login_calls: AtomicUsize,
}

impl ScriptedBrowser {
    fn new(pages: Vec<(&str, &str)>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(
                pages
                    .into_iter()
                    .map(|(url, body)| Page {
                        url: url.to_string(),
                        body: body.to_string(),
                    })
                    .collect(),
            ),
            login_calls: AtomicUsize::new(0),
        })
    }

    fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseBrowser for ScriptedBrowser {
    async fn load(&self, _url: &str) -> anyhow::Result<Page> {
        let mut pages = self.pages.lock().unwrap();
        if pages.len() > 1 {
            Ok(pages.remove(0))
        } else {
            Ok(pages[0].clone())
        }
    }

    async fn submit_credentials(
        &self,
        _login_url: &str,
        _credentials: &Credentials,
    ) -> anyhow::Result<bool> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn current_url(&self) -> String {
        BOOKING_URL.to_string()
    }
}

/// Records delivered alerts; deliverability can be flipped between cycles.
struct RecordingChannel {
    delivered: Arc<Mutex<Vec<String>>>,
    succeed: Arc<AtomicBool>,
}

impl RecordingChannel {
    fn new() -> (Box<Self>, Arc<Mutex<Vec<String>>>, Arc<AtomicBool>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let succeed = Arc::new(AtomicBool::new(true));
        let channel = Box::new(Self {
            delivered: delivered.clone(),
            succeed: succeed.clone(),
        });
        (channel, delivered, succeed)
    }
}

#[async_trait]
impl BaseChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, alert: &AppointmentAlert) -> Result<(), DispatchError> {
        if self.succeed.load(Ordering::SeqCst) {
            self.delivered
                .lock()
                .unwrap()
                .push(alert.test_center.clone());
            Ok(())
        } else {
            Err(DispatchError {
                channel: self.name(),
                reason: "unreachable".to_string(),
            })
        }
    }
}

fn preferences() -> Preferences {
    Preferences::new(
        LicenseType::Novice,
        "Vancouver",
        NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        &["downtown".to_string()],
        None,
    )
}

fn engine(browser: Arc<ScriptedBrowser>, channels: Vec<Box<dyn BaseChannel>>) -> Engine {
    let session_browser: Arc<dyn BaseBrowser> = browser.clone();
    let session = SessionManager::new(
        session_browser,
        Credentials {
            last_name: "Doe".to_string(),
            license_number: "1234567".to_string(),
            keyword: "hunter2".to_string(),
        },
        LOGIN_URL.to_string(),
        BOOKING_URL.to_string(),
    );
    Engine::new(
        browser,
        session,
        ExtractCriteria {
            license_type: LicenseType::Novice,
            city: "Vancouver".to_string(),
        },
        preferences(),
        SeenLedger::in_memory(),
        Dispatcher::new(channels),
        BOOKING_URL.to_string(),
    )
}

#[tokio::test]
async fn test_new_qualifying_slot_alerts_once_then_deduplicates() {
    let browser = ScriptedBrowser::new(vec![(BOOKING_URL, SLOT_PAGE)]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser, vec![channel]);

    let first = engine.poll().await;
    assert_eq!(first.status, CycleStatus::Ok);
    assert_eq!(first.candidates_seen, 1);
    assert_eq!(first.qualifying, 1);
    assert_eq!(first.notified, 1);

    // Second identical cycle: same slot, no second alert.
    let second = engine.poll().await;
    assert_eq!(second.status, CycleStatus::Ok);
    assert_eq!(second.qualifying, 1);
    assert_eq!(second.notified, 0);

    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_candidates_is_a_normal_ok_cycle() {
    let browser = ScriptedBrowser::new(vec![(BOOKING_URL, EMPTY_PAGE)]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser, vec![channel]);

    let report = engine.poll().await;
    assert_eq!(report.status, CycleStatus::Ok);
    assert_eq!(report.candidates_seen, 0);
    assert_eq!(report.notified, 0);
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_rejection_triggers_one_relogin_within_the_cycle() {
    // First booking-page load bounces to the login surface; after the
    // re-login the slot page comes back.
    let browser = ScriptedBrowser::new(vec![(LOGIN_URL, ""), (BOOKING_URL, SLOT_PAGE)]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser.clone(), vec![channel]);

    let report = engine.poll().await;
    assert_eq!(report.status, CycleStatus::Ok);
    assert_eq!(report.notified, 1);
    // Initial login plus exactly one in-cycle recovery.
    assert_eq!(browser.login_calls(), 2);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_session_rejection_in_a_cycle_is_transient() {
    let browser = ScriptedBrowser::new(vec![(LOGIN_URL, ""), (LOGIN_URL, "")]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser.clone(), vec![channel]);

    let report = engine.poll().await;
    assert_eq!(
        report.status,
        CycleStatus::TransientError(TransientKind::Auth)
    );
    // One re-login was attempted, then the cycle gave up.
    assert_eq!(browser.login_calls(), 2);
    assert!(delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_near_duplicate_listings_dispatch_once() {
    let browser = ScriptedBrowser::new(vec![(BOOKING_URL, DUPLICATE_LABEL_PAGE)]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser, vec![channel]);

    let report = engine.poll().await;
    assert_eq!(report.status, CycleStatus::Ok);
    assert_eq!(report.candidates_seen, 2);
    assert_eq!(report.qualifying, 2);
    // Both listings collapse to one seen-key: exactly one alert.
    assert_eq!(report.notified, 1);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_total_dispatch_failure_leaves_the_slot_eligible_for_retry() {
    let browser = ScriptedBrowser::new(vec![(BOOKING_URL, SLOT_PAGE)]);
    let (channel, delivered, succeed) = RecordingChannel::new();
    succeed.store(false, Ordering::SeqCst);
    let mut engine = engine(browser, vec![channel]);

    let first = engine.poll().await;
    assert_eq!(first.status, CycleStatus::Ok);
    assert_eq!(first.notified, 0);
    assert!(engine.ledger().is_empty());

    // Channel recovers: the same slot fires on the next cycle.
    succeed.store(true, Ordering::SeqCst);
    let second = engine.poll().await;
    assert_eq!(second.notified, 1);
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_probe_never_dispatches() {
    let browser = ScriptedBrowser::new(vec![(BOOKING_URL, SLOT_PAGE)]);
    let (channel, delivered, _) = RecordingChannel::new();
    let mut engine = engine(browser, vec![channel]);

    let report = engine.probe().await;
    assert_eq!(report.status, CycleStatus::Ok);
    assert_eq!(report.qualifying, 1);
    assert_eq!(report.notified, 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert!(engine.ledger().is_empty());
}
