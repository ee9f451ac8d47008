pub mod browser;
pub mod config;
pub mod cycle;
pub mod error;
pub mod extract;
pub mod filter;
pub mod ledger;
pub mod notify;
pub mod scheduler;
pub mod session;
pub mod types;

// Re-exports for clean API
pub use browser::{BaseBrowser, BrowserConfig, Credentials, HttpBrowser, Page};
pub use config::{Config, EmailSettings, NotificationMethod, SmsSettings};
pub use cycle::Engine;
pub use error::{AuthError, DispatchError, ExtractError};
pub use extract::ExtractCriteria;
pub use filter::{qualifies, Preferences};
pub use ledger::{SeenEntry, SeenLedger};
pub use notify::{
    AppointmentAlert, BaseChannel, ConsoleChannel, Dispatcher, DispatchOutcome, EmailChannel,
    SmsChannel,
};
pub use scheduler::{
    CycleRunner, Decision, PollScheduler, SchedulerConfig, SchedulerPolicy, State, StopCause,
};
pub use session::{Session, SessionManager};
pub use types::{
    normalize_center, AppointmentCandidate, CycleReport, CycleStatus, LicenseType, SeenKey,
    TransientKind,
};
