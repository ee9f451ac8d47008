//! Alert dispatch: channel-agnostic fan-out to console, email, and SMS.
//!
//! Channels are an ordered list behind one trait; delivery on at least one
//! channel counts as delivered for dedup purposes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use anyhow::{Context, Result};

use crate::config::{EmailSettings, SmsSettings};
use crate::error::DispatchError;
use crate::types::{AppointmentCandidate, LicenseType};

/// Structured appointment summary handed to every channel.
#[derive(Debug, Clone)]
pub struct AppointmentAlert {
    pub test_center: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub license_type: LicenseType,
    pub booking_url: String,
    pub found_at: DateTime<Utc>,
}

impl AppointmentAlert {
    pub fn new(candidate: &AppointmentCandidate, booking_url: &str) -> Self {
        Self {
            test_center: candidate.test_center.clone(),
            date: candidate.date,
            time: candidate.time,
            license_type: candidate.license_type,
            booking_url: booking_url.to_string(),
            found_at: Utc::now(),
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "Road test appointment available: {} on {}",
            self.test_center, self.date
        )
    }

    pub fn email_body(&self) -> String {
        format!(
            "A road test appointment has become available.\n\n\
             Date:         {}\n\
             Time:         {}\n\
             Test centre:  {}\n\
             License type: {}\n\
             Found at:     {}\n\n\
             Book it before it is taken: {}\n",
            self.date.format("%A, %B %e, %Y"),
            self.time.format("%l:%M %p"),
            self.test_center,
            self.license_type,
            self.found_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.booking_url
        )
    }

    pub fn sms_body(&self) -> String {
        format!(
            "Road test appointment available!\n{} at {}\n{} ({})\nBook now: {}",
            self.date.format("%b %e, %Y"),
            self.time.format("%l:%M %p"),
            self.test_center,
            self.license_type,
            self.booking_url
        )
    }
}

/// Trait for notification channels (to allow mocking)
#[async_trait]
pub trait BaseChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, alert: &AppointmentAlert) -> Result<(), DispatchError>;
}

/// Always-available stdout channel.
pub struct ConsoleChannel;

#[async_trait]
impl BaseChannel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, alert: &AppointmentAlert) -> Result<(), DispatchError> {
        println!("{}", "=".repeat(50));
        println!("ROAD TEST APPOINTMENT AVAILABLE");
        println!("{}", "=".repeat(50));
        println!("Date:         {}", alert.date.format("%A, %B %e, %Y"));
        println!("Time:         {}", alert.time.format("%l:%M %p"));
        println!("Test centre:  {}", alert.test_center);
        println!("License type: {}", alert.license_type);
        println!("Book now:     {}", alert.booking_url);
        println!("{}", "=".repeat(50));
        Ok(())
    }
}

/// SMTP channel (STARTTLS relay with username/app-password credentials).
pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Result<Self> {
        let from: Mailbox = settings
            .sender
            .parse()
            .context("EMAIL_SENDER is not a valid address")?;
        let to: Mailbox = settings
            .recipient
            .parse()
            .context("EMAIL_RECIPIENT is not a valid address")?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .context("Failed to configure SMTP relay")?
            .port(settings.smtp_port)
            .credentials(SmtpCredentials::new(
                settings.sender.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl BaseChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, alert: &AppointmentAlert) -> Result<(), DispatchError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.subject())
            .body(alert.email_body())
            .map_err(|e| DispatchError {
                channel: self.name(),
                reason: e.to_string(),
            })?;

        self.mailer.send(message).await.map_err(|e| DispatchError {
            channel: self.name(),
            reason: e.to_string(),
        })?;

        debug!(recipient = %self.to, "Email alert sent");
        Ok(())
    }
}

/// Twilio SMS channel.
pub struct SmsChannel {
    service: twilio::TwilioService,
    to_number: String,
}

impl SmsChannel {
    pub fn new(settings: &SmsSettings) -> Self {
        let service = twilio::TwilioService::new(twilio::TwilioOptions {
            account_sid: settings.account_sid.clone(),
            auth_token: settings.auth_token.clone(),
            from_number: settings.from_number.clone(),
        });
        Self {
            service,
            to_number: settings.to_number.clone(),
        }
    }
}

#[async_trait]
impl BaseChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, alert: &AppointmentAlert) -> Result<(), DispatchError> {
        let response = self
            .service
            .send_message(&self.to_number, &alert.sms_body())
            .await
            .map_err(|e| DispatchError {
                channel: self.name(),
                reason: e.to_string(),
            })?;

        debug!(sid = %response.sid, status = %response.status, "SMS alert accepted");
        Ok(())
    }
}

/// Per-alert delivery record across all configured channels.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<DispatchError>,
}

impl DispatchOutcome {
    /// Partial delivery is success for dedup purposes: the user was told
    /// once, through some channel.
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Ordered list of channels; fan-out is concurrent, channels are independent.
pub struct Dispatcher {
    channels: Vec<Box<dyn BaseChannel>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn BaseChannel>>) -> Self {
        Self { channels }
    }

    pub async fn notify(&self, alert: &AppointmentAlert) -> DispatchOutcome {
        let sends = self.channels.iter().map(|channel| {
            let name = channel.name();
            async move { (name, channel.send(alert).await) }
        });

        let mut outcome = DispatchOutcome::default();
        for (name, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    debug!(channel = name, "Alert delivered");
                    outcome.delivered.push(name);
                }
                Err(e) => {
                    warn!(channel = name, error = %e, "Alert delivery failed");
                    outcome.failed.push(e);
                }
            }
        }
        outcome
    }
}
