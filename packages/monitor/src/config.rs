use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::browser::{BrowserConfig, Credentials};
use crate::extract::ExtractCriteria;
use crate::filter::Preferences;
use crate::types::LicenseType;

const DEFAULT_LOGIN_URL: &str = "https://onlinebusiness.icbc.com/webdeas-ui/login;type=driver";
const DEFAULT_BOOKING_URL: &str = "https://onlinebusiness.icbc.com/web/guest/road-test-booking";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMethod {
    Console,
    Email,
    Sms,
}

impl NotificationMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "console" => Some(Self::Console),
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub sender: String,
    pub password: String,
    pub recipient: String,
    pub smtp_server: String,
    pub smtp_port: u16,
}

#[derive(Debug, Clone)]
pub struct SmsSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub last_name: String,
    pub license_number: String,
    pub keyword: String,
    pub license_type: LicenseType,
    pub preferred_city: String,
    pub earliest_acceptable_date: NaiveDate,
    pub preferred_centers: Vec<String>,
    pub current_booking_date: Option<NaiveDate>,
    /// Ordered list of channels to dispatch through.
    pub notification_methods: Vec<NotificationMethod>,
    pub check_interval: Duration,
    pub login_url: String,
    pub booking_url: String,
    pub headless: bool,
    pub browser_timeout: Duration,
    pub ledger_path: Option<PathBuf>,
    pub email: Option<EmailSettings>,
    pub sms: Option<SmsSettings>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let last_name = env::var("PORTAL_LAST_NAME").context("PORTAL_LAST_NAME must be set")?;
        let license_number =
            env::var("PORTAL_LICENSE_NUMBER").context("PORTAL_LICENSE_NUMBER must be set")?;
        let keyword = env::var("PORTAL_KEYWORD").context("PORTAL_KEYWORD must be set")?;

        let license_type_raw = env::var("LICENSE_TYPE").unwrap_or_else(|_| "N".to_string());
        let license_type = LicenseType::parse(&license_type_raw).with_context(|| {
            format!("LICENSE_TYPE '{license_type_raw}' is not one of: N, 5")
        })?;

        let earliest_acceptable_date = match env::var("EARLIEST_ACCEPTABLE_DATE") {
            Ok(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .context("EARLIEST_ACCEPTABLE_DATE must be YYYY-MM-DD")?,
            Err(_) => Utc::now().date_naive(),
        };

        let current_booking_date = match env::var("CURRENT_BOOKING_DATE") {
            Ok(raw) => Some(
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                    .context("CURRENT_BOOKING_DATE must be YYYY-MM-DD")?,
            ),
            Err(_) => None,
        };

        let preferred_centers: Vec<String> = env::var("PREFERRED_TEST_CENTERS")
            .unwrap_or_default()
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let notification_method_raw =
            env::var("NOTIFICATION_METHOD").unwrap_or_else(|_| "console".to_string());
        let mut notification_methods = Vec::new();
        for raw in notification_method_raw.split(',') {
            let method = NotificationMethod::parse(raw).with_context(|| {
                format!("NOTIFICATION_METHOD '{raw}' is not one of: console, email, sms")
            })?;
            if !notification_methods.contains(&method) {
                notification_methods.push(method);
            }
        }

        let check_interval_minutes: u64 = env::var("CHECK_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("CHECK_INTERVAL_MINUTES must be a valid number")?;
        if check_interval_minutes == 0 {
            bail!("CHECK_INTERVAL_MINUTES must be at least 1");
        }

        let browser_timeout_secs: u64 = env::var("BROWSER_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("BROWSER_TIMEOUT must be a valid number of seconds")?;

        let email = if notification_methods.contains(&NotificationMethod::Email) {
            Some(EmailSettings {
                sender: env::var("EMAIL_SENDER")
                    .context("email notifications require EMAIL_SENDER")?,
                password: env::var("EMAIL_PASSWORD")
                    .context("email notifications require EMAIL_PASSWORD")?,
                recipient: env::var("EMAIL_RECIPIENT")
                    .context("email notifications require EMAIL_RECIPIENT")?,
                smtp_server: env::var("SMTP_SERVER")
                    .unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                smtp_port: env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "587".to_string())
                    .parse()
                    .context("SMTP_PORT must be a valid port number")?,
            })
        } else {
            None
        };

        let sms = if notification_methods.contains(&NotificationMethod::Sms) {
            Some(SmsSettings {
                account_sid: env::var("TWILIO_ACCOUNT_SID")
                    .context("SMS notifications require TWILIO_ACCOUNT_SID")?,
                auth_token: env::var("TWILIO_AUTH_TOKEN")
                    .context("SMS notifications require TWILIO_AUTH_TOKEN")?,
                from_number: env::var("TWILIO_PHONE_NUMBER")
                    .context("SMS notifications require TWILIO_PHONE_NUMBER")?,
                to_number: env::var("RECIPIENT_PHONE_NUMBER")
                    .context("SMS notifications require RECIPIENT_PHONE_NUMBER")?,
            })
        } else {
            None
        };

        Ok(Self {
            last_name,
            license_number,
            keyword,
            license_type,
            preferred_city: env::var("PREFERRED_CITY").unwrap_or_else(|_| "Vancouver".to_string()),
            earliest_acceptable_date,
            preferred_centers,
            current_booking_date,
            notification_methods,
            check_interval: Duration::from_secs(check_interval_minutes * 60),
            login_url: env::var("PORTAL_LOGIN_URL").unwrap_or_else(|_| DEFAULT_LOGIN_URL.to_string()),
            booking_url: env::var("PORTAL_BOOKING_URL")
                .unwrap_or_else(|_| DEFAULT_BOOKING_URL.to_string()),
            headless: env::var("HEADLESS_MODE")
                .map(|v| v.trim().to_lowercase() == "true")
                .unwrap_or(true),
            browser_timeout: Duration::from_secs(browser_timeout_secs),
            ledger_path: env::var("LEDGER_PATH").ok().map(PathBuf::from),
            email,
            sms,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            last_name: self.last_name.clone(),
            license_number: self.license_number.clone(),
            keyword: self.keyword.clone(),
        }
    }

    pub fn preferences(&self) -> Preferences {
        Preferences::new(
            self.license_type,
            &self.preferred_city,
            self.earliest_acceptable_date,
            &self.preferred_centers,
            self.current_booking_date,
        )
    }

    pub fn criteria(&self) -> ExtractCriteria {
        ExtractCriteria {
            license_type: self.license_type,
            city: self.preferred_city.clone(),
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            headless: self.headless,
            timeout: self.browser_timeout,
        }
    }
}
