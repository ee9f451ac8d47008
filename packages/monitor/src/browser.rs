//! HTTP-backed automation layer for the licensing portal.
//!
//! The engine only depends on the `BaseBrowser` trait; `HttpBrowser` is the
//! production implementation (reqwest with a cookie store standing in for
//! the browser session). Tests substitute their own implementations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Login form fields for the licensing portal.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub last_name: String,
    pub license_number: String,
    pub keyword: String,
}

/// A fetched page: the URL the request ended up at plus the body.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub body: String,
}

/// Trait for the browser automation layer (to allow mocking)
#[async_trait]
pub trait BaseBrowser: Send + Sync {
    /// Load a page, following redirects, and return the final URL and body.
    async fn load(&self, url: &str) -> Result<Page>;

    /// Submit the login form. `Ok(false)` means the portal rejected the
    /// credentials; `Err` is a transport-level failure.
    async fn submit_credentials(&self, login_url: &str, credentials: &Credentials) -> Result<bool>;

    /// URL of the most recently loaded page.
    fn current_url(&self) -> String;
}

/// Whether a URL points at the portal's login surface.
pub fn is_login_url(url: &str) -> bool {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => url.to_lowercase(),
    };
    path.contains("login") || path.contains("signin")
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cookie-session HTTP client implementing `BaseBrowser`.
pub struct HttpBrowser {
    client: reqwest::Client,
    current_url: Mutex<String>,
}

impl HttpBrowser {
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        // Use a browser-like User-Agent to avoid bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .parse()
                .unwrap(),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().unwrap(),
        );
        headers.insert(reqwest::header::CONNECTION, "keep-alive".parse().unwrap());

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        debug!(
            headless = config.headless,
            timeout_secs = config.timeout.as_secs(),
            "HTTP automation layer ready"
        );

        Ok(Self {
            client,
            current_url: Mutex::new(String::new()),
        })
    }

    fn record_url(&self, url: &str) {
        let mut current = self.current_url.lock().unwrap();
        *current = url.to_string();
    }
}

#[async_trait]
impl BaseBrowser for HttpBrowser {
    async fn load(&self, url: &str) -> Result<Page> {
        debug!(url = %url, "Loading page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;

        let final_url = response.url().to_string();
        self.record_url(&final_url);

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {}", status, final_url);
        }

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        Ok(Page {
            url: final_url,
            body,
        })
    }

    async fn submit_credentials(&self, login_url: &str, credentials: &Credentials) -> Result<bool> {
        // Load the login surface first so the portal hands out its session cookie.
        self.load(login_url).await.context("Failed to load login page")?;

        let form = [
            ("lastName", credentials.last_name.as_str()),
            ("licenceNumber", credentials.license_number.as_str()),
            ("keyword", credentials.keyword.as_str()),
        ];

        debug!(url = %login_url, "Submitting login form");
        let response = self
            .client
            .post(login_url)
            .form(&form)
            .send()
            .await
            .context("Login request failed")?;

        let final_url = response.url().to_string();
        self.record_url(&final_url);

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(false);
        }
        if !status.is_success() {
            anyhow::bail!("HTTP {} during login", status);
        }

        // A bounce back to the login surface means the credentials were not accepted.
        Ok(!is_login_url(&final_url))
    }

    fn current_url(&self) -> String {
        self.current_url.lock().unwrap().clone()
    }
}
