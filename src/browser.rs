//! CDP browser session management and element waiting.
//!
//! The daemon drives a real Chromium instance over the DevTools protocol —
//! either one it launches itself or an already-running instance reached
//! through a `cdp_url`. The session owns a single page pointed at the
//! automation target, and the liveness check simply asks whether that page
//! is still on the expected host.

use crate::config::BrowserSection;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a single element lookup. Fixed, not operator-tunable.
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll cadence for the element waiter: one display-refresh tick.
pub const FRAME_TICK: Duration = Duration::from_millis(16);

/// Host the automation target must stay on for a batch to keep running.
pub const TARGET_HOST: &str = "web.whatsapp.com";

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The element named by the selector never appeared within the timeout.
    #[error("Timeout waiting for element: {0}")]
    ElementTimeout(String),
    #[error("browser session error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("failed to configure browser: {0}")]
    Config(String),
    #[error("element vanished mid-interaction: {0}")]
    ElementVanished(String),
}

impl BrowserError {
    /// Element-not-found failures are recoverable per contact; everything
    /// else suggests the session itself is unhealthy.
    pub fn is_element_timeout(&self) -> bool {
        matches!(self, BrowserError::ElementTimeout(_))
    }
}

// ── Waiting ─────────────────────────────────────────────────────────────────

/// Poll `probe` once per tick until it yields a value or `timeout` elapses.
///
/// `what` names the thing being waited for and ends up in the timeout
/// error. The probe only observes; it must not mutate the page.
pub async fn wait_for<T, F, Fut>(what: &str, timeout: Duration, mut probe: F) -> Result<T, BrowserError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = probe().await {
            return Ok(found);
        }
        if Instant::now() >= deadline {
            return Err(BrowserError::ElementTimeout(what.to_string()));
        }
        tokio::time::sleep(FRAME_TICK).await;
    }
}

/// Wait for the first element matching `selector` to appear on `page`.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, BrowserError> {
    wait_for(selector, timeout, || async move {
        page.find_element(selector).await.ok()
    })
    .await
}

// ── Session ─────────────────────────────────────────────────────────────────

/// An attached Chromium instance with one page on the automation target.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler_handle: tokio::task::JoinHandle<()>,
}

impl BrowserSession {
    /// Launch (or connect to) Chromium and open the automation target.
    pub async fn open(section: &BrowserSection, target_url: &str) -> Result<Self, BrowserError> {
        let (browser, mut handler) = match &section.cdp_url {
            Some(url) => Browser::connect(url.clone()).await?,
            None => {
                let mut builder = BrowserConfig::builder();
                if !section.headless {
                    builder = builder.with_head();
                }
                if let Some(binary) = resolve_chrome_binary(section) {
                    builder = builder.chrome_executable(binary);
                }
                let config = builder.build().map_err(BrowserError::Config)?;
                Browser::launch(config).await?
            }
        };

        // The handler stream must be drained for the connection to make
        // progress at all.
        let handler_handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(%err, "cdp handler event error");
                }
            }
        });

        let page = browser.new_page(target_url).await?;
        tracing::info!(target_url, "attached to automation target");

        Ok(Self { browser, page, handler_handle })
    }

    /// The single page this session drives.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Is the page still on the expected host?
    pub async fn is_on_target(&self) -> bool {
        page_on_target(&self.page).await
    }

    /// Tear the session down, reaping a launched child process.
    pub async fn close(mut self) {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_handle.abort();
    }
}

/// Liveness predicate: the page URL parses and its host is the target host.
/// Any failure to read the URL counts as "navigated away".
pub async fn page_on_target(page: &Page) -> bool {
    match page.url().await {
        Ok(Some(current)) => url::Url::parse(&current)
            .ok()
            .and_then(|u| u.host_str().map(|h| h == TARGET_HOST))
            .unwrap_or(false),
        _ => false,
    }
}

/// Prefer the configured binary; otherwise probe the usual names on PATH
/// and fall back to chromiumoxide's own detection by returning `None`.
fn resolve_chrome_binary(section: &BrowserSection) -> Option<PathBuf> {
    if let Some(binary) = &section.chrome_binary {
        return Some(binary.clone());
    }
    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}
