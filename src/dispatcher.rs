//! Per-contact dispatch against the live WhatsApp Web page.
//!
//! One dispatch walks the UI exactly the way a human would: open a new
//! chat, search the number, pick the result, type, send — with bounded
//! waits around every element lookup and randomized pauses in between.
//! Whatever goes wrong is folded into a tagged outcome; nothing escapes
//! this module as an error.

use crate::browser::{self, BrowserError, DEFAULT_ELEMENT_TIMEOUT};
use crate::config::TypingMode;
use crate::pacing;
use crate::roster::Contact;
use crate::runner::{ContactDispatch, DispatchOutcome, Liveness};
use async_trait::async_trait;
use chromiumoxide::Page;
use std::time::Duration;

// UI controls, matched the way WhatsApp Web labels them today. They move
// whenever the host app ships a redesign; every lookup is bounded and
// every miss names its selector.
const NEW_CHAT_BUTTON: &str = r#"div[title="New chat"]"#;
const SEARCH_INPUT: &str = r#"div[contenteditable="true"][data-tab="3"]"#;
const MESSAGE_INPUT: &str = r#"div[title="Type a message"]"#;
const SEND_BUTTON: &str = r#"span[data-icon="send"]"#;

const PRE_SEND_DELAY_SECS: (u64, u64) = (1, 3);
const INTER_CONTACT_DELAY_SECS: (u64, u64) = (5, 15);
const KEYSTROKE_DELAY_MS: (u64, u64) = (40, 120);

/// Executes one send attempt per contact over a CDP page.
pub struct Dispatcher {
    page: Page,
    typing: TypingMode,
    search_settle: Duration,
}

impl Dispatcher {
    /// `search_settle` is the fallback pause for search results to
    /// materialize — time-based, so kept operator-configurable.
    pub fn new(page: Page, typing: TypingMode, search_settle: Duration) -> Self {
        Self { page, typing, search_settle }
    }

    /// Run the full per-contact protocol, folding any failure into the
    /// returned outcome.
    pub async fn send_single_message(&self, contact: &Contact) -> DispatchOutcome {
        match self.try_send(contact).await {
            Ok(()) => {
                tracing::info!(phone = %contact.phone, "message sent");
                DispatchOutcome::sent(contact)
            }
            Err(err) => {
                tracing::warn!(
                    phone = %contact.phone,
                    %err,
                    selector_miss = err.is_element_timeout(),
                    "dispatch failed"
                );
                DispatchOutcome::failed(contact, &err)
            }
        }
    }

    async fn try_send(&self, contact: &Contact) -> Result<(), BrowserError> {
        let page = &self.page;

        // Open the new-conversation panel.
        browser::wait_for_element(page, NEW_CHAT_BUTTON, DEFAULT_ELEMENT_TIMEOUT)
            .await?
            .click()
            .await?;

        // Put the number into the recipient search. The synthetic input
        // event is what makes the page's reactive search notice the change.
        browser::wait_for_element(page, SEARCH_INPUT, DEFAULT_ELEMENT_TIMEOUT).await?;
        set_reactive_text(page, SEARCH_INPUT, &contact.phone).await?;

        // Search results render asynchronously with no completion signal.
        // The element wait below is the real guard; the settle matches the
        // list's usual render lag.
        tokio::time::sleep(self.search_settle).await;

        let result_selector = chat_result_selector(&contact.phone);
        browser::wait_for_element(page, &result_selector, DEFAULT_ELEMENT_TIMEOUT)
            .await?
            .click()
            .await?;

        // Compose.
        let composer = browser::wait_for_element(page, MESSAGE_INPUT, DEFAULT_ELEMENT_TIMEOUT).await?;
        composer.click().await?;

        match self.typing {
            TypingMode::Bulk => {
                set_reactive_text(page, MESSAGE_INPUT, &contact.processed_message).await?;
            }
            TypingMode::Typed => {
                let mut buf = [0u8; 4];
                for ch in contact.processed_message.chars() {
                    composer.type_str(ch.encode_utf8(&mut buf)).await?;
                    pacing::sleep_ms_between(KEYSTROKE_DELAY_MS.0, KEYSTROKE_DELAY_MS.1).await;
                }
            }
        }

        pacing::sleep_secs_between(PRE_SEND_DELAY_SECS.0, PRE_SEND_DELAY_SECS.1).await;

        browser::wait_for_element(page, SEND_BUTTON, DEFAULT_ELEMENT_TIMEOUT)
            .await?
            .click()
            .await?;

        let pause = pacing::jitter_range(INTER_CONTACT_DELAY_SECS.0, INTER_CONTACT_DELAY_SECS.1);
        tracing::debug!(pause, "inter-contact delay");
        tokio::time::sleep(Duration::from_secs(pause)).await;

        Ok(())
    }
}

#[async_trait]
impl ContactDispatch for Dispatcher {
    async fn dispatch(&self, contact: &Contact) -> DispatchOutcome {
        self.send_single_message(contact).await
    }
}

/// Liveness over the same page the dispatcher drives.
pub struct PageLiveness {
    page: Page,
}

impl PageLiveness {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl Liveness for PageLiveness {
    async fn is_live(&self) -> bool {
        browser::page_on_target(&self.page).await
    }
}

/// The search result entry whose label contains the phone number.
fn chat_result_selector(phone: &str) -> String {
    format!(r#"span[title*="{phone}"]"#)
}

/// Write `text` into the element and fire a bubbling `input` event so the
/// page's framework picks the change up.
async fn set_reactive_text(page: &Page, selector: &str, text: &str) -> Result<(), BrowserError> {
    let script = format!(
        "(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.textContent = {val};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()",
        sel = js_literal(selector),
        val = js_literal(text),
    );
    let result = page.evaluate(script).await?;
    match result.value() {
        Some(serde_json::Value::Bool(true)) => Ok(()),
        _ => Err(BrowserError::ElementVanished(selector.to_string())),
    }
}

/// Escape a string as a JavaScript double-quoted literal.
fn js_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_selector_embeds_the_phone() {
        assert_eq!(chat_result_selector("15551234567"), r#"span[title*="15551234567"]"#);
    }

    #[test]
    fn js_literal_escapes_quotes_and_newlines() {
        assert_eq!(js_literal(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(js_literal("a\nb"), r#""a\nb""#);
        assert_eq!(js_literal("back\\slash"), r#""back\\slash""#);
    }

    #[test]
    fn js_literal_escapes_control_and_separator_chars() {
        assert_eq!(js_literal("\u{2028}"), r#""\u2028""#);
        assert_eq!(js_literal("\t"), "\"\\u0009\"");
    }
}
