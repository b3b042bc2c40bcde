//! Application configuration.
//!
//! Loaded from `~/.whatsblitz/config.toml` when present, otherwise built
//! from defaults. Step timeouts and pacing ranges stay constants in code;
//! this covers what varies between machines: where state lives, how to
//! reach the browser, and how text is injected.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State directory: spool, history log, PID file, logs.
    pub state_dir: PathBuf,
    /// Control endpoint of the automation daemon.
    pub gateway_url: String,
    /// The automation target.
    pub target_url: String,
    /// How message text reaches the composer.
    pub typing: TypingMode,
    /// Fallback pause (ms) for the recipient search results to populate.
    pub search_settle_ms: u64,
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BrowserSection {
    /// Run Chromium without a window. Headful by default: the WhatsApp
    /// Web session needs a QR scan on first run.
    pub headless: bool,
    /// Attach to an already-running Chromium over this DevTools URL
    /// instead of launching one.
    pub cdp_url: Option<String>,
    /// Explicit browser binary; otherwise PATH is probed.
    pub chrome_binary: Option<PathBuf>,
}

/// How the processed message is put into the composer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypingMode {
    /// Single content write plus a synthetic input event.
    #[default]
    Bulk,
    /// Character-by-character key events with randomized spacing.
    Typed,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            state_dir: home_dir.join(".whatsblitz"),
            gateway_url: "ws://127.0.0.1:8766".to_string(),
            target_url: "https://web.whatsapp.com".to_string(),
            typing: TypingMode::default(),
            search_settle_ms: 3000,
            browser: BrowserSection::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                home_dir.join(".whatsblitz").join("config.toml")
            }
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };

        config.state_dir = expand_tilde(config.state_dir);
        config.browser.chrome_binary = config.browser.chrome_binary.map(expand_tilde);
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = path.unwrap_or_else(|| self.state_dir.join("config.toml"));
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.db")
    }

    pub fn search_settle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.search_settle_ms)
    }
}

fn expand_tilde(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.target_url, "https://web.whatsapp.com");
        assert_eq!(config.search_settle_ms, 3000);
        assert_eq!(config.typing, TypingMode::Bulk);
        assert!(!config.browser.headless);
    }

    #[test]
    fn partial_file_fills_from_defaults() {
        let config: Config = toml::from_str("typing = \"typed\"\n").unwrap();
        assert_eq!(config.typing, TypingMode::Typed);
        assert_eq!(config.gateway_url, Config::default().gateway_url);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.search_settle_ms = 4500;
        config.browser.headless = true;
        config.save(Some(path.clone())).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.search_settle_ms, 4500);
        assert!(loaded.browser.headless);
    }

    #[test]
    fn tilde_paths_are_expanded() {
        let config: Config = toml::from_str("state_dir = \"~/blitz-state\"\n").unwrap();
        let expanded = expand_tilde(config.state_dir);
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
