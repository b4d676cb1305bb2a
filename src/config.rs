//! User settings
//!
//! Read from ~/.config/tunefetch/settings.json. The file is optional and
//! never written by tunefetch; every field has a default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::backend::{Quality, Source};
use crate::downloads::OrchestratorConfig;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:28999";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the music server
    pub server_url: String,
    /// Cookie header value of an existing server session
    pub session_cookie: Option<String>,
    /// Server-side subdirectory downloads land in
    pub download_dir: Option<String>,
    pub source: Source,
    pub quality: Quality,
    pub concurrency: usize,
    pub registry_capacity: usize,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_poll_failures: u32,
    pub settle_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_cookie: None,
            download_dir: None,
            source: Source::default(),
            quality: orchestrator.quality,
            concurrency: orchestrator.concurrency,
            registry_capacity: orchestrator.registry_capacity,
            poll_interval_ms: orchestrator.poll_interval.as_millis() as u64,
            max_poll_attempts: orchestrator.max_poll_attempts,
            max_poll_failures: orchestrator.max_poll_failures,
            settle_delay_ms: orchestrator.settle_delay.as_millis() as u64,
            request_timeout_secs: orchestrator.request_timeout.as_secs(),
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults if there is no file
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse settings in {:?}", path))
    }

    fn parse(contents: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(contents)?;
        if settings.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if settings.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        Ok(settings)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("tunefetch").join("settings.json"))
    }

    /// Apply command-line and environment overrides
    pub fn with_overrides(mut self, server: Option<String>, session: Option<String>) -> Self {
        if let Some(server) = server {
            self.server_url = server;
        }
        if session.is_some() {
            self.session_cookie = session;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Orchestration tunables derived from these settings
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.concurrency,
            registry_capacity: self.registry_capacity,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_attempts: self.max_poll_attempts,
            max_poll_failures: self.max_poll_failures,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            request_timeout: self.request_timeout(),
            quality: self.quality,
            target_dir: self.download_dir.clone(),
        }
    }
}
