//! Runtime settings.
//!
//! Non-secret settings come from an optional YAML file (`--config`), then CLI
//! flags override them. Secrets are never read from the file: credentials and
//! solver keys arrive through the environment via [`crate::cli::Cli`].
//!
//! ```yaml
//! worker_program: node
//! worker_args: ["puppeteer_scraper.js"]
//! session_file: .linkedin_cookies.json
//! timeout_secs: 300
//! max_tabs: 3
//! allow_anonymous: false
//! output_path: output/linkedin_profiles.csv
//! log_dir: logs
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::fs;
use tracing::{debug, instrument};

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::models::WorkerEnv;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Interpreter or executable that runs the worker.
    pub worker_program: String,
    /// Arguments placed before the mode, usually the worker script path.
    pub worker_args: Vec<String>,
    /// Session-token file owned by the worker; only existence-checked here.
    pub session_file: PathBuf,
    /// Hard upper bound on a single worker invocation.
    pub timeout_secs: u64,
    pub preflight_timeout_secs: u64,
    /// Tab ceiling for multi-target runs.
    pub max_tabs: usize,
    /// Hosts outside this domain are dropped from the target list.
    pub expected_host: String,
    /// Scrape logged out when no credentials are configured instead of aborting.
    pub allow_anonymous: bool,
    pub output_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub max_profiles: Option<usize>,
    pub test_mode_limit: usize,
    pub headless: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_program: "node".to_string(),
            worker_args: vec!["puppeteer_scraper.js".to_string()],
            session_file: PathBuf::from(".linkedin_cookies.json"),
            timeout_secs: 300,
            preflight_timeout_secs: 5,
            max_tabs: 3,
            expected_host: "linkedin.com".to_string(),
            allow_anonymous: false,
            output_path: PathBuf::from("output/linkedin_profiles.csv"),
            log_dir: None,
            max_profiles: None,
            test_mode_limit: 5,
            headless: true,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no file is given.
    #[instrument(level = "info", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let settings = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), ?settings, "Loaded configuration");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to a map.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply CLI overrides. `--test` wins over `-n`, and a cap of zero means
    /// no cap.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(output) = &cli.output {
            self.output_path = output.clone();
        }
        if let Some(dir) = &cli.log_dir {
            self.log_dir = Some(dir.clone());
        }
        if let Some(headless) = cli.headless_override() {
            self.headless = headless;
        }
        if let Some(max) = cli.max_profiles {
            self.max_profiles = Some(max);
        }
        if cli.test {
            self.max_profiles = Some(self.test_mode_limit);
        }
        self.max_profiles = self.max_profiles.filter(|&max| max > 0);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_secs(self.preflight_timeout_secs)
    }

    /// Environment overlay for scrape invocations.
    pub fn worker_env(&self, cli: &Cli) -> WorkerEnv {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        WorkerEnv {
            email: non_empty(&cli.email),
            password: non_empty(&cli.password),
            headless: self.headless,
            twocaptcha_api_key: non_empty(&cli.twocaptcha_api_key),
            gemini_api_key: non_empty(&cli.gemini_api_key),
        }
    }
}
