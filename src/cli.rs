//! Command-line interface definitions for the profile harvester.
//!
//! Secrets can only be supplied through environment variables; they are
//! hidden from `--help` output and never accepted from the config file.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the profile harvester.
///
/// # Examples
///
/// ```sh
/// # Harvest every profile listed in profile_urls.txt
/// profile_harvester
///
/// # First 10 profiles from a custom list, written to a custom CSV
/// profile_harvester urls.txt -n 10 -o out/profiles.csv
///
/// # Watch the browser while scraping
/// profile_harvester --no-headless -v
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// File containing profile URLs, one per line
    #[arg(default_value = "profile_urls.txt")]
    pub input_file: PathBuf,

    /// Output CSV file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum number of profiles to scrape
    #[arg(short = 'n', long = "profiles")]
    pub max_profiles: Option<usize>,

    /// Run the scraping browser headless (default)
    #[arg(long, overrides_with = "no_headless")]
    pub headless: bool,

    /// Run the scraping browser with a visible window
    #[arg(long, overrides_with = "headless")]
    pub no_headless: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Test mode: scrape only the first few profiles
    #[arg(long)]
    pub test: bool,

    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also write logs to scraper.log in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "LINKEDIN_EMAIL", hide = true, hide_env_values = true)]
    pub email: Option<String>,

    #[arg(long, env = "LINKEDIN_PASSWORD", hide = true, hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "TWOCAPTCHA_API_KEY", hide = true, hide_env_values = true)]
    pub twocaptcha_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide = true, hide_env_values = true)]
    pub gemini_api_key: Option<String>,
}

impl Cli {
    /// `Some(false)` for `--no-headless`, `Some(true)` for `--headless`, else `None`.
    pub fn headless_override(&self) -> Option<bool> {
        if self.no_headless {
            Some(false)
        } else if self.headless {
            Some(true)
        } else {
            None
        }
    }
}
