//! Data models shared by the worker bridge, the coordinator and the exporter.
//!
//! This module defines:
//! - [`Mode`] and [`WorkerInvocation`]: one request to the automation worker
//! - [`WorkerEnv`]: the environment overlay handed to the worker process
//! - [`WorkerRecord`]: a classified row of worker output
//! - [`NormalizedProfileRecord`] and [`ResultSet`]: flat, exportable records
//!
//! The fixed export schema lives in [`PROFILE_FIELDS`]; every normalized record
//! carries each of those fields, using [`SENTINEL`] for data the worker never
//! supplied.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::targets::Target;

/// Placeholder for a field the worker did not supply.
pub const SENTINEL: &str = "N/A";

/// Column name carrying a row-level failure reported by the worker.
pub const ERROR_FIELD: &str = "error";

/// The fixed, ordered export schema.
pub const PROFILE_FIELDS: [&str; 20] = [
    "profile_url",
    "scraped_at",
    "name",
    "headline",
    "location",
    "about",
    "current_company",
    "current_position",
    "education",
    "top_skills",
    "connections",
    "all_skills",
    "skills_count",
    "email",
    "phone",
    "website",
    "profile_image_url",
    "pronouns",
    "all_experience",
    "all_education",
];

/// Schema fields the worker reports as lists.
pub const LIST_FIELDS: [&str; 2] = ["all_experience", "all_education"];

/// Environment variable names understood by the worker.
pub mod env_keys {
    pub const EMAIL: &str = "LINKEDIN_EMAIL";
    pub const PASSWORD: &str = "LINKEDIN_PASSWORD";
    pub const HEADLESS: &str = "HEADLESS";
    pub const TWOCAPTCHA: &str = "TWOCAPTCHA_API_KEY";
    pub const GEMINI: &str = "GEMINI_API_KEY";
}

/// What the worker is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Verify or establish a session, with a visible browser.
    LoginOnly,
    /// Scrape one or more targets.
    Scrape,
}

impl Mode {
    /// The first positional argument the worker expects for this mode.
    pub fn as_arg(self) -> &'static str {
        match self {
            Mode::LoginOnly => "login-only",
            Mode::Scrape => "scrape",
        }
    }
}

/// Credentials and behaviour flags passed to the worker through its environment.
///
/// The `Debug` impl redacts every secret so the overlay can be logged safely.
#[derive(Clone, Default)]
pub struct WorkerEnv {
    pub email: Option<String>,
    pub password: Option<String>,
    pub headless: bool,
    pub twocaptcha_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl WorkerEnv {
    /// `true` when both halves of the credential pair are set and non-empty.
    pub fn has_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.email) && set(&self.password)
    }

    /// Copy of this overlay with the headless flag replaced.
    pub fn with_headless(&self, headless: bool) -> Self {
        Self {
            headless,
            ..self.clone()
        }
    }

    /// Variables to overlay on the inherited environment.
    ///
    /// The credential pair is always present (empty when unset) so a stale value
    /// in the parent environment can never leak through. Solver keys are only
    /// set when configured; their absence disables that capability in the worker.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (env_keys::EMAIL, self.email.clone().unwrap_or_default()),
            (env_keys::PASSWORD, self.password.clone().unwrap_or_default()),
            (env_keys::HEADLESS, self.headless.to_string()),
        ];
        if let Some(key) = self.twocaptcha_api_key.as_ref().filter(|k| !k.is_empty()) {
            vars.push((env_keys::TWOCAPTCHA, key.clone()));
        }
        if let Some(key) = self.gemini_api_key.as_ref().filter(|k| !k.is_empty()) {
            vars.push((env_keys::GEMINI, key.clone()));
        }
        vars
    }
}

impl fmt::Debug for WorkerEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("WorkerEnv")
            .field("email", &redact(&self.email))
            .field("password", &redact(&self.password))
            .field("headless", &self.headless)
            .field("twocaptcha_api_key", &redact(&self.twocaptcha_api_key))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .finish()
    }
}

/// A single request to the worker. Built per call and never persisted.
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    pub mode: Mode,
    pub targets: Vec<Target>,
    /// Tab ceiling for multi-target scraping; `None` for sequential runs.
    pub max_tabs: Option<usize>,
    pub env: WorkerEnv,
}

impl WorkerInvocation {
    /// Login always runs with a visible browser.
    pub fn login(env: &WorkerEnv) -> Self {
        Self {
            mode: Mode::LoginOnly,
            targets: Vec::new(),
            max_tabs: None,
            env: env.with_headless(false),
        }
    }

    /// Sequential scrape of a single target.
    ///
    /// # Arguments
    ///
    /// * `target` - The profile to scrape
    /// * `env` - Credentials and flags, passed through unchanged
    pub fn scrape_one(target: Target, env: &WorkerEnv) -> Self {
        Self {
            mode: Mode::Scrape,
            targets: vec![target],
            max_tabs: None,
            env: env.clone(),
        }
    }

    /// Multi-tab scrape of several targets in one worker process.
    ///
    /// # Arguments
    ///
    /// * `targets` - Profiles to scrape, in submission order
    /// * `max_tabs` - Ceiling on concurrently open tabs; callers clamp it to
    ///   the target count
    /// * `env` - Credentials and flags, passed through unchanged
    pub fn scrape_many(targets: Vec<Target>, max_tabs: usize, env: &WorkerEnv) -> Self {
        Self {
            mode: Mode::Scrape,
            targets,
            max_tabs: Some(max_tabs),
            env: env.clone(),
        }
    }

    /// Command-line arguments appended after the worker's own program arguments.
    ///
    /// Only the mode and the targets ever appear here; secrets travel through
    /// [`WorkerEnv::vars`].
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.mode.as_arg().to_string()];
        if let Some(max_tabs) = self.max_tabs {
            args.push("--multi-tab".to_string());
            args.push(format!("--max-tabs={max_tabs}"));
        }
        args.extend(self.targets.iter().map(|t| t.as_str().to_string()));
        args
    }
}

/// Unvalidated field map produced by the worker for one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProfileRecord(pub Map<String, Value>);

impl RawProfileRecord {
    pub fn profile_url(&self) -> Option<&str> {
        self.0.get("profile_url").and_then(Value::as_str)
    }
}

/// One row of worker output, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRecord {
    /// A well-formed profile object.
    Profile(RawProfileRecord),
    /// An object carrying an `error` field instead of (or alongside) data.
    Failed {
        error: String,
        raw: RawProfileRecord,
    },
    /// Anything that is not a JSON object.
    Unparseable(Value),
}

impl WorkerRecord {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut map) => match map.remove(ERROR_FIELD) {
                None | Some(Value::Null) => WorkerRecord::Profile(RawProfileRecord(map)),
                Some(Value::String(error)) => WorkerRecord::Failed {
                    error,
                    raw: RawProfileRecord(map),
                },
                Some(other) => WorkerRecord::Failed {
                    error: other.to_string(),
                    raw: RawProfileRecord(map),
                },
            },
            other => WorkerRecord::Unparseable(other),
        }
    }

    /// Error-marked record for a target the worker returned nothing for.
    pub fn missing(target: &Target, error: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(
            "profile_url".to_string(),
            Value::String(target.as_str().to_string()),
        );
        WorkerRecord::Failed {
            error: error.into(),
            raw: RawProfileRecord(map),
        }
    }

    pub fn profile_url(&self) -> Option<&str> {
        match self {
            WorkerRecord::Profile(raw) | WorkerRecord::Failed { raw, .. } => raw.profile_url(),
            WorkerRecord::Unparseable(_) => None,
        }
    }

    /// Fill in `profile_url` when the worker left it out.
    pub fn attribute_to(&mut self, target: &Target) {
        if let WorkerRecord::Profile(raw) | WorkerRecord::Failed { raw, .. } = self {
            if raw.profile_url().is_none() {
                raw.0.insert(
                    "profile_url".to_string(),
                    Value::String(target.as_str().to_string()),
                );
            }
        }
    }
}

/// A flat record over the fixed schema plus any extra worker columns.
///
/// Every value is a JSON scalar; list and object values have already been
/// serialized to compact JSON text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedProfileRecord {
    pub(crate) fields: Map<String, Value>,
}

impl NormalizedProfileRecord {
    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Text form of a column for tabular export; absent columns yield the sentinel.
    pub fn cell(&self, column: &str) -> String {
        match self.fields.get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => SENTINEL.to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.fields.contains_key(ERROR_FIELD)
    }

    /// Columns outside the fixed schema, in key order.
    pub fn extra_columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .map(String::as_str)
            .filter(|k| !PROFILE_FIELDS.contains(k))
    }

    #[cfg(test)]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Records accumulated across one run, in append order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    records: Vec<NormalizedProfileRecord>,
}

impl ResultSet {
    /// Append a record. Records are never removed during a run.
    pub fn push(&mut self, record: NormalizedProfileRecord) {
        self.records.push(record);
    }

    /// Number of records, one per processed target.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &NormalizedProfileRecord> {
        self.records.iter()
    }

    /// Count of records without an `error` column.
    ///
    /// # Returns
    ///
    /// Records the worker returned profile data for; [`failed`](Self::failed)
    /// counts the rest.
    pub fn successful(&self) -> usize {
        self.records.iter().filter(|r| !r.is_error()).count()
    }

    /// Count of error-marked records.
    pub fn failed(&self) -> usize {
        self.len() - self.successful()
    }
}

impl Extend<NormalizedProfileRecord> for ResultSet {
    fn extend<I: IntoIterator<Item = NormalizedProfileRecord>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}
