//! The scrape coordinator: session gate, dispatch, join, export.
//!
//! A run moves through
//!
//! ```text
//! Init -> EnsuringSession -> Aborted
//!                         -> Scraping -> Exporting -> Done
//! ```
//!
//! One target is scraped with a plain sequential call. Several targets go to
//! the worker in a single multi-tab invocation with a tab ceiling; the worker
//! bounds its own parallelism and this side never fans out processes.
//!
//! Multi-tab responses arrive in any order, so rows are joined back to the
//! submitted targets by their `profile_url`, never by position, and every
//! target ends up with exactly one record. Bridge failures are logged and
//! leave the batch empty; they never escape a run.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExportError;
use crate::models::{ResultSet, WorkerEnv, WorkerInvocation, WorkerRecord};
use crate::normalize::normalize;
use crate::outputs::csv;
use crate::session::{SessionManager, SessionStore};
use crate::targets::{Target, identity_key};
use crate::utils::truncate_for_log;
use crate::worker::WorkerBridge;

/// Error message for a submitted target the worker returned no row for.
pub const MISSING_RESULT: &str = "no result returned by worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    EnsuringSession,
    Aborted,
    Scraping,
    Exporting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::EnsuringSession => "ensuring_session",
            RunState::Aborted => "aborted",
            RunState::Scraping => "scraping",
            RunState::Exporting => "exporting",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Tab ceiling for multi-target runs; clamped to the target count.
    pub max_tabs: usize,
    /// Scrape logged out instead of aborting when no credentials are configured.
    pub allow_anonymous: bool,
    /// Export destination; `None` stops the run after scraping.
    pub output: Option<PathBuf>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_tabs: 3,
            allow_anonymous: false,
            output: None,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub records: ResultSet,
    /// Where the records were written, if anything was.
    pub exported: Option<PathBuf>,
}

pub struct ScrapeCoordinator<W, S> {
    worker: W,
    session: SessionManager<S>,
    env: WorkerEnv,
    options: CoordinatorOptions,
    state: RunState,
}

impl<W: WorkerBridge, S: SessionStore> ScrapeCoordinator<W, S> {
    pub fn new(
        worker: W,
        session: SessionManager<S>,
        env: WorkerEnv,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            worker,
            session,
            env,
            options,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    #[cfg(test)]
    pub fn worker(&self) -> &W {
        &self.worker
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "Run state change");
        self.state = next;
    }

    /// Scrape `targets` (the first `max_targets` of them, if given) and export.
    /// A cap of zero means no cap.
    ///
    /// Always returns the accumulated records, possibly empty. Only an export
    /// failure is an error.
    #[instrument(level = "info", skip_all, fields(targets = targets.len(), ?max_targets))]
    pub async fn run(
        &mut self,
        mut targets: Vec<Target>,
        max_targets: Option<usize>,
    ) -> Result<RunReport, ExportError> {
        self.transition(RunState::Init);
        if let Some(max) = max_targets.filter(|&max| max > 0) {
            targets.truncate(max);
        }

        self.transition(RunState::EnsuringSession);
        info!("Phase 1: ensuring login");
        if !self.session_ready().await {
            error!("Login failed or not verified; cannot proceed with scraping");
            self.transition(RunState::Aborted);
            return Ok(RunReport {
                records: ResultSet::default(),
                exported: None,
            });
        }

        self.transition(RunState::Scraping);
        info!(
            count = targets.len(),
            headless = self.env.headless,
            logged_in = self.session.is_established(),
            "Phase 2: scraping profiles"
        );
        let records = self.scrape(&targets).await;
        info!(
            successful = records.successful(),
            failed = records.failed(),
            "Scraping completed"
        );

        let Some(output) = self.options.output.clone() else {
            self.transition(RunState::Done);
            return Ok(RunReport {
                records,
                exported: None,
            });
        };

        self.transition(RunState::Exporting);
        info!("Phase 3: exporting to CSV");
        let exported = csv::export(&records, &output).await?;
        self.transition(RunState::Done);
        Ok(RunReport { records, exported })
    }

    async fn session_ready(&mut self) -> bool {
        if self.options.allow_anonymous && !self.session.has_credentials() {
            warn!("No credentials configured; scraping without login");
            return true;
        }
        self.session.ensure_session(&self.worker).await
    }

    async fn scrape(&self, targets: &[Target]) -> ResultSet {
        let mut records = ResultSet::default();
        let t0 = Instant::now();

        let invocation = match targets {
            [] => {
                warn!("No targets to scrape");
                return records;
            }
            [single] => {
                info!(url = %single, "Single profile; using sequential scraping");
                WorkerInvocation::scrape_one(single.clone(), &self.env)
            }
            many => {
                let max_tabs = self.options.max_tabs.clamp(1, many.len());
                info!(count = many.len(), max_tabs, "Multiple profiles; using multi-tab scraping");
                WorkerInvocation::scrape_many(many.to_vec(), max_tabs, &self.env)
            }
        };

        match self.worker.invoke(&invocation).await {
            Ok(payload) => {
                if let Some(rows) = rows_from(payload) {
                    for row in join_by_key(targets, rows) {
                        records.push(normalize(row));
                    }
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    elapsed_ms = t0.elapsed().as_millis(),
                    "Scrape invocation failed; no profiles collected for this batch"
                );
            }
        }
        records
    }
}

/// Split a worker payload into rows.
///
/// A top-level error object that names no profile is a whole-invocation
/// failure and yields `None`.
fn rows_from(payload: Value) -> Option<Vec<WorkerRecord>> {
    match payload {
        Value::Array(items) => Some(items.into_iter().map(WorkerRecord::classify).collect()),
        object @ Value::Object(_) => {
            let record = WorkerRecord::classify(object);
            match &record {
                WorkerRecord::Failed { error, raw } if raw.profile_url().is_none() => {
                    error!(%error, "Worker reported an error for the whole invocation");
                    None
                }
                _ => Some(vec![record]),
            }
        }
        other => Some(vec![WorkerRecord::Unparseable(other)]),
    }
}

/// Line rows up with submitted targets, one record per target.
///
/// A lone target takes the first object row the worker returned, whatever
/// `profile_url` it carries, since the worker may report a redirected or
/// canonical URL. Several targets are matched by [`identity_key`]; rows that
/// are not objects, repeat a target, or match no target are dropped.
/// Targets left without a row get an error record.
fn join_by_key(targets: &[Target], rows: Vec<WorkerRecord>) -> Vec<WorkerRecord> {
    match targets {
        [] => Vec::new(),
        [single] => vec![attribute_single(single, rows)],
        many => join_many(many, rows),
    }
}

fn attribute_single(target: &Target, rows: Vec<WorkerRecord>) -> WorkerRecord {
    let total = rows.len();
    let Some(mut row) = rows
        .into_iter()
        .find(|row| !matches!(row, WorkerRecord::Unparseable(_)))
    else {
        warn!(url = %target, rows = total, "Worker returned no profile object for target");
        return WorkerRecord::missing(target, MISSING_RESULT);
    };
    if total > 1 {
        warn!(url = %target, dropped = total - 1, "Ignoring extra worker rows for a single target");
    }
    if let Some(reported) = row.profile_url() {
        if identity_key(reported) != target.key() {
            info!(url = %target, %reported, "Worker reported a different profile URL");
        }
    }
    row.attribute_to(target);
    row
}

fn join_many(targets: &[Target], rows: Vec<WorkerRecord>) -> Vec<WorkerRecord> {
    let wanted: HashMap<String, usize> = targets
        .iter()
        .enumerate()
        .map(|(idx, t)| (t.key(), idx))
        .collect();
    let mut slots: Vec<Option<WorkerRecord>> = vec![None; targets.len()];

    for row in rows {
        if let WorkerRecord::Unparseable(value) = &row {
            warn!(row = %truncate_for_log(&value.to_string(), 200), "Dropping non-object worker row");
            continue;
        }
        let slot = row
            .profile_url()
            .and_then(|url| wanted.get(&identity_key(url)))
            .copied();
        match slot {
            Some(idx) if slots[idx].is_none() => slots[idx] = Some(row),
            Some(idx) => warn!(url = %targets[idx], "Dropping duplicate worker row for target"),
            None => warn!(
                profile_url = ?row.profile_url(),
                "Dropping worker row that matches no submitted target"
            ),
        }
    }

    slots
        .into_iter()
        .zip(targets)
        .map(|(slot, target)| {
            slot.unwrap_or_else(|| {
                warn!(url = %target, "Worker returned no row for target");
                WorkerRecord::missing(target, MISSING_RESULT)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::models::{Mode, SENTINEL};
    use crate::session::tests::MemorySessionStore;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    type Reply = Box<dyn Fn(&WorkerInvocation) -> Result<Value, BridgeError>>;

    /// Worker fake: login always succeeds, scrape calls use `scrape`.
    struct FakeWorker {
        scrape: Reply,
        calls: Mutex<Vec<WorkerInvocation>>,
    }

    impl FakeWorker {
        fn new(scrape: impl Fn(&WorkerInvocation) -> Result<Value, BridgeError> + 'static) -> Self {
            Self {
                scrape: Box::new(scrape),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Echoes one profile per submitted target, in reverse order.
        fn echo() -> Self {
            Self::new(|inv| {
                let rows: Vec<Value> = inv
                    .targets
                    .iter()
                    .rev()
                    .map(|t| json!({"profile_url": t.as_str(), "name": t.as_str().rsplit('/').next()}))
                    .collect();
                Ok(Value::Array(rows))
            })
        }

        fn calls(&self) -> Vec<WorkerInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl WorkerBridge for FakeWorker {
        async fn invoke(&self, invocation: &WorkerInvocation) -> Result<Value, BridgeError> {
            self.calls.lock().unwrap().push(invocation.clone());
            match invocation.mode {
                Mode::LoginOnly => Ok(json!({"success": true})),
                Mode::Scrape => (self.scrape)(invocation),
            }
        }
    }

    fn targets(n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| Target::parse(&format!("https://www.linkedin.com/in/p{i}"), "linkedin.com").unwrap())
            .collect()
    }

    fn env(with_credentials: bool) -> WorkerEnv {
        WorkerEnv {
            email: with_credentials.then(|| "me@example.com".to_string()),
            password: with_credentials.then(|| "pw".to_string()),
            headless: true,
            ..Default::default()
        }
    }

    fn coordinator(
        worker: FakeWorker,
        with_credentials: bool,
        options: CoordinatorOptions,
    ) -> ScrapeCoordinator<FakeWorker, MemorySessionStore> {
        let env = env(with_credentials);
        let session = SessionManager::new(MemorySessionStore::default(), env.clone());
        ScrapeCoordinator::new(worker, session, env, options)
    }

    #[tokio::test]
    async fn test_single_target_scenario() {
        let worker = FakeWorker::new(|_| {
            Ok(json!({"profile_url": "https://www.linkedin.com/in/x", "name": "A"}))
        });
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let target = Target::parse("https://www.linkedin.com/in/x", "linkedin.com").unwrap();

        let report = coord.run(vec![target], None).await.unwrap();
        assert_eq!(report.records.len(), 1);
        let record = report.records.iter().next().unwrap();
        assert_eq!(record.cell("name"), "A");
        assert_eq!(record.cell("headline"), SENTINEL);
        assert_eq!(record.cell("email"), SENTINEL);
        assert_eq!(coord.state(), RunState::Done);

        let calls = coord.worker().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].mode, Mode::LoginOnly);
        assert_eq!(calls[1].args(), vec!["scrape", "https://www.linkedin.com/in/x"]);
        assert!(calls[1].env.headless);
    }

    #[tokio::test]
    async fn test_multi_target_single_invocation_with_ceiling() {
        let mut coord = coordinator(FakeWorker::echo(), true, CoordinatorOptions::default());
        let report = coord.run(targets(5), None).await.unwrap();

        assert_eq!(report.records.len(), 5);
        let calls = coord.worker().calls();
        let scrapes: Vec<_> = calls.iter().filter(|c| c.mode == Mode::Scrape).collect();
        assert_eq!(scrapes.len(), 1);
        assert_eq!(scrapes[0].max_tabs, Some(3));
        assert_eq!(scrapes[0].targets.len(), 5);
    }

    #[tokio::test]
    async fn test_tab_ceiling_never_exceeds_target_count() {
        let mut coord = coordinator(FakeWorker::echo(), true, CoordinatorOptions::default());
        coord.run(targets(2), None).await.unwrap();
        let calls = coord.worker().calls();
        assert_eq!(calls.last().unwrap().max_tabs, Some(2));
    }

    #[tokio::test]
    async fn test_results_joined_by_profile_url_not_position() {
        let mut coord = coordinator(FakeWorker::echo(), true, CoordinatorOptions::default());
        let submitted = targets(3);
        let report = coord.run(submitted.clone(), None).await.unwrap();

        let urls: Vec<String> = report.records.iter().map(|r| r.cell("profile_url")).collect();
        let expected: Vec<String> = submitted.iter().map(|t| t.as_str().to_string()).collect();
        assert_eq!(urls, expected);
        assert_eq!(report.records.iter().next().unwrap().cell("name"), "p0");
    }

    #[tokio::test]
    async fn test_truncation_takes_front_of_list() {
        let mut coord = coordinator(FakeWorker::echo(), true, CoordinatorOptions::default());
        let report = coord.run(targets(10), Some(4)).await.unwrap();

        assert_eq!(report.records.len(), 4);
        let scrape = coord.worker().calls().pop().unwrap();
        assert_eq!(scrape.targets, targets(4));
    }

    #[tokio::test]
    async fn test_no_credentials_aborts_without_scraping() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("profiles.csv");
        let options = CoordinatorOptions {
            output: Some(output.clone()),
            ..Default::default()
        };
        let mut coord = coordinator(FakeWorker::echo(), false, options);

        let report = coord.run(targets(5), None).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.exported, None);
        assert_eq!(coord.state(), RunState::Aborted);
        assert!(coord.worker().calls().is_empty());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_anonymous_mode_scrapes_without_login() {
        let options = CoordinatorOptions {
            allow_anonymous: true,
            ..Default::default()
        };
        let mut coord = coordinator(FakeWorker::echo(), false, options);
        let report = coord.run(targets(2), None).await.unwrap();

        assert_eq!(report.records.len(), 2);
        assert!(coord.worker().calls().iter().all(|c| c.mode == Mode::Scrape));
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_result_set() {
        let worker = FakeWorker::new(|_| Err(BridgeError::Timeout(Duration::from_secs(300))));
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());

        let report = coord.run(targets(3), None).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(coord.state(), RunState::Done);
    }

    #[tokio::test]
    async fn test_row_errors_and_missing_rows_keep_one_row_per_target() {
        let worker = FakeWorker::new(|inv| {
            Ok(json!([
                {"profile_url": inv.targets[1].as_str(), "error": "Profile unavailable"},
                {"profile_url": inv.targets[0].as_str(), "name": "First"},
            ]))
        });
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(3), None).await.unwrap();

        let rows: Vec<_> = report.records.iter().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].cell("name"), "First");
        assert_eq!(rows[1].cell("error"), "Profile unavailable");
        assert_eq!(rows[2].cell("error"), MISSING_RESULT);
        assert_eq!(report.records.successful(), 1);
        assert_eq!(report.records.failed(), 2);
    }

    #[tokio::test]
    async fn test_single_target_row_without_url_is_attributed() {
        let worker = FakeWorker::new(|_| Ok(json!({"name": "Anon"})));
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(1), None).await.unwrap();

        let record = report.records.iter().next().unwrap();
        assert_eq!(record.cell("profile_url"), "https://www.linkedin.com/in/p0");
        assert_eq!(record.cell("name"), "Anon");
    }

    #[tokio::test]
    async fn test_invocation_level_error_object_collects_nothing() {
        let worker = FakeWorker::new(|_| Ok(json!({"error": "Browser crashed"})));
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(3), None).await.unwrap();
        assert!(report.records.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_rows_are_dropped() {
        let worker = FakeWorker::new(|inv| {
            Ok(json!([
                {"profile_url": "https://www.linkedin.com/in/someone-else", "name": "Extra"},
                {"profile_url": inv.targets[0].as_str(), "name": "Zero"},
                {"profile_url": inv.targets[1].as_str(), "name": "One"},
            ]))
        });
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(2), None).await.unwrap();

        let names: Vec<String> = report.records.iter().map(|r| r.cell("name")).collect();
        assert_eq!(names, vec!["Zero", "One"]);
    }

    #[tokio::test]
    async fn test_single_target_keeps_redirected_profile() {
        let worker = FakeWorker::new(|_| {
            Ok(json!({"profile_url": "https://www.linkedin.com/in/jane-doe-8a1b2c", "name": "Jane"}))
        });
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let target = Target::parse("https://www.linkedin.com/in/janedoe", "linkedin.com").unwrap();

        let report = coord.run(vec![target], None).await.unwrap();
        assert_eq!(report.records.len(), 1);
        let record = report.records.iter().next().unwrap();
        assert_eq!(record.cell("name"), "Jane");
        assert_eq!(record.cell("profile_url"), "https://www.linkedin.com/in/jane-doe-8a1b2c");
        assert!(!record.is_error());
    }

    #[tokio::test]
    async fn test_single_target_takes_first_object_row() {
        let worker = FakeWorker::new(|_| Ok(json!([null, {"name": "First"}, {"name": "Second"}])));
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(1), None).await.unwrap();

        assert_eq!(report.records.len(), 1);
        let record = report.records.iter().next().unwrap();
        assert_eq!(record.cell("name"), "First");
        assert_eq!(record.cell("profile_url"), "https://www.linkedin.com/in/p0");
    }

    #[tokio::test]
    async fn test_single_target_without_object_rows_gets_error_record() {
        let worker = FakeWorker::new(|_| Ok(json!([null, 42])));
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let report = coord.run(targets(1), None).await.unwrap();

        assert_eq!(report.records.len(), 1);
        let record = report.records.iter().next().unwrap();
        assert_eq!(record.cell("error"), MISSING_RESULT);
        assert_eq!(record.cell("profile_url"), "https://www.linkedin.com/in/p0");
    }

    #[tokio::test]
    async fn test_duplicate_and_null_rows_keep_one_record_per_target() {
        let worker = FakeWorker::new(|inv| {
            Ok(json!([
                {"profile_url": inv.targets[0].as_str(), "name": "A"},
                {"profile_url": format!("{}/", inv.targets[0]), "name": "A again"},
                {"profile_url": inv.targets[1].as_str(), "name": "B"},
                null,
            ]))
        });
        let mut coord = coordinator(worker, true, CoordinatorOptions::default());
        let submitted = targets(2);
        let report = coord.run(submitted.clone(), None).await.unwrap();

        assert_eq!(report.records.len(), submitted.len());
        let names: Vec<String> = report.records.iter().map(|r| r.cell("name")).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(report.records.failed(), 0);
    }

    #[tokio::test]
    async fn test_record_count_matches_targets_for_messy_output() {
        let replies: [fn(&WorkerInvocation) -> Result<Value, BridgeError>; 4] = [
            |_| Ok(json!([])),
            |_| Ok(json!([null, "text", 3])),
            |inv| Ok(json!([{"profile_url": inv.targets[2].as_str()}, {"profile_url": inv.targets[2].as_str()}])),
            |_| Ok(json!([{"name": "no url"}, {"profile_url": "https://www.linkedin.com/in/elsewhere"}])),
        ];
        for reply in replies {
            let mut coord = coordinator(FakeWorker::new(reply), true, CoordinatorOptions::default());
            let report = coord.run(targets(4), None).await.unwrap();
            assert_eq!(report.records.len(), 4);
        }
    }

    #[tokio::test]
    async fn test_zero_cap_means_no_cap() {
        let mut coord = coordinator(FakeWorker::echo(), true, CoordinatorOptions::default());
        let report = coord.run(targets(3), Some(0)).await.unwrap();
        assert_eq!(report.records.len(), 3);
    }

    #[tokio::test]
    async fn test_run_exports_to_configured_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out/profiles.csv");
        let options = CoordinatorOptions {
            output: Some(output.clone()),
            ..Default::default()
        };
        let mut coord = coordinator(FakeWorker::echo(), true, options);

        let report = coord.run(targets(2), None).await.unwrap();
        assert_eq!(report.exported, Some(output.clone()));
        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), 3);
    }
}
