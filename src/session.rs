//! Session gating before an unattended scrape.
//!
//! The worker owns the session token: it writes the file during a successful
//! login and reuses it on later runs. This side only observes whether the file
//! exists and remembers the boolean outcome of the last login attempt through
//! an injected [`SessionStore`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::models::{WorkerEnv, WorkerInvocation};
use crate::worker::WorkerBridge;

/// Observe the persisted session and record login outcomes.
pub trait SessionStore {
    /// Whether a session token has been persisted by the worker.
    fn token_present(&self) -> bool;
    /// Remember whether the last login attempt established a session.
    fn record(&mut self, established: bool);
    fn is_established(&self) -> bool;
}

/// Session store backed by the worker's token file. Never writes the file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    established: bool,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            established: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn token_present(&self) -> bool {
        self.path.exists()
    }

    fn record(&mut self, established: bool) {
        self.established = established;
    }

    fn is_established(&self) -> bool {
        self.established
    }
}

/// Makes sure an authenticated session exists before scraping.
#[derive(Debug)]
pub struct SessionManager<S> {
    store: S,
    env: WorkerEnv,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: S, env: WorkerEnv) -> Self {
        Self { store, env }
    }

    pub fn has_credentials(&self) -> bool {
        self.env.has_credentials()
    }

    /// Outcome of the last [`ensure_session`](Self::ensure_session) call.
    pub fn is_established(&self) -> bool {
        self.store.is_established()
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Verify or establish a session through a `login-only` worker call.
    ///
    /// Returns `false` without touching the worker when no credentials are
    /// configured. Otherwise the worker decides: it reuses a valid token
    /// cheaply or opens a visible browser for an interactive login. Only a
    /// `{"success": true}` payload counts as an established session.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_session<W: WorkerBridge>(&mut self, worker: &W) -> bool {
        if !self.has_credentials() {
            warn!("No credentials provided; some profiles may require login");
            self.store.record(false);
            return false;
        }

        if self.store.token_present() {
            info!("Session token found; the worker will verify it");
        }
        info!("Ensuring login (a visible browser opens if interaction is needed)");

        let established = match worker.invoke(&WorkerInvocation::login(&self.env)).await {
            Ok(Value::Object(payload)) => {
                if payload.get("success").and_then(Value::as_bool) == Some(true) {
                    info!("Login verified or completed successfully");
                    true
                } else if let Some(e) = payload.get("error") {
                    error!(error = %e, "Login error reported by worker");
                    false
                } else {
                    warn!(?payload, "Login verification returned unexpected result");
                    false
                }
            }
            Ok(other) => {
                warn!(payload = %other, "Login verification returned unexpected result");
                false
            }
            Err(e) => {
                error!(error = %e, "Login invocation failed");
                false
            }
        };

        self.store.record(established);
        established
    }
}
