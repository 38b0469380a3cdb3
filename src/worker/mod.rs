//! The boundary to the out-of-process browser-automation worker.
//!
//! [`WorkerBridge`] is the only thing the session manager and the coordinator
//! know about the worker. The production transport is [`ProcessWorker`], which
//! spawns one child process per call and reads a JSON payload from its stdout;
//! tests substitute an in-memory fake.
//!
//! # Submodules
//!
//! - [`process`]: child-process transport with environment overlay and timeout
//! - [`extract`]: JSON payload recovery from mixed diagnostic output

pub mod extract;
pub mod process;

use serde_json::Value;

use crate::error::BridgeError;
use crate::models::WorkerInvocation;

pub use process::ProcessWorker;

/// Run one worker invocation to completion.
///
/// `Ok` always holds a JSON object or array. Every failure, including a
/// timeout or output with no recoverable payload, is an `Err`; callers must
/// never read a failure as an empty success. Implementations do not retry.
pub trait WorkerBridge {
    async fn invoke(&self, invocation: &WorkerInvocation) -> Result<Value, BridgeError>;
}
