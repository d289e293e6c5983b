//! RPC correlation: in-flight request ids mapped to single-shot completions.
//!
//! Each id is used by at most one outstanding call. Completing an entry
//! removes it; a response for an unknown id is ignored (the caller may have
//! given up before the response arrived). Completion order between distinct
//! calls follows the responses, nothing else.

use super::transport::CallError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// What a finished call yields: the response `result` or a structured error.
pub type CallOutcome = Result<Value, CallError>;

#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<CallOutcome>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight id and return the handle its outcome arrives on.
    pub fn register(&self, id: &str) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Complete the entry for `id`, if any. Unknown ids are ignored.
    pub fn complete(&self, id: &str, outcome: CallOutcome) {
        let entry = self.inner.lock().unwrap().remove(id);
        if let Some(tx) = entry {
            // Receiver may already be gone; nothing to do then.
            let _ = tx.send(outcome);
        }
    }

    /// Drop the entry for `id` without completing it (send failed before the
    /// request ever hit the wire).
    pub fn discard(&self, id: &str) {
        self.inner.lock().unwrap().remove(id);
    }

    /// Fail every in-flight call with the same error (socket closed, stop()).
    pub fn fail_all(&self, error: CallError) {
        let drained: Vec<_> = {
            let mut map = self.inner.lock().unwrap();
            map.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
