use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::models::QueryResult;
use crate::utils::{ApiError, ErrorKind};

/// Terminal state of an in-flight execution, shared with followers.
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    Ready(QueryResult),
    Failed { code: String, message: String },
}

impl FlightOutcome {
    pub fn from_error(err: &ApiError) -> Self {
        FlightOutcome::Failed { code: err.code().to_string(), message: err.message.clone() }
    }

    pub fn into_result(self) -> Result<QueryResult, ApiError> {
        match self {
            FlightOutcome::Ready(result) => Ok(result),
            FlightOutcome::Failed { code, message } => {
                Err(ApiError::with_kind(ErrorKind::from_code(&code), message))
            }
        }
    }
}

/// Role assigned to a caller for one fingerprint.
pub enum Flight<'a> {
    Leader(FlightGuard<'a>),
    Follower(watch::Receiver<Option<FlightOutcome>>),
}

/// Leadership token for one fingerprint.
///
/// Dropping the guard without calling [`FlightGuard::finish`] retires the
/// entry and closes the channel, so a panicking or cancelled leader leaves
/// no stuck entry behind and followers fall back per policy instead of
/// waiting out the full window.
pub struct FlightGuard<'a> {
    map: &'a InflightMap,
    key: String,
    tx: Option<watch::Sender<Option<FlightOutcome>>>,
}

impl FlightGuard<'_> {
    /// Publishes the leader's outcome and retires the entry. Followers keep
    /// their receiver clones, so the send is observed even after removal.
    pub fn finish(mut self, outcome: FlightOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(outcome));
            self.map.remove(&self.key);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Leader went away without publishing.
        if self.tx.take().is_some() {
            self.map.remove(&self.key);
        }
    }
}

/// In-process single-flight map: fingerprint -> pending outcome.
///
/// The mutex is held only across install/lookup; awaiting the outcome
/// happens on the watch channel outside the lock. Semantics match the
/// distributed lock protocol.
#[derive(Default)]
pub struct InflightMap {
    inner: Mutex<HashMap<String, watch::Receiver<Option<FlightOutcome>>>>,
}

impl InflightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// First arriver installs the pending entry and leads; everyone else
    /// gets a receiver to await.
    pub fn begin(&self, key: &str) -> Flight<'_> {
        let mut inner = self.inner.lock().expect("inflight map poisoned");
        if let Some(rx) = inner.get(key) {
            return Flight::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        inner.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard { map: self, key: key.to_string(), tx: Some(tx) })
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().expect("inflight map poisoned");
        inner.remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("inflight map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
