//! Fan one user action out to the selected robots.
//!
//! A dispatch call resolves the selection against a connectivity snapshot,
//! sends the action to every online target concurrently, waits for every
//! send to settle, and reports one aggregated summary. Offline targets are
//! reported but never sent to. Individual failures are logged; the user
//! sees a single notice per call.
//!
//! Sends have no timeout and are not retried. Connectivity comes from the
//! snapshot handed in by the caller, which may be stale by the time the
//! send happens.

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::model::CatalogKind;
use crate::notice::{Notice, Notifier};
use crate::selection::SelectionState;
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

// ────────────────────────────────────────────────────────────────────────────
// Targets and transport
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// A robot as the device registry last saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub serial: String,
    pub connectivity: Connectivity,
}

impl DispatchTarget {
    pub fn online(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            connectivity: Connectivity::Online,
        }
    }

    pub fn offline(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            connectivity: Connectivity::Offline,
        }
    }
}

/// Connectivity of known robots at the moment of dispatch.
#[derive(Debug, Clone, Default)]
pub struct ConnectivitySnapshot {
    states: HashMap<String, Connectivity>,
}

impl ConnectivitySnapshot {
    /// Robots missing from the snapshot count as offline.
    pub fn get(&self, serial: &str) -> Connectivity {
        self.states
            .get(serial)
            .copied()
            .unwrap_or(Connectivity::Offline)
    }

    pub fn set(&mut self, serial: impl Into<String>, connectivity: Connectivity) {
        self.states.insert(serial.into(), connectivity);
    }
}

impl FromIterator<DispatchTarget> for ConnectivitySnapshot {
    fn from_iter<I: IntoIterator<Item = DispatchTarget>>(iter: I) -> Self {
        Self {
            states: iter
                .into_iter()
                .map(|t| (t.serial, t.connectivity))
                .collect(),
        }
    }
}

/// Sends one command to one robot. `Ok` carries a detail string for the
/// diagnostics log, `Err` the failure reason.
pub trait Transport: Sync {
    fn send(&self, action_code: &str, serial: &str, dispatch_type: CatalogKind) -> Result<String, String>;
}

impl<F> Transport for F
where
    F: Fn(&str, &str, CatalogKind) -> Result<String, String> + Sync,
{
    fn send(&self, action_code: &str, serial: &str, dispatch_type: CatalogKind) -> Result<String, String> {
        self(action_code, serial, dispatch_type)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Result of one attempted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub serial: String,
    pub outcome: Outcome,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchClass {
    AllSucceeded,
    AllFailed,
    PartialSuccess,
}

impl DispatchClass {
    pub fn classify(succeeded: usize, failed: usize) -> Self {
        if failed == 0 {
            DispatchClass::AllSucceeded
        } else if succeeded == 0 {
            DispatchClass::AllFailed
        } else {
            DispatchClass::PartialSuccess
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub action_code: String,
    pub class: DispatchClass,
    pub succeeded: usize,
    pub failed: usize,
    /// Selected robots that were skipped because they were offline.
    pub offline: Vec<String>,
    /// One entry per attempted robot, in selection order.
    pub results: Vec<DispatchResult>,
}

impl DispatchSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    /// The one user-facing notice for this call.
    pub fn notice(&self) -> Notice {
        let skipped = if self.offline.is_empty() {
            String::new()
        } else {
            format!("; skipped offline: {}", self.offline.join(", "))
        };
        match self.class {
            DispatchClass::AllSucceeded => {
                let msg = format!(
                    "Sent `{}` to {} robot(s){}",
                    self.action_code, self.succeeded, skipped
                );
                if self.offline.is_empty() {
                    Notice::info(msg)
                } else {
                    Notice::warning(msg)
                }
            }
            DispatchClass::PartialSuccess => Notice::warning(format!(
                "`{}` reached {} of {} robot(s), {} failed{}",
                self.action_code,
                self.succeeded,
                self.attempted(),
                self.failed,
                skipped
            )),
            DispatchClass::AllFailed => Notice::error(format!(
                "`{}` failed on all {} robot(s){}",
                self.action_code, self.failed, skipped
            )),
        }
    }
}

/// Notice for a call rejected before anything was sent.
pub fn preflight_notice(err: &DispatchError) -> Notice {
    Notice::warning(match err {
        DispatchError::NoTargetsSelected => "No robots selected".to_string(),
        DispatchError::AllTargetsOffline { offline } => {
            format!("All selected robots are offline: {}", offline.join(", "))
        }
        DispatchError::Busy => "Still sending the previous command".to_string(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a dispatch call on one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Dispatching,
    Succeeded,
    Failed,
    PartiallySucceeded,
}

impl From<DispatchClass> for DispatchPhase {
    fn from(class: DispatchClass) -> Self {
        match class {
            DispatchClass::AllSucceeded => DispatchPhase::Succeeded,
            DispatchClass::AllFailed => DispatchPhase::Failed,
            DispatchClass::PartialSuccess => DispatchPhase::PartiallySucceeded,
        }
    }
}

/// Sends actions to selected robots; one instance per UI surface.
pub struct CommandDispatcher {
    pool: rayon::ThreadPool,
    sending: AtomicBool,
    phase: Mutex<DispatchPhase>,
    last_phase: Mutex<Option<DispatchPhase>>,
}

/// Returns the dispatcher to `Idle` and clears the sending flag on exit.
struct SendingGuard<'a>(&'a CommandDispatcher);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(DispatchPhase::Idle);
        self.0.sending.store(false, Ordering::Release);
    }
}

impl CommandDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency.max(1))
            .thread_name(|i| format!("blocklink-dispatch-{}", i))
            .build()?;
        Ok(Self {
            pool,
            sending: AtomicBool::new(false),
            phase: Mutex::new(DispatchPhase::Idle),
            last_phase: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> DispatchPhase {
        self.phase.lock().map(|p| *p).unwrap_or(DispatchPhase::Idle)
    }

    /// Terminal phase of the most recent call, if any.
    pub fn last_phase(&self) -> Option<DispatchPhase> {
        self.last_phase.lock().ok().and_then(|p| *p)
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: DispatchPhase) {
        if let Ok(mut p) = self.phase.lock() {
            *p = phase;
        }
        if !matches!(phase, DispatchPhase::Idle | DispatchPhase::Dispatching) {
            if let Ok(mut last) = self.last_phase.lock() {
                *last = Some(phase);
            }
        }
    }

    /// Send `action_code` to every selected robot that is online.
    ///
    /// Exactly one notice reaches `notifier` per call, whatever the result.
    /// A call made while another is in flight on this dispatcher fails with
    /// [`DispatchError::Busy`].
    pub fn dispatch(
        &self,
        action_code: &str,
        dispatch_type: CatalogKind,
        selection: &SelectionState,
        snapshot: &ConnectivitySnapshot,
        transport: &dyn Transport,
        notifier: &dyn Notifier,
    ) -> Result<DispatchSummary, DispatchError> {
        let result = self.dispatch_inner(action_code, dispatch_type, selection, snapshot, transport);
        match &result {
            Ok(summary) => notifier.notify(summary.notice()),
            Err(err) => notifier.notify(preflight_notice(err)),
        }
        result
    }

    fn dispatch_inner(
        &self,
        action_code: &str,
        dispatch_type: CatalogKind,
        selection: &SelectionState,
        snapshot: &ConnectivitySnapshot,
        transport: &dyn Transport,
    ) -> Result<DispatchSummary, DispatchError> {
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DispatchError::Busy);
        }
        let _guard = SendingGuard(self);

        let targets = selection.targets();
        if targets.is_empty() {
            self.set_phase(DispatchPhase::Failed);
            return Err(DispatchError::NoTargetsSelected);
        }

        let (online, offline): (Vec<String>, Vec<String>) = targets
            .into_iter()
            .partition(|serial| snapshot.get(serial) == Connectivity::Online);
        for serial in &offline {
            tracing::warn!(%serial, action = action_code, "target offline, not sent");
        }
        if online.is_empty() {
            self.set_phase(DispatchPhase::Failed);
            return Err(DispatchError::AllTargetsOffline { offline });
        }

        self.set_phase(DispatchPhase::Dispatching);
        tracing::debug!(action = action_code, kind = %dispatch_type, targets = online.len(), "dispatching");

        let results: Vec<DispatchResult> = self.pool.install(|| {
            online
                .par_iter()
                .map(|serial| send_one(transport, action_code, serial, dispatch_type))
                .collect()
        });

        let mut succeeded = 0;
        let mut failed = 0;
        for r in &results {
            match r.outcome {
                Outcome::Success => succeeded += 1,
                Outcome::Failure => {
                    failed += 1;
                    tracing::warn!(serial = %r.serial, detail = %r.detail, action = action_code, "send failed");
                }
            }
        }
        let class = DispatchClass::classify(succeeded, failed);
        self.set_phase(class.into());
        tracing::info!(
            action = action_code,
            succeeded,
            failed,
            offline = offline.len(),
            "dispatch finished"
        );

        Ok(DispatchSummary {
            action_code: action_code.to_string(),
            class,
            succeeded,
            failed,
            offline,
            results,
        })
    }
}

fn send_one(transport: &dyn Transport, action_code: &str, serial: &str, kind: CatalogKind) -> DispatchResult {
    let sent = catch_unwind(AssertUnwindSafe(|| transport.send(action_code, serial, kind)))
        .unwrap_or_else(|_| Err("transport panicked".to_string()));
    match sent {
        Ok(detail) => DispatchResult {
            serial: serial.to_string(),
            outcome: Outcome::Success,
            detail,
        },
        Err(detail) => DispatchResult {
            serial: serial.to_string(),
            outcome: Outcome::Failure,
            detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_covers_all_cases() {
        assert_eq!(DispatchClass::classify(3, 0), DispatchClass::AllSucceeded);
        assert_eq!(DispatchClass::classify(0, 2), DispatchClass::AllFailed);
        assert_eq!(DispatchClass::classify(1, 1), DispatchClass::PartialSuccess);
    }

    #[test]
    fn missing_serial_counts_as_offline() {
        let snapshot: ConnectivitySnapshot = vec![DispatchTarget::online("A")].into_iter().collect();
        assert_eq!(snapshot.get("A"), Connectivity::Online);
        assert_eq!(snapshot.get("Z"), Connectivity::Offline);
    }

    #[test]
    fn partial_notice_mentions_counts_and_offline() {
        let summary = DispatchSummary {
            action_code: "wave".into(),
            class: DispatchClass::PartialSuccess,
            succeeded: 1,
            failed: 1,
            offline: vec!["A".into()],
            results: vec![],
        };
        let notice = summary.notice();
        assert_eq!(notice.severity, crate::notice::Severity::Warning);
        assert!(notice.message.contains("1 of 2"));
        assert!(notice.message.contains("skipped offline: A"));
    }
}
