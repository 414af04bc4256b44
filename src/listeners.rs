//! Fan-out of cycle results to subscribed consumers

use crate::error::CycleFailure;
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Outcome of one completed polling cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub failed_devices: Vec<String>,
    pub error: Option<String>,
}

impl CycleReport {
    pub fn new(cycle: u64, result: &Result<(), CycleFailure>) -> Self {
        let (failed_devices, error) = match result {
            Ok(()) => (Vec::new(), None),
            Err(failure) => (failure.failed_devices(), Some(failure.to_string())),
        };
        Self {
            cycle,
            completed_at: Utc::now(),
            success: result.is_ok(),
            failed_devices,
            error,
        }
    }
}

/// Something that wants to hear about every completed cycle.
/// Called synchronously from the cycle, so implementations must not block.
pub trait CycleListener: Send + Sync {
    fn on_cycle(&self, report: &CycleReport);
}

impl<F> CycleListener for F
where
    F: Fn(&CycleReport) + Send + Sync,
{
    fn on_cycle(&self, report: &CycleReport) {
        self(report)
    }
}

impl CycleListener for mpsc::Sender<CycleReport> {
    fn on_cycle(&self, report: &CycleReport) {
        match self.try_send(report.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(report)) => {
                warn!(cycle = report.cycle, "Cycle listener is lagging, dropping report");
            }
            Err(TrySendError::Closed(report)) => {
                warn!(cycle = report.cycle, "Cycle listener has gone away");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<dyn CycleListener>)>>,
}

impl Listeners {
    pub fn subscribe(&self, listener: impl CycleListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn CycleListener> = Arc::new(listener);
        self.lock().push((id, listener));
        id
    }

    /// Returns false if the listener was not subscribed
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn notify(&self, report: &CycleReport) {
        // Listeners may subscribe or unsubscribe from inside a callback
        let listeners: Vec<Arc<dyn CycleListener>> = self
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.on_cycle(report);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Arc<dyn CycleListener>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, RequestError};
    use std::sync::atomic::AtomicUsize;

    fn failed_report() -> CycleReport {
        CycleReport::new(
            4,
            &Err(CycleFailure {
                failures: vec![FetchError::Request {
                    device_id: "dev-1".to_string(),
                    source: RequestError::Auth("expired".to_string()),
                }],
            }),
        )
    }

    #[test]
    fn test_report_from_failure() {
        let report = failed_report();
        assert_eq!(report.cycle, 4);
        assert!(!report.success);
        assert_eq!(report.failed_devices, vec!["dev-1"]);
        assert!(report.error.unwrap().contains("expired"));

        let ok = CycleReport::new(5, &Ok(()));
        assert!(ok.success);
        assert!(ok.failed_devices.is_empty());
        assert_eq!(ok.error, None);
    }

    #[test]
    fn test_every_listener_is_notified() {
        let listeners = Listeners::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            listeners.subscribe(move |_: &CycleReport| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        listeners.notify(&failed_report());

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let listeners = Listeners::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = listeners.subscribe(move |_: &CycleReport| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.notify(&failed_report());

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(listeners.is_empty());
    }

    #[tokio::test]
    async fn test_channel_listener_receives_reports() {
        let listeners = Listeners::default();
        let (tx, mut rx) = mpsc::channel(1);
        listeners.subscribe(tx);

        listeners.notify(&failed_report());
        // channel is full, the second report is dropped rather than blocking
        listeners.notify(&CycleReport::new(5, &Ok(())));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.cycle, 4);
        assert!(rx.try_recv().is_err());
    }
}
