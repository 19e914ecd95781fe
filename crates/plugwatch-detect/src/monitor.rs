//! Polling port monitor
//!
//! Turns successive port enumerations into arrival/removal notifications.
//! The first enumeration is a baseline and produces no notifications.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::error::DetectError;
use crate::notify::{
    DeviceChangeHandler, DeviceChangeKind, DeviceChangeSource, Subscribers, SubscriptionId,
};
use crate::scanner::PortEnumerator;

/// Default interval between enumerations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Port names that appeared and disappeared between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl PortChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare two snapshots of port names (results are sorted)
pub fn diff_ports(previous: &HashSet<String>, current: &HashSet<String>) -> PortChanges {
    let mut added: Vec<String> = current.difference(previous).cloned().collect();
    let mut removed: Vec<String> = previous.difference(current).cloned().collect();
    added.sort();
    removed.sort();
    PortChanges { added, removed }
}

/// Device-change source backed by periodic enumeration
pub struct PortMonitor {
    subscribers: Arc<Subscribers>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PortMonitor {
    /// Start polling on the current tokio runtime
    pub fn start(enumerator: Arc<dyn PortEnumerator>, poll_interval: Duration) -> Self {
        let subscribers = Arc::new(Subscribers::new());
        let task = tokio::spawn(poll_loop(enumerator, subscribers.clone(), poll_interval));
        info!("Port monitor started (every {:?})", poll_interval);

        Self {
            subscribers,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop polling; subscribers stay registered but receive nothing further
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            info!("Port monitor stopped");
        }
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl DeviceChangeSource for PortMonitor {
    fn subscribe(&self, handler: DeviceChangeHandler) -> SubscriptionId {
        self.subscribers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id)
    }
}

impl Drop for PortMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Enumerate on the blocking pool
async fn snapshot(enumerator: &Arc<dyn PortEnumerator>) -> Result<HashSet<String>, DetectError> {
    let enumerator = enumerator.clone();
    let ports = tokio::task::spawn_blocking(move || enumerator.list_ports())
        .await
        .map_err(|e| DetectError::TaskAborted(e.to_string()))??;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

async fn poll_loop(
    enumerator: Arc<dyn PortEnumerator>,
    subscribers: Arc<Subscribers>,
    poll_interval: Duration,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut known: Option<HashSet<String>> = None;

    loop {
        ticker.tick().await;

        let current = match snapshot(&enumerator).await {
            Ok(ports) => ports,
            Err(e) => {
                debug!("Port poll failed: {}", e);
                continue;
            }
        };

        if let Some(previous) = &known {
            let changes = diff_ports(previous, &current);
            if changes.is_empty() {
                trace!("No port changes");
            }
            for port in &changes.removed {
                debug!(port = %port, "Port removed");
                subscribers.dispatch(DeviceChangeKind::Removed);
            }
            for port in &changes.added {
                debug!(port = %port, "Port arrived");
                subscribers.dispatch(DeviceChangeKind::Arrived);
            }
        } else {
            trace!("Baseline snapshot: {} port(s)", current.len());
        }

        known = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DeviceDescriptor;
    use tokio::sync::{mpsc, Notify};

    /// Port list the test can edit; signals after every enumeration
    struct SharedPorts {
        ports: Mutex<Vec<DeviceDescriptor>>,
        polled: Notify,
    }

    impl SharedPorts {
        fn new(ports: Vec<DeviceDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                ports: Mutex::new(ports),
                polled: Notify::new(),
            })
        }

        /// Wait until the monitor has taken a snapshot
        async fn wait_polled(&self) {
            tokio::time::timeout(Duration::from_secs(2), self.polled.notified())
                .await
                .unwrap();
        }
    }

    impl PortEnumerator for SharedPorts {
        fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
            let ports = self.ports.lock().unwrap().clone();
            self.polled.notify_one();
            Ok(ports)
        }
    }

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_ports() {
        let changes = diff_ports(
            &names(&["COM1", "COM3"]),
            &names(&["COM1", "COM7", "COM4"]),
        );
        assert_eq!(changes.added, vec!["COM4".to_string(), "COM7".to_string()]);
        assert_eq!(changes.removed, vec!["COM3".to_string()]);
        assert!(diff_ports(&names(&["COM1"]), &names(&["COM1"])).is_empty());
    }

    #[tokio::test]
    async fn test_monitor_reports_arrival_and_removal() {
        let ports = SharedPorts::new(vec![DeviceDescriptor::new("/dev/ttyS0", "")]);
        let monitor = PortMonitor::start(ports.clone(), Duration::from_millis(10));

        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.subscribe(Arc::new(move |kind| {
            let _ = tx.send(kind);
        }));

        // the baseline is read before anything changes
        ports.wait_polled().await;
        assert!(rx.try_recv().is_err());

        ports
            .ports
            .lock()
            .unwrap()
            .push(DeviceDescriptor::new("/dev/ttyACM0", "USB\\VID_1209&PID_5741"));
        let kind = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(kind, Some(DeviceChangeKind::Arrived));

        ports.ports.lock().unwrap().retain(|p| p.port_name != "/dev/ttyACM0");
        let kind = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(kind, Some(DeviceChangeKind::Removed));

        monitor.stop();
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_is_silent() {
        let ports = SharedPorts::new(Vec::new());
        let monitor = PortMonitor::start(ports.clone(), Duration::from_millis(10));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = monitor.subscribe(Arc::new(move |kind| {
            let _ = tx.send(kind);
        }));
        monitor.unsubscribe(id);
        assert_eq!(monitor.subscriber_count(), 0);

        ports.wait_polled().await;
        ports
            .ports
            .lock()
            .unwrap()
            .push(DeviceDescriptor::new("COM5", "USB\\VID_2DAE&PID_1016"));
        // let the monitor poll past the change
        ports.wait_polled().await;
        ports.wait_polled().await;

        assert!(rx.try_recv().is_err());
    }
}
