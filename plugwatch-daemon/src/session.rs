//! Serial session with the attached autopilot
//!
//! `connect` opens the qualifying port with tokio_serial and spawns a read
//! loop on the daemon runtime. The session counts as connected until the
//! read loop ends (read error, shutdown) or the port disappears, at which
//! point the `on_closed` callback fires once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use plugwatch_detect::{find_qualifying_port, PortEnumerator};
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::error::DaemonError;

/// Commands that can be sent to a session read loop
#[derive(Debug)]
enum SessionCommand {
    /// Stop reading and drop the port
    Shutdown,
}

/// Callback invoked with the port name when a session ends
pub type ClosedFn = Arc<dyn Fn(&str) + Send + Sync>;

struct ActiveSession {
    id: u64,
    port: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

struct SessionInner {
    enumerator: Arc<dyn PortEnumerator>,
    baud_rate: u32,
    runtime: Handle,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
    on_closed: Mutex<Option<ClosedFn>>,
}

/// Host-side session used as the auto-connect target
#[derive(Clone)]
pub struct SerialSession {
    inner: Arc<SessionInner>,
}

impl SerialSession {
    pub fn new(enumerator: Arc<dyn PortEnumerator>, baud_rate: u32, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                enumerator,
                baud_rate,
                runtime,
                next_id: AtomicU64::new(1),
                active: Mutex::new(None),
                on_closed: Mutex::new(None),
            }),
        }
    }

    /// Register the callback fired when a session ends
    pub fn set_on_closed<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(f));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_active().is_some()
    }

    /// Name of the open port, if any
    pub fn port(&self) -> Option<String> {
        self.inner.lock_active().as_ref().map(|s| s.port.clone())
    }

    /// Open the first qualifying port
    ///
    /// Blocking: enumerates ports and opens the device. Already being
    /// connected is not an error.
    pub fn connect(&self) -> Result<(), DaemonError> {
        if let Some(port) = self.port() {
            debug!(port = %port, "Session already open");
            return Ok(());
        }

        let port =
            find_qualifying_port(self.inner.enumerator.as_ref()).ok_or(DaemonError::NoDevice)?;

        let stream = {
            let _enter = self.inner.runtime.enter();
            tokio_serial::new(&port, self.inner.baud_rate)
                .timeout(Duration::from_millis(100))
                .open_native_async()
                .map_err(|source| DaemonError::OpenFailed {
                    port: port.clone(),
                    source,
                })?
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let mut active = self.inner.lock_active();
        if let Some(existing) = active.as_ref() {
            // lost a race with another connect; keep the first session
            debug!(port = %existing.port, "Session opened concurrently, dropping duplicate");
            return Ok(());
        }
        *active = Some(ActiveSession {
            id,
            port: port.clone(),
            cmd_tx,
        });
        drop(active);

        info!(port = %port, baud = self.inner.baud_rate, "Session opened");
        self.inner
            .runtime
            .spawn(read_loop(self.inner.clone(), id, port, stream, cmd_rx));
        Ok(())
    }

    /// Close the session if one is open
    pub fn close(&self) {
        let active = self.inner.lock_active().take();
        if let Some(session) = active {
            let _ = session.cmd_tx.try_send(SessionCommand::Shutdown);
            info!(port = %session.port, "Session closed");
            self.inner.notify_closed(&session.port);
        }
    }

    /// Close the session if its port is no longer attached
    ///
    /// Enumeration runs on the blocking pool; returns the check's handle, or
    /// `None` when no session is open.
    pub fn close_if_detached(&self) -> Option<JoinHandle<()>> {
        let port = self.port()?;
        let session = self.clone();
        Some(self.inner.runtime.spawn_blocking(move || {
            let attached = match session.inner.enumerator.list_ports() {
                Ok(ports) => ports.iter().any(|p| p.port_name == port),
                // can't tell; keep the session and let the read loop decide
                Err(_) => true,
            };
            if !attached && session.port().as_deref() == Some(port.as_str()) {
                info!(port = %port, "Session port detached");
                session.close();
            }
        }))
    }
}

impl SessionInner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_closed(&self, port: &str) {
        let callback = self
            .on_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(port);
        }
    }

    /// Read loop ended on its own; clear the session if it is still ours
    fn finish(&self, id: u64, port: &str) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
            drop(active);
            info!(port = %port, "Session ended");
            self.notify_closed(port);
        }
    }
}

/// Main read loop - runs until the port fails or shutdown is requested
async fn read_loop(
    inner: Arc<SessionInner>,
    id: u64,
    port: String,
    mut stream: SerialStream,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    debug!(port = %port, "Starting session read loop");
    let mut buffer = vec![0u8; 1024];

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => {
                        debug!(port = %port, "Shutdown requested");
                        break;
                    }
                }
            }

            result = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buffer)) => {
                match result {
                    Ok(Ok(n)) if n > 0 => {
                        trace!("Read {} bytes from {}: {:02X?}", n, port, &buffer[..n]);
                    }
                    Ok(Ok(_)) => {} // 0 bytes
                    Ok(Err(e)) => {
                        warn!("Read error on {}: {}", port, e);
                        break;
                    }
                    Err(_) => {} // Timeout, continue
                }
            }
        }
    }

    inner.finish(id, &port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugwatch_detect::{DetectError, DeviceDescriptor};
    use std::sync::atomic::AtomicUsize;

    struct FixedPorts(Vec<DeviceDescriptor>);

    impl PortEnumerator for FixedPorts {
        fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
            Ok(self.0.clone())
        }
    }

    /// Port list the test can edit or make fail
    #[derive(Default)]
    struct EditablePorts {
        ports: Mutex<Vec<DeviceDescriptor>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl PortEnumerator for EditablePorts {
        fn list_ports(&self) -> Result<Vec<DeviceDescriptor>, DetectError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DetectError::EnumerationFailed("device busy".into()));
            }
            Ok(self.ports.lock().unwrap().clone())
        }
    }

    const AUTOPILOT_ID: &str = "USB\\VID_1209&PID_5741";

    fn count_closes(session: &SerialSession) -> Arc<AtomicUsize> {
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        session.set_on_closed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        closed
    }

    /// Mark a session open without a real port behind it
    fn install(session: &SerialSession, port: &str) -> (u64, mpsc::Receiver<SessionCommand>) {
        let id = session.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        *session.inner.lock_active() = Some(ActiveSession {
            id,
            port: port.to_string(),
            cmd_tx,
        });
        (id, cmd_rx)
    }

    fn editable_session(ports: &[&str]) -> (SerialSession, Arc<EditablePorts>) {
        let enumerator = Arc::new(EditablePorts::default());
        *enumerator.ports.lock().unwrap() = ports
            .iter()
            .map(|p| DeviceDescriptor::new(*p, AUTOPILOT_ID))
            .collect();
        let session = SerialSession::new(enumerator.clone(), 115_200, Handle::current());
        (session, enumerator)
    }

    #[tokio::test]
    async fn test_close_notifies_once_and_stops_reader() {
        let (session, _) = editable_session(&["/dev/ttyACM0"]);
        let closed = count_closes(&session);
        let (id, mut cmd_rx) = install(&session, "/dev/ttyACM0");
        assert!(session.is_connected());

        session.close();
        assert!(!session.is_connected());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(cmd_rx.try_recv(), Ok(SessionCommand::Shutdown)));

        // the read loop exiting afterwards must not report the session again
        session.inner.finish(id, "/dev/ttyACM0");
        session.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_loop_end_closes_session() {
        let (session, _) = editable_session(&["/dev/ttyACM0"]);
        let closed = count_closes(&session);
        let (id, _cmd_rx) = install(&session, "/dev/ttyACM0");

        session.inner.finish(id, "/dev/ttyACM0");
        assert!(!session.is_connected());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_finish_keeps_newer_session() {
        let (session, _) = editable_session(&["/dev/ttyACM0", "/dev/ttyACM1"]);
        let closed = count_closes(&session);

        let (old_id, _old_rx) = install(&session, "/dev/ttyACM0");
        session.close();
        let (_new_id, _new_rx) = install(&session, "/dev/ttyACM1");

        session.inner.finish(old_id, "/dev/ttyACM0");
        assert_eq!(session.port().as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detached_port_closes_session() {
        let (session, ports) = editable_session(&["/dev/ttyACM0"]);
        let closed = count_closes(&session);
        let (_id, _cmd_rx) = install(&session, "/dev/ttyACM0");

        // still attached
        session.close_if_detached().unwrap().await.unwrap();
        assert!(session.is_connected());

        ports.ports.lock().unwrap().clear();
        session.close_if_detached().unwrap().await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enumeration_failure_keeps_session() {
        let (session, ports) = editable_session(&["/dev/ttyACM0"]);
        let closed = count_closes(&session);
        let (_id, _cmd_rx) = install(&session, "/dev/ttyACM0");

        ports.ports.lock().unwrap().clear();
        ports.fail.store(true, Ordering::SeqCst);
        session.close_if_detached().unwrap().await.unwrap();

        assert!(session.is_connected());
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_without_device() {
        let session = SerialSession::new(
            Arc::new(FixedPorts(vec![DeviceDescriptor::new("/dev/ttyS0", "")])),
            115_200,
            Handle::current(),
        );

        let err = session.connect().unwrap_err();
        assert!(matches!(err, DaemonError::NoDevice));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_open_failure_leaves_session_closed() {
        let session = SerialSession::new(
            Arc::new(FixedPorts(vec![DeviceDescriptor::new(
                "/dev/plugwatch-test-missing",
                "USB\\VID_1209&PID_5741",
            )])),
            115_200,
            Handle::current(),
        );

        let err = session.connect().unwrap_err();
        assert!(matches!(
            err,
            DaemonError::OpenFailed { ref port, .. } if port == "/dev/plugwatch-test-missing"
        ));
        assert!(!session.is_connected());
        assert_eq!(session.port(), None);
    }

    #[tokio::test]
    async fn test_close_without_session_is_silent() {
        let session = SerialSession::new(
            Arc::new(FixedPorts(Vec::new())),
            115_200,
            Handle::current(),
        );
        let closed = count_closes(&session);

        session.close();
        assert!(session.close_if_detached().is_none());

        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }
}
