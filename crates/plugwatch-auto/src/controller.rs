//! Hotplug auto-connect controller
//!
//! # Flow
//!
//! Enabling subscribes to device-change notifications and launches a startup
//! scan. The startup scan connects straight away when a qualifying port is
//! already attached, since that device has finished enumerating.
//!
//! An arrival notification is dropped if the host is connected or blocked,
//! or if another hotplug attempt holds the guard. Otherwise the attempt takes
//! the guard, re-enumerates, and when a qualifying port is present waits for
//! the enumeration delay before checking the host again and connecting.
//! Bootloaders re-enumerate a few seconds after the first arrival, and
//! composite devices fire several arrivals per plug, so the delay and the
//! guard together give one connect per physical plug event.
//!
//! Disabling unsubscribes but does not cancel a pending attempt; its
//! post-delay check sees the disabled flag and abandons.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use plugwatch_detect::{
    find_qualifying_port, DeviceChangeHandler, DeviceChangeKind, DeviceChangeSource,
    PortEnumerator, SubscriptionId,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::AutoConnectConfig;
use crate::error::AutoConnectError;
use crate::events::{
    AttemptOrigin, AttemptOutcome, AutoConnectEvent, ControllerState, SuppressReason,
};
use crate::guard::{AttemptPermit, ConnectionGuard};
use crate::host::{ConnectFailure, ConnectFn, HostCallbacks, StatusFn};
use crate::task::spawn_supervised;

/// Builder collecting the host collaborators
#[derive(Default)]
pub struct AutoConnectBuilder {
    is_connected: Option<StatusFn>,
    should_block: Option<StatusFn>,
    connect: Option<ConnectFn>,
    notifier: Option<Arc<dyn DeviceChangeSource>>,
    enumerator: Option<Arc<dyn PortEnumerator>>,
    config: AutoConnectConfig,
    runtime: Option<Handle>,
    events: Option<mpsc::UnboundedSender<AutoConnectEvent>>,
}

impl AutoConnectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_connected = Some(Arc::new(f));
        self
    }

    pub fn should_block<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_block = Some(Arc::new(f));
        self
    }

    pub fn connect<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), ConnectFailure> + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(f));
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn DeviceChangeSource>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn enumerator(mut self, enumerator: Arc<dyn PortEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    pub fn config(mut self, config: AutoConnectConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime for background tasks (defaults to the current one)
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Channel receiving every [`AutoConnectEvent`]
    pub fn events(mut self, tx: mpsc::UnboundedSender<AutoConnectEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Build the controller, enabling it if the config says so
    pub fn build(self) -> Result<AutoConnectController, AutoConnectError> {
        let host = HostCallbacks {
            is_connected: self
                .is_connected
                .ok_or(AutoConnectError::MissingDependency("is_connected"))?,
            should_block: self
                .should_block
                .ok_or(AutoConnectError::MissingDependency("should_block"))?,
            connect: self
                .connect
                .ok_or(AutoConnectError::MissingDependency("connect"))?,
            notifier: self
                .notifier
                .ok_or(AutoConnectError::MissingDependency("notifier"))?,
            enumerator: self
                .enumerator
                .ok_or(AutoConnectError::MissingDependency("enumerator"))?,
        };
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| AutoConnectError::NoRuntime)?,
        };

        let controller = AutoConnectController::from_parts(host, runtime, self.events);
        controller.set_enumeration_delay(self.config.enumeration_delay());
        if self.config.enabled {
            controller.set_enabled(true);
        }
        Ok(controller)
    }
}

/// Debounced hotplug auto-connect
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct AutoConnectController {
    inner: Arc<Inner>,
}

struct Inner {
    host: HostCallbacks,
    guard: Arc<ConnectionGuard>,
    enabled: AtomicBool,
    enumeration_delay_ms: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
    runtime: Handle,
    events: Option<mpsc::UnboundedSender<AutoConnectEvent>>,
}

impl AutoConnectController {
    pub fn builder() -> AutoConnectBuilder {
        AutoConnectBuilder::new()
    }

    /// Create a disabled controller from already-assembled collaborators
    pub fn from_parts(
        host: HostCallbacks,
        runtime: Handle,
        events: Option<mpsc::UnboundedSender<AutoConnectEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                guard: Arc::new(ConnectionGuard::new()),
                enabled: AtomicBool::new(false),
                enumeration_delay_ms: AtomicU64::new(
                    crate::config::DEFAULT_ENUMERATION_DELAY_MS,
                ),
                subscription: Mutex::new(None),
                runtime,
                events,
            }),
        }
    }

    /// Turn auto-connect on or off
    ///
    /// Enabling subscribes and launches the startup scan, returning its
    /// handle. Repeating the current setting does nothing.
    pub fn set_enabled(&self, enabled: bool) -> Option<JoinHandle<()>> {
        let mut subscription = self.inner.lock_subscription();

        if enabled {
            if subscription.is_some() {
                return None;
            }
            self.inner.enabled.store(true, Ordering::SeqCst);

            let weak = Arc::downgrade(&self.inner);
            let handler: DeviceChangeHandler = Arc::new(move |kind| {
                if let Some(inner) = weak.upgrade() {
                    Inner::handle_device_change(&inner, kind);
                }
            });
            *subscription = Some(self.inner.host.notifier.subscribe(handler));
            drop(subscription);

            info!("Auto-connect enabled");
            self.inner.emit(AutoConnectEvent::Enabled);
            Some(Inner::spawn_startup_scan(&self.inner))
        } else {
            let id = subscription.take()?;
            self.inner.enabled.store(false, Ordering::SeqCst);
            self.inner.host.notifier.unsubscribe(id);
            drop(subscription);

            info!("Auto-connect disabled");
            self.inner.emit(AutoConnectEvent::Disabled);
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Handle a device-change notification
    ///
    /// Only arrivals act. Returns the attempt task when one was started.
    pub fn handle_device_change(&self, kind: DeviceChangeKind) -> Option<JoinHandle<()>> {
        Inner::handle_device_change(&self.inner, kind)
    }

    /// Force the guard free, e.g. after the host's session has ended
    pub fn reset_state(&self) {
        let was_held = self.inner.guard.is_held();
        self.inner.guard.release();
        debug!(was_held, "Auto-connect guard reset");
        self.inner.emit(AutoConnectEvent::GuardReset { was_held });
    }

    pub fn enumeration_delay(&self) -> Duration {
        self.inner.enumeration_delay()
    }

    /// Change the arrival delay; pending attempts keep the delay they started with
    pub fn set_enumeration_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.enumeration_delay_ms.store(ms, Ordering::Relaxed);
    }

    /// Whether a hotplug attempt currently holds the guard
    pub fn attempt_in_flight(&self) -> bool {
        self.inner.guard.is_held()
    }

    pub fn state(&self) -> ControllerState {
        if !self.is_enabled() {
            ControllerState::Disabled
        } else if self.attempt_in_flight() {
            ControllerState::EnabledAttemptPending
        } else {
            ControllerState::EnabledIdle
        }
    }
}

impl std::fmt::Debug for AutoConnectController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoConnectController")
            .field("state", &self.state())
            .field("enumeration_delay", &self.enumeration_delay())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.host.notifier.unsubscribe(id);
            debug!("Auto-connect controller dropped, unsubscribed");
        }
    }
}

impl Inner {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn enumeration_delay(&self) -> Duration {
        Duration::from_millis(self.enumeration_delay_ms.load(Ordering::Relaxed))
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<SubscriptionId>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AutoConnectEvent) {
        if let Some(tx) = &self.events {
            // receiver gone just means nobody is listening
            let _ = tx.send(event);
        }
    }

    /// Reason to skip connecting right now, disabled first
    fn suppression(&self) -> Option<SuppressReason> {
        if !self.is_enabled() {
            Some(SuppressReason::Disabled)
        } else {
            self.host.suppression()
        }
    }

    fn handle_device_change(this: &Arc<Self>, kind: DeviceChangeKind) -> Option<JoinHandle<()>> {
        if kind != DeviceChangeKind::Arrived {
            trace!(?kind, "Ignoring device change");
            return None;
        }

        if let Some(reason) = this.suppression() {
            debug!(?reason, "Ignoring arrival");
            this.emit(AutoConnectEvent::ArrivalIgnored { reason });
            return None;
        }

        let Some(permit) = this.guard.try_permit() else {
            debug!("Ignoring arrival, attempt already pending");
            this.emit(AutoConnectEvent::ArrivalIgnored {
                reason: SuppressReason::AttemptPending,
            });
            return None;
        };

        let task_inner = this.clone();
        let done_inner = this.clone();
        Some(spawn_supervised(
            &this.runtime,
            AttemptOrigin::Hotplug,
            async move { task_inner.run_hotplug_attempt(permit).await },
            move |outcome| {
                done_inner.emit(AutoConnectEvent::AttemptFinished {
                    origin: AttemptOrigin::Hotplug,
                    outcome,
                })
            },
        ))
    }

    fn spawn_startup_scan(this: &Arc<Self>) -> JoinHandle<()> {
        let task_inner = this.clone();
        let done_inner = this.clone();
        spawn_supervised(
            &this.runtime,
            AttemptOrigin::Startup,
            async move { task_inner.run_startup_scan().await },
            move |outcome| {
                done_inner.emit(AutoConnectEvent::AttemptFinished {
                    origin: AttemptOrigin::Startup,
                    outcome,
                })
            },
        )
    }

    async fn run_startup_scan(&self) -> AttemptOutcome {
        if let Some(reason) = self.suppression() {
            return AttemptOutcome::Suppressed(reason);
        }

        let port = match self.find_port().await {
            Ok(Some(port)) => port,
            Ok(None) => return AttemptOutcome::NoDevice,
            Err(reason) => return AttemptOutcome::Failed(reason),
        };

        // enumeration can be slow; the host may have moved on meanwhile
        if let Some(reason) = self.suppression() {
            return AttemptOutcome::Suppressed(reason);
        }

        info!(port = %port, "Qualifying device already attached, connecting");
        self.emit(AutoConnectEvent::AttemptStarted {
            origin: AttemptOrigin::Startup,
            port: port.clone(),
        });
        self.invoke_connect(port).await
    }

    async fn run_hotplug_attempt(&self, permit: AttemptPermit) -> AttemptOutcome {
        let _permit = permit;

        let port = match self.find_port().await {
            Ok(Some(port)) => port,
            Ok(None) => {
                debug!("Arrival did not produce a qualifying port");
                return AttemptOutcome::NoDevice;
            }
            Err(reason) => return AttemptOutcome::Failed(reason),
        };

        let delay = self.enumeration_delay();
        info!(port = %port, "Qualifying device arrived, connecting in {:?}", delay);
        self.emit(AutoConnectEvent::AttemptStarted {
            origin: AttemptOrigin::Hotplug,
            port: port.clone(),
        });

        tokio::time::sleep(delay).await;

        if let Some(reason) = self.suppression() {
            debug!(?reason, "Abandoning attempt after enumeration delay");
            return AttemptOutcome::Suppressed(reason);
        }

        self.invoke_connect(port).await
    }

    /// Look for a qualifying port on the blocking pool
    async fn find_port(&self) -> Result<Option<String>, String> {
        let enumerator = self.host.enumerator.clone();
        tokio::task::spawn_blocking(move || find_qualifying_port(enumerator.as_ref()))
            .await
            .map_err(|e| format!("port enumeration aborted: {}", e))
    }

    /// Run the host connect action on the blocking pool
    async fn invoke_connect(&self, port: String) -> AttemptOutcome {
        let connect = self.host.connect.clone();
        match tokio::task::spawn_blocking(move || connect()).await {
            Ok(Ok(())) => AttemptOutcome::ConnectInvoked { port },
            Ok(Err(e)) => {
                warn!(port = %port, "Connect failed: {}", e);
                AttemptOutcome::Failed(e.to_string())
            }
            Err(e) => {
                warn!(port = %port, "Connect aborted: {}", e);
                AttemptOutcome::Failed(format!("connect aborted: {}", e))
            }
        }
    }
}
