use crate::api::transport::Transport;
use crate::api::{Error, Session};
use crate::model::{DeviceDescriptor, GatewayHost, MetricSnapshot};
use crate::retry::RetryPolicy;
use crate::seen_keys::SeenKeys;
use crate::sensor::{self, SensorDescription};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Timing of the device loops and the rescan task.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub error_interval: Duration,
    /// Consecutive failures after which a loop falls back to `error_interval`.
    pub max_failed_updates: u32,
    /// Attempts of one inverter fetch before its failure counts.
    pub silent_retries: u32,
    pub rescan_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(60),
            error_interval: Duration::from_secs(600),
            max_failed_updates: 3,
            silent_retries: 3,
            rescan_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Inverter,
    Battery,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Inverter => "inverter",
            Role::Battery => "battery",
        }
    }

    pub fn sensors(&self) -> &'static [SensorDescription] {
        match self {
            Role::Inverter => sensor::INVERTER_SENSORS,
            Role::Battery => sensor::BATTERY_SENSORS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMode {
    Normal,
    Degraded,
}

/// Failure bookkeeping of one loop.
#[derive(Debug, Clone)]
pub struct PollState {
    pub dev_id: u32,
    interval: Duration,
    error_interval: Duration,
    max_failed_updates: u32,
    consecutive_failures: u32,
    mode: IntervalMode,
}

impl PollState {
    pub fn new(dev_id: u32, settings: &PollSettings) -> Self {
        PollState {
            dev_id,
            interval: settings.interval,
            error_interval: settings.error_interval,
            max_failed_updates: settings.max_failed_updates,
            consecutive_failures: 0,
            mode: IntervalMode::Normal,
        }
    }

    pub fn interval(&self) -> Duration {
        match self.mode {
            IntervalMode::Normal => self.interval,
            IntervalMode::Degraded => self.error_interval,
        }
    }

    pub fn mode(&self) -> IntervalMode {
        self.mode
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.mode = IntervalMode::Normal;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.max_failed_updates {
            self.mode = IntervalMode::Degraded;
        }
        self.consecutive_failures
    }
}

/// One device's realtime request.
pub trait Fetch: Send + Sync + 'static {
    fn fetch<T: Transport>(
        &self,
        session: &mut Session<T>,
        dev_id: u32,
    ) -> impl Future<Output = Result<MetricSnapshot, Error>> + Send;
}

pub struct InverterFetch {
    silent: RetryPolicy,
}

impl InverterFetch {
    pub fn new(settings: &PollSettings) -> Self {
        InverterFetch {
            silent: RetryPolicy::bounded(settings.silent_retries.max(1), Duration::ZERO),
        }
    }
}

impl Fetch for InverterFetch {
    async fn fetch<T: Transport>(
        &self,
        session: &mut Session<T>,
        dev_id: u32,
    ) -> Result<MetricSnapshot, Error> {
        /* About one in a hundred `real` requests fails for no visible reason */
        self.silent
            .run(session, move |session| Box::pin(session.real(dev_id)), |_| true)
            .await
    }
}

pub struct BatteryFetch;

impl Fetch for BatteryFetch {
    async fn fetch<T: Transport>(
        &self,
        session: &mut Session<T>,
        dev_id: u32,
    ) -> Result<MetricSnapshot, Error> {
        session.real_battery(dev_id).await
    }
}

#[derive(Debug, Clone)]
pub enum UpdateEvent {
    Refreshed {
        /// Keys carrying a value for the first time.
        newly_available: Vec<String>,
    },
    Failed {
        consecutive_failures: u32,
        degraded: bool,
        error: Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub degraded: bool,
}

/// The consumer-facing side of one loop.
pub struct DeviceHandle {
    pub descriptor: DeviceDescriptor,
    pub role: Role,
    pub name: String,
    snapshot: RwLock<Option<Arc<MetricSnapshot>>>,
    seen_keys: Mutex<SeenKeys>,
    status: Mutex<LoopStatus>,
    updates: broadcast::Sender<UpdateEvent>,
}

#[derive(Serialize)]
pub struct LoopView {
    pub name: String,
    pub role: Role,
    pub descriptor: DeviceDescriptor,
    pub ready: bool,
    pub status: LoopStatus,
    pub snapshot: Option<Arc<MetricSnapshot>>,
    pub pending_keys: Vec<String>,
}

pub fn loop_name(role: Role, dev_id: u32, host: &GatewayHost) -> String {
    format!("sungrow_{}_{}_{}", role.as_str(), dev_id, host.host)
}

impl DeviceHandle {
    pub fn new(descriptor: DeviceDescriptor, role: Role, host: &GatewayHost) -> Self {
        let (updates, _) = broadcast::channel(16);
        DeviceHandle {
            name: loop_name(role, descriptor.dev_id, host),
            seen_keys: Mutex::new(SeenKeys::new(
                role.sensors().iter().map(|s| s.response_key),
            )),
            descriptor,
            role,
            snapshot: RwLock::new(None),
            status: Mutex::new(LoopStatus::default()),
            updates,
        }
    }

    /// Latest successful snapshot; `None` until the first success.
    pub fn snapshot(&self) -> Option<Arc<MetricSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn pending_keys(&self) -> Vec<String> {
        let keys = self.seen_keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.pending().map(str::to_string).collect()
    }

    pub fn seen_keys(&self) -> Vec<String> {
        let keys = self.seen_keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.seen().map(str::to_string).collect()
    }

    pub fn status(&self) -> LoopStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.updates.subscribe()
    }

    pub fn view(&self) -> LoopView {
        let snapshot = self.snapshot();
        LoopView {
            name: self.name.clone(),
            role: self.role,
            descriptor: self.descriptor.clone(),
            ready: snapshot.is_some(),
            status: self.status(),
            snapshot,
            pending_keys: self.pending_keys(),
        }
    }

    fn store(&self, snapshot: MetricSnapshot, state: &PollState) -> Vec<String> {
        let newly = self
            .seen_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(&snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(snapshot));
        self.record(state, false);
        newly
    }

    fn record(&self, state: &PollState, failed: bool) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.consecutive_failures = state.consecutive_failures();
        status.degraded = state.mode() == IntervalMode::Degraded;
        if failed {
            status.total_failures += 1;
        }
    }

    fn publish(&self, event: UpdateEvent) {
        /* Nobody listening is fine */
        let _ = self.updates.send(event);
    }
}

/// Periodic refresh of one device, serialized with every other loop of the gateway through the
/// session lock.
pub struct PollLoop<T: Transport, F: Fetch> {
    handle: Arc<DeviceHandle>,
    session: Arc<tokio::sync::Mutex<Session<T>>>,
    fetch: F,
    state: PollState,
}

impl<T: Transport, F: Fetch> PollLoop<T, F> {
    pub fn new(
        handle: Arc<DeviceHandle>,
        session: Arc<tokio::sync::Mutex<Session<T>>>,
        fetch: F,
        settings: &PollSettings,
    ) -> Self {
        let state = PollState::new(handle.descriptor.dev_id, settings);
        PollLoop {
            handle,
            session,
            fetch,
            state,
        }
    }

    pub fn handle(&self) -> &Arc<DeviceHandle> {
        &self.handle
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// One update cycle. Its outcome is also published to the handle's subscribers.
    pub async fn poll_once(&mut self) -> Result<(), Error> {
        let result = {
            let mut session = self.session.lock().await;
            self.fetch.fetch(&mut *session, self.state.dev_id).await
        };

        match result {
            Ok(snapshot) => {
                if self.state.mode() == IntervalMode::Degraded {
                    log::info!(
                        "{} recovered, polling every {:?} again",
                        self.handle.name,
                        self.state.interval
                    );
                }
                self.state.record_success();
                let newly_available = self.handle.store(snapshot, &self.state);
                if !newly_available.is_empty() {
                    log::debug!("{}: new keys {:?}", self.handle.name, newly_available);
                }
                self.handle.publish(UpdateEvent::Refreshed { newly_available });
                Ok(())
            }
            Err(error) => {
                let was_degraded = self.state.mode() == IntervalMode::Degraded;
                let failures = self.state.record_failure();
                let degraded = self.state.mode() == IntervalMode::Degraded;
                log::warn!(
                    "Update of {} failed ({} in a row): {}",
                    self.handle.name,
                    failures,
                    error
                );
                if degraded && !was_degraded {
                    log::info!(
                        "{} polling every {:?} until it recovers",
                        self.handle.name,
                        self.state.error_interval
                    );
                }
                self.handle.record(&self.state, true);
                self.handle.publish(UpdateEvent::Failed {
                    consecutive_failures: failures,
                    degraded,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Poll on the current interval until `shutdown` turns `true` or its sender is gone. A cycle
    /// that has started always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        log::debug!("Starting {}", self.handle.name);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = tokio::time::sleep(self.state.interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            /* Failures are logged and published by `poll_once` */
            let _ = self.poll_once().await;
        }
        log::debug!("Stopped {}", self.handle.name);
    }
}
