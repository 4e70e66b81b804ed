use crate::api::transport::Transport;
use crate::api::{Error, Session};
use crate::coordinator::{
    BatteryFetch, DeviceHandle, Fetch, InverterFetch, PollLoop, PollSettings, Role,
};
use crate::discovery::{self, Accepted, Phase};
use crate::model::{DeviceDescriptor, DeviceKind, GatewayHost, WiNetInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// One configured WiNet-S gateway: its session, a poll loop per device and role, and the
/// periodic rescan for devices added later.
pub struct WiNet<T: Transport> {
    host: GatewayHost,
    session: Arc<tokio::sync::Mutex<Session<T>>>,
    settings: PollSettings,
    info: RwLock<Option<WiNetInfo>>,
    inverters: RwLock<Vec<Arc<DeviceHandle>>>,
    batteries: RwLock<Vec<Arc<DeviceHandle>>>,
    /// Held for the whole of a discovery, so two of them never accept the same device.
    accepted: tokio::sync::Mutex<Accepted>,
    loaded: AtomicBool,
    discovered: broadcast::Sender<DeviceDescriptor>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> WiNet<T> {
    pub fn new(session: Session<T>, settings: PollSettings) -> Arc<Self> {
        let (discovered, _) = broadcast::channel(16);
        let (shutdown, _) = watch::channel(false);
        Arc::new(WiNet {
            host: session.host().clone(),
            session: Arc::new(tokio::sync::Mutex::new(session)),
            settings,
            info: RwLock::new(None),
            inverters: RwLock::new(Vec::new()),
            batteries: RwLock::new(Vec::new()),
            accepted: tokio::sync::Mutex::new(Accepted::default()),
            loaded: AtomicBool::new(false),
            discovered,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn host(&self) -> &GatewayHost {
        &self.host
    }

    /// Read the gateway identity, discover its devices and start polling them.
    ///
    /// Fails with `Error::SetupNotReady` when the gateway cannot be reached; the caller is
    /// expected to retry later.
    pub async fn setup(self: &Arc<Self>) -> Result<(), Error> {
        let info = {
            let mut session = self.session.lock().await;
            session.get_wi_net_info().await
        }
        .map_err(|e| {
            Error::SetupNotReady(format!("cannot identify WiNet-S at {}: {}", self.host.host, e))
        })?;
        log::info!(
            "WiNet-S {} ({}) at {}",
            info.device_sn,
            info.software_version,
            self.host.host
        );
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = Some(info);

        self.scan(Phase::Startup).await?;
        self.loaded.store(true, Ordering::SeqCst);
        self.spawn_rescan();
        Ok(())
    }

    /// Look for devices added since the last discovery. Returns how many were found.
    pub async fn rescan(&self) -> Result<usize, Error> {
        self.scan(Phase::Rescan).await
    }

    async fn scan(&self, phase: Phase) -> Result<usize, Error> {
        let mut accepted = self.accepted.lock().await;
        if self.is_shut_down() {
            return Ok(0);
        }

        let found = {
            let mut session = self.session.lock().await;
            discovery::discover(&mut session, phase).await?
        };
        let devices = accepted.accept_new(found);

        for device in &devices {
            let inverter = self
                .start_loop(device, Role::Inverter, InverterFetch::new(&self.settings))
                .await;
            self.inverters
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(inverter);
            log::debug!(
                "New inverter added (ID: {}, SN: {})",
                device.dev_id,
                device.serial
            );

            if device.kind == DeviceKind::HybridInverter {
                let battery = self.start_loop(device, Role::Battery, BatteryFetch).await;
                self.batteries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(battery);
                log::debug!(
                    "New battery added (ID: {}, SN: {})",
                    device.dev_id,
                    device.serial
                );
            }

            if self.is_loaded() {
                /* No subscriber is fine */
                let _ = self.discovered.send(device.clone());
            }
        }
        Ok(devices.len())
    }

    /// Build a loop, refresh it once and hand it to its own task.
    async fn start_loop<F: Fetch>(
        &self,
        device: &DeviceDescriptor,
        role: Role,
        fetch: F,
    ) -> Arc<DeviceHandle> {
        let handle = Arc::new(DeviceHandle::new(device.clone(), role, &self.host));
        let mut poll = PollLoop::new(
            Arc::clone(&handle),
            Arc::clone(&self.session),
            fetch,
            &self.settings,
        );
        /* A failed first refresh is logged by the loop and does not block registration */
        let _ = poll.poll_once().await;

        let task = tokio::spawn(poll.run(self.shutdown.subscribe()));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        handle
    }

    fn spawn_rescan(self: &Arc<Self>) {
        let winet = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = tokio::time::sleep(winet.settings.rescan_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
                match winet.rescan().await {
                    Ok(0) => {}
                    Ok(n) => log::info!("Found {} new device(s) at {}", n, winet.host.host),
                    Err(e) => log::warn!("Re-scan of {} failed: {}", winet.host.host, e),
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn info(&self) -> Option<WiNetInfo> {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn inverter_loops(&self) -> Vec<Arc<DeviceHandle>> {
        self.inverters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn battery_loops(&self) -> Vec<Arc<DeviceHandle>> {
        self.batteries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Devices accepted after setup completed, once all their loops exist.
    pub fn subscribe_discovered(&self) -> broadcast::Receiver<DeviceDescriptor> {
        self.discovered.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop every loop and the rescan task, wait for them and close the session. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        /* Wait for a discovery in progress, which may still be adding loops */
        drop(self.accepted.lock().await);

        let tasks: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Poll task of {} ended abnormally: {}", self.host.host, e);
            }
        }
        self.session.lock().await.close().await;
        log::debug!("Stopped polling {}", self.host.host);
    }
}
