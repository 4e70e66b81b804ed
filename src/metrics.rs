use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, TextEncoder};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use sungrow_winet_rs::api::transport::Transport;
use sungrow_winet_rs::coordinator::{DeviceHandle, Role, UpdateEvent};
use sungrow_winet_rs::sensor::{self, SensorDescription};
use sungrow_winet_rs::{Error, WiNet};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

lazy_static! {
    static ref SENSOR_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "sungrow_sensor",
            "latest value of a sensor reported by the inverter or battery",
        ),
        &["serial", "device", "role", "sensor", "unit"],
    )
    .unwrap();
    static ref POLL_FAILURES: IntCounterVec = register_int_counter_vec!(
        opts!("sungrow_poll_failures_total", "failed update cycles",),
        &["serial", "role"],
    )
    .unwrap();
    static ref CONSECUTIVE_FAILURES: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "sungrow_consecutive_failures",
            "update cycles failed in a row since the last success",
        ),
        &["serial", "role"],
    )
    .unwrap();
}

/// Sensors of one loop that have reported a value at least once.
struct Materialized {
    handle: Arc<DeviceHandle>,
    sensors: Vec<&'static SensorDescription>,
}

impl Materialized {
    fn add(&mut self, response_key: &str) {
        if let Some(description) = sensor::find(self.handle.role.sensors(), response_key) {
            if !self.sensors.iter().any(|s| s.key == description.key) {
                log::info!("Materialized {} of {}", description.key, self.handle.name);
                self.sensors.push(description);
            }
        }
    }

    /// Set the gauge of every materialized sensor with a numeric value in the latest snapshot.
    fn refresh(&self) {
        let snapshot = match self.handle.snapshot() {
            Some(snapshot) => snapshot,
            None => return,
        };
        let descriptor = &self.handle.descriptor;
        for description in &self.sensors {
            if let Some(value) = description.value(&snapshot).and_then(|v| v.as_f64()) {
                SENSOR_GAUGE
                    .with_label_values(&[
                        &descriptor.serial,
                        &descriptor.name,
                        self.handle.role.as_str(),
                        description.key,
                        description.unit.unwrap_or(""),
                    ])
                    .set(value);
            }
        }
    }

    fn failed(&self, consecutive_failures: u32) {
        let labels = [self.handle.descriptor.serial.as_str(), self.handle.role.as_str()];
        POLL_FAILURES.with_label_values(&labels).inc();
        CONSECUTIVE_FAILURES
            .with_label_values(&labels)
            .set(i64::from(consecutive_failures));
    }

    fn recovered(&self) {
        CONSECUTIVE_FAILURES
            .with_label_values(&[self.handle.descriptor.serial.as_str(), self.handle.role.as_str()])
            .set(0);
    }
}

/// Follow the updates of one loop, registering gauges as sensors first report a value.
async fn follow(handle: Arc<DeviceHandle>) {
    let mut updates = handle.subscribe();
    let mut materialized = Materialized {
        sensors: Vec::new(),
        handle,
    };
    /* Keys seen before we subscribed */
    for key in materialized.handle.seen_keys() {
        materialized.add(&key);
    }
    materialized.refresh();

    loop {
        match updates.recv().await {
            Ok(UpdateEvent::Refreshed { newly_available }) => {
                for key in &newly_available {
                    materialized.add(key);
                }
                materialized.recovered();
                materialized.refresh();
            }
            Ok(UpdateEvent::Failed {
                consecutive_failures,
                ..
            }) => materialized.failed(consecutive_failures),
            Err(RecvError::Lagged(missed)) => {
                log::warn!("Missed {} updates of {}", missed, materialized.handle.name);
                for key in materialized.handle.seen_keys() {
                    materialized.add(&key);
                }
                materialized.refresh();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Background tasks feeding the Prometheus registry from the poll loops of a gateway.
pub struct Exporter {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Exporter {
    pub fn start<T: Transport>(winet: Arc<WiNet<T>>) -> Self {
        let tasks = Arc::new(Mutex::new(Vec::new()));
        let mut attached: HashSet<(String, Role)> = HashSet::new();
        let mut discovered = winet.subscribe_discovered();

        attach_new(&winet, &mut attached, &tasks);

        /* Devices found by later rescans */
        let listener_tasks = Arc::clone(&tasks);
        let listener = tokio::spawn(async move {
            loop {
                match discovered.recv().await {
                    Ok(device) => {
                        log::debug!("Exporting new device {}", device.serial);
                        attach_new(&winet, &mut attached, &listener_tasks);
                    }
                    Err(RecvError::Lagged(_)) => attach_new(&winet, &mut attached, &listener_tasks),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);

        Exporter { tasks }
    }

    /// Abort the consumers; they hold no state worth finishing.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

fn attach_new<T: Transport>(
    winet: &WiNet<T>,
    attached: &mut HashSet<(String, Role)>,
    tasks: &Mutex<Vec<JoinHandle<()>>>,
) {
    for handle in winet
        .inverter_loops()
        .into_iter()
        .chain(winet.battery_loops())
    {
        if attached.insert((handle.descriptor.serial.clone(), handle.role)) {
            let task = tokio::spawn(follow(handle));
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(task);
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}
