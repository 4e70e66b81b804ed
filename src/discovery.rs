use crate::api::response::device_list::DeviceList;
use crate::api::transport::Transport;
use crate::api::{endpoint, params, response, Error, Session};
use crate::model::DeviceDescriptor;
use serde_json::Value;
use std::collections::HashSet;

/// Whether a discovery is the first one of a setup or a later rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Rescan,
}

/// Every device the gateway currently knows about, in gateway order.
pub async fn list_devices<T: Transport>(
    session: &mut Session<T>,
) -> Result<Vec<DeviceDescriptor>, Error> {
    let request = params([
        ("type", Value::from("0")),
        ("is_check_token", Value::from("0")),
    ]);
    let data = session.call(endpoint::DEVICE_LIST, request).await?;
    let devices = response::payload::<DeviceList>(data)?;

    Ok(devices
        .list
        .into_iter()
        .map(|device| DeviceDescriptor {
            dev_id: device.dev_id,
            serial: device.dev_sn,
            name: device.dev_name,
            model: device.dev_model,
            kind: device.dev_type,
        })
        .collect())
}

/// `list_devices` with the failure policy of `phase`: a failed first discovery means the gateway
/// is not ready, a failed rescan finds nothing.
pub async fn discover<T: Transport>(
    session: &mut Session<T>,
    phase: Phase,
) -> Result<Vec<DeviceDescriptor>, Error> {
    match list_devices(session).await {
        Ok(devices) => Ok(devices),
        Err(e) => match phase {
            Phase::Startup => Err(Error::SetupNotReady(format!(
                "cannot list devices of {}: {}",
                session.host().host,
                e
            ))),
            Phase::Rescan => {
                log::debug!("Re-scan of {} failed: {}", session.host().host, e);
                Ok(Vec::new())
            }
        },
    }
}

/// Serial numbers of the devices accepted so far.
#[derive(Debug, Default)]
pub struct Accepted {
    serials: HashSet<String>,
}

impl Accepted {
    /// Devices of `found` not accepted before, which are accepted now. A serial repeated within
    /// `found` is accepted once.
    pub fn accept_new(&mut self, found: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
        found
            .into_iter()
            .filter(|device| self.serials.insert(device.serial.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }
}
