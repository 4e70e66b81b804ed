use crate::api::endpoint;
use num_derive::FromPrimitive;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_WS_PORT: u16 = 8082;

/// Address of one WiNet-S gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayHost {
    pub host: String,
    pub ws_port: u16,
}

impl GatewayHost {
    pub fn new(host: &str, ws_port: u16) -> Self {
        let host = host
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_lowercase();
        GatewayHost { host, ws_port }
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.ws_port, endpoint::WEBSOCKET)
    }

    pub fn http_url(&self, path: &endpoint::Path) -> String {
        format!("http://{}{}", self.host, path)
    }
}

/// Device type as reported by the gateway in `dev_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, FromPrimitive, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Unknown = 0,
    StringInverter = 21,
    HybridInverter = 35,
}

impl DeviceKind {
    pub fn from_code(code: u64) -> Self {
        num::FromPrimitive::from_u64(code).unwrap_or(DeviceKind::Unknown)
    }
}

impl<'de> serde::Deserialize<'de> for DeviceKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        /* Some firmwares send the code as a string; anything unrecognized is Unknown */
        let code = match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        Ok(code.map_or(DeviceKind::Unknown, DeviceKind::from_code))
    }
}

/// A device behind the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Gateway-local id, only stable until the gateway renumbers its devices.
    pub dev_id: u32,
    /// Globally unique identity of the device.
    pub serial: String,
    pub name: String,
    pub model: String,
    pub kind: DeviceKind,
}

/// Identity of the WiNet-S dongle itself, read from `/about/list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WiNetInfo {
    pub device_sn: String,
    pub device_version: String,
    pub software_version: String,
    pub software_build_version: String,
}

/// Raw `data_value` of a realtime row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    Null,
}

impl MetricValue {
    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }

    /// Numeric reading of the value; the gateway sends most numbers as strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            MetricValue::Null => None,
        }
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => MetricValue::Null,
            Value::Number(n) => n.as_f64().map_or(MetricValue::Null, MetricValue::Number),
            Value::String(s) => MetricValue::Text(s),
            other => MetricValue::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: MetricValue,
    pub unit: String,
}

/// One complete set of readings of a device, replaced wholesale by the next successful poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricSnapshot {
    readings: BTreeMap<String, Reading>,
}

impl MetricSnapshot {
    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.readings.get(key)
    }

    /// `true` when `key` is part of the snapshot with a non-null value.
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).map_or(false, |reading| !reading.value.is_null())
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reading)> {
        self.readings.iter().map(|(key, reading)| (key.as_str(), reading))
    }
}

impl FromIterator<(String, Reading)> for MetricSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Reading)>>(iter: I) -> Self {
        MetricSnapshot {
            readings: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_kind_codes() {
        assert_eq!(DeviceKind::StringInverter, DeviceKind::from_code(21));
        assert_eq!(DeviceKind::HybridInverter, DeviceKind::from_code(35));
        assert_eq!(DeviceKind::Unknown, DeviceKind::from_code(22));

        let kind: DeviceKind = serde_json::from_value(json!("35")).unwrap();
        assert_eq!(DeviceKind::HybridInverter, kind);
        for odd in [json!(null), json!(-1), json!(35.5), json!("hybrid"), json!([35])] {
            let kind: DeviceKind = serde_json::from_value(odd).unwrap();
            assert_eq!(DeviceKind::Unknown, kind);
        }
    }

    #[test]
    fn host_is_normalized() {
        let host = GatewayHost::new("http://192.168.1.20/", DEFAULT_WS_PORT);
        assert_eq!("192.168.1.20", host.host);
        assert_eq!("ws://192.168.1.20:8082/ws/home/overview", host.websocket_url());
        assert_eq!(
            "http://192.168.1.20/about/list",
            host.http_url(endpoint::ABOUT)
        );
    }

    #[test]
    fn metric_values() {
        assert_eq!(Some(43.5), MetricValue::from(json!("43.5")).as_f64());
        assert_eq!(Some(-0.28), MetricValue::from(json!(-0.28)).as_f64());
        assert_eq!(None, MetricValue::from(json!("--")).as_f64());
        assert!(MetricValue::from(json!(null)).is_null());
    }

    #[test]
    fn absent_key_differs_from_null_key() {
        let snapshot: MetricSnapshot = vec![(
            "I18N_COMMON_BUS_VOLTAGE".to_string(),
            Reading {
                value: MetricValue::Null,
                unit: "V".to_string(),
            },
        )]
        .into_iter()
        .collect();

        assert!(snapshot.get("I18N_COMMON_BUS_VOLTAGE").is_some());
        assert!(!snapshot.has_value("I18N_COMMON_BUS_VOLTAGE"));
        assert!(snapshot.get("I18N_COMMON_UB").is_none());
    }
}
