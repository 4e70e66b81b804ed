use crate::model::DeviceKind;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct Data {
    pub dev_id: u32,
    pub dev_sn: String,
    #[serde(default)]
    pub dev_type: DeviceKind,
    #[serde(default)]
    pub dev_model: String,
    #[serde(default)]
    pub dev_name: String,
}

#[derive(Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub list: Vec<Data>,
}
