use serde::Deserialize;
use serde_json::Value;

/* Shared by `real` and `real_battery` */
#[derive(Deserialize)]
pub struct Row {
    pub data_name: String,
    #[serde(default)]
    pub data_value: Value,
    #[serde(default)]
    pub data_unit: Option<String>,
}

#[derive(Deserialize)]
pub struct Real {
    #[serde(default)]
    pub list: Vec<Row>,
}
