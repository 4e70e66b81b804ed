use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct Row {
    pub data_name: String,
    #[serde(default)]
    pub data_value: Value,
}

impl Row {
    pub fn text(&self) -> String {
        match &self.data_value {
            Value::String(s) => s.to_owned(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
pub struct AboutList {
    #[serde(default)]
    pub list: Vec<Row>,
}
