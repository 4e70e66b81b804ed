use serde::Deserialize;
use serde_json::Value;

/* { "service": "connect", "token": "848a0ca3-…", "uid": 1, "tips_disable": 0 } */
#[derive(Deserialize)]
pub struct Connect {
    pub token: String,
    #[serde(default)]
    pub uid: Value,
    #[serde(default)]
    pub tips_disable: Value,
}
