pub mod about;
pub mod connect;
pub mod device_list;
pub mod real;

use crate::api::Error;
use num_derive::FromPrimitive;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/* Known `result_code` values; anything else is a hard protocol error */
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ResultCode {
    Success = 1,
    TokenExpired = 106,
}

/* Common envelope of every HTTP and WebSocket reply */
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub result_code: i64,
    #[serde(default)]
    pub result_msg: String,
    #[serde(default)]
    pub result_data: Value,
}

/// Decoded envelope which is not a hard failure.
#[derive(Debug, PartialEq)]
pub enum Reply {
    Data(Value),
    /// The token used for the request is no longer valid; drop it and retry.
    TokenExpired,
}

pub fn parse(text: &str) -> Result<Envelope, Error> {
    serde_json::from_str::<Envelope>(text)
        .map_err(|e| Error::InvalidResponse(text.to_string(), e.to_string()))
}

pub fn decode(envelope: Envelope) -> Result<Reply, Error> {
    match num::FromPrimitive::from_i64(envelope.result_code) {
        Some(ResultCode::Success) => Ok(Reply::Data(envelope.result_data)),
        Some(ResultCode::TokenExpired) => Ok(Reply::TokenExpired),
        None => Err(Error::ProtocolError {
            code: envelope.result_code,
            message: envelope.result_msg,
        }),
    }
}

/// Deserialize `result_data` into one of the typed payloads of this module.
pub fn payload<T: DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value::<T>(data.clone())
        .map_err(|e| Error::InvalidResponse(data.to_string(), e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::DeviceKind;
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    fn data(filename: &str) -> Value {
        match decode(parse(&read_resource(filename)).unwrap()).unwrap() {
            Reply::Data(data) => data,
            Reply::TokenExpired => panic!("unexpected token expiry in {}", filename),
        }
    }

    #[test]
    fn connect() {
        let output: connect::Connect = payload(data("connect.json")).unwrap();
        assert_eq!("848a0ca3-b37d-46c1-aa95-921936ee5e87", output.token);
    }

    #[test]
    fn token_expired() {
        let envelope = parse(&read_resource("token_expired.json")).unwrap();
        assert_eq!(Reply::TokenExpired, decode(envelope).unwrap());
    }

    #[test]
    fn unknown_result_code() {
        let envelope = parse(r#"{"result_code": 3, "result_msg": "I18N_COMMON_BUSY"}"#).unwrap();
        assert_eq!(
            Error::ProtocolError {
                code: 3,
                message: "I18N_COMMON_BUSY".to_string()
            },
            decode(envelope).unwrap_err()
        );
    }

    #[test]
    fn missing_result_code_is_a_failure() {
        let envelope = parse(r#"{"result_msg": "?"}"#).unwrap();
        assert!(matches!(
            decode(envelope),
            Err(Error::ProtocolError { code: 0, .. })
        ));
    }

    #[test]
    fn device_list() {
        let output: device_list::DeviceList = payload(data("devicelist.json")).unwrap();
        assert_eq!(2, output.list.len());
        assert_eq!("A2320857820", output.list[0].dev_sn);
        assert_eq!(DeviceKind::HybridInverter, output.list[0].dev_type);
        assert_eq!("SH10RT(COM1-001)", output.list[0].dev_name);
        assert_eq!(DeviceKind::StringInverter, output.list[1].dev_type);
    }

    #[test]
    fn real() {
        let output: real::Real = payload(data("real.json")).unwrap();
        assert_eq!("I18N_COMMON_PV_DAYILY_ENERGY_GENERATION", output.list[0].data_name);
        assert_eq!(Value::from("43.5"), output.list[0].data_value);
        assert_eq!(Some("kWh".to_string()), output.list[0].data_unit);
        assert_eq!(Value::Null, output.list[7].data_value);
    }

    #[test]
    fn about_list() {
        let output: about::AboutList = payload(data("about_list.json")).unwrap();
        assert_eq!("B2311452938", output.list[0].text());
    }

    #[test]
    fn invalid_json() {
        assert!(matches!(
            parse(&read_resource("invalid_json.json")),
            Err(Error::InvalidResponse(_, _))
        ));
    }

    #[test]
    fn wrong_payload_shape() {
        let result = payload::<device_list::DeviceList>(serde_json::json!({"list": 1}));
        assert!(matches!(result, Err(Error::InvalidResponse(_, _))));
    }
}
