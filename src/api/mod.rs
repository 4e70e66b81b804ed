pub mod endpoint;
pub mod error;
pub mod response;
pub mod transport;

use crate::model::{GatewayHost, MetricSnapshot, MetricValue, Reading, WiNetInfo};
use crate::retry::RetryPolicy;
pub use error::Error;
use response::about::AboutList;
use response::connect::Connect;
use response::real::Real;
use response::Reply;
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use transport::{Socket, Transport};

pub type Params = Map<String, Value>;

pub const DEFAULT_LANG: &str = "en_us";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub lang: String,
    /// Opening the WebSocket; only timed out attempts are retried.
    pub connect: RetryPolicy,
    /// Recovering a call from token expiry or a dropped connection.
    pub recover: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            lang: DEFAULT_LANG.to_string(),
            connect: RetryPolicy::bounded(10, Duration::from_secs(1)),
            recover: RetryPolicy::unbounded(Duration::ZERO),
        }
    }
}

/// A token is only valid on the connection it was obtained on.
enum Connection<S> {
    Disconnected,
    Connected { socket: S, token: Option<String> },
}

/// The single WebSocket session to one WiNet-S gateway.
///
/// The gateway has no request ids, so exactly one exchange may be in flight; `&mut self` on
/// every WebSocket operation enforces that.
pub struct Session<T: Transport> {
    host: GatewayHost,
    transport: T,
    settings: SessionSettings,
    connection: Connection<T::Socket>,
}

pub fn params<const N: usize>(pairs: [(&str, Value); N]) -> Params {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn envelope(lang: &str, token: &str, service: &str, params: &Params) -> Value {
    let mut msg = self::params([
        ("lang", Value::from(lang)),
        ("token", Value::from(token)),
        ("service", Value::from(service)),
    ]);
    for (key, value) in params {
        msg.insert(key.clone(), value.clone());
    }
    Value::Object(msg)
}

fn token_hint(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn exchange<S: Socket>(socket: &mut S, request: Value) -> Result<response::Envelope, Error> {
    socket.send_text(request.to_string()).await?;
    let text = socket.receive_text().await?;
    log::debug!("Received {}", text);
    response::parse(&text)
}

impl<T: Transport> Session<T> {
    pub fn new(host: GatewayHost, transport: T, settings: SessionSettings) -> Self {
        Session {
            host,
            transport,
            settings,
            connection: Connection::Disconnected,
        }
    }

    pub fn host(&self) -> &GatewayHost {
        &self.host
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection, Connection::Connected { .. })
    }

    pub fn has_token(&self) -> bool {
        matches!(
            self.connection,
            Connection::Connected { token: Some(_), .. }
        )
    }

    /// Open the WebSocket unless it is already open. Every new connection starts without a token.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }

        let url = self.host.websocket_url();
        log::debug!("Opening websocket connection to {}...", url);
        let opened = self
            .settings
            .connect
            .run(
                &mut self.transport,
                |transport| {
                    let url = url.clone();
                    Box::pin(async move { transport.open(&url).await })
                },
                Error::is_timeout,
            )
            .await;

        match opened {
            Ok(socket) => {
                log::debug!("...connected!");
                self.connection = Connection::Connected {
                    socket,
                    token: None,
                };
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                log::error!("Failed to connect to {}: {}", url, e);
                Err(Error::ConnectionError(format!("Failed to connect to {}: {}", url, e)))
            }
            Err(e) => {
                log::error!("Failed to connect to {}: {}", url, e);
                Err(e)
            }
        }
    }

    /// Connect if needed and return the token of the current connection, requesting one first
    /// when none is held.
    pub async fn ensure_token(&mut self) -> Result<String, Error> {
        self.connect().await?;

        let (socket, token) = match &mut self.connection {
            Connection::Connected { socket, token } => (socket, token),
            Connection::Disconnected => return Err(Error::InternalError),
        };
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let request = envelope(&self.settings.lang, "", endpoint::CONNECT, &Params::new());
        log::debug!("Requesting token with {}.", request);
        let reply = exchange(socket, request).await?;

        let (code, message) = (reply.result_code, reply.result_msg.clone());
        let data = match response::decode(reply) {
            Ok(Reply::Data(data)) => data,
            Ok(Reply::TokenExpired) | Err(_) => {
                log::error!(
                    "The '{}' service responded with result {}:{}",
                    endpoint::CONNECT,
                    code,
                    message
                );
                return Err(Error::ProtocolError { code, message });
            }
        };
        let issued = response::payload::<Connect>(data)?.token;
        log::debug!("Got token {}…", token_hint(&issued));
        *token = Some(issued.clone());
        Ok(issued)
    }

    fn forget_token(&mut self) {
        if let Connection::Connected { token, .. } = &mut self.connection {
            *token = None;
        }
    }

    async fn try_call(&mut self, service: &str, params: &Params) -> Result<Reply, Error> {
        let token = self.ensure_token().await?;
        let request = envelope(&self.settings.lang, &token, service, params);
        log::debug!("Sending {} {}", service, Value::Object(params.clone()));

        let socket = match &mut self.connection {
            Connection::Connected { socket, .. } => socket,
            Connection::Disconnected => return Err(Error::InternalError),
        };
        let reply = exchange(socket, request).await?;
        response::decode(reply).map_err(|e| {
            log::error!("Unknown result from '{}': {}", service, e);
            e
        })
    }

    /// Send one request and return its `result_data`.
    ///
    /// Token expiry and a broken connection are recovered from transparently, according to the
    /// `recover` policy. A gateway that cannot be connected to fails the call with
    /// `Error::ConnectionError`; any other non-success reply with `Error::ProtocolError`.
    pub async fn call(&mut self, service: &str, params: Params) -> Result<Value, Error> {
        let mut recoveries: u32 = 0;
        loop {
            let cause = match self.try_call(service, &params).await {
                Ok(Reply::Data(data)) => return Ok(data),
                Ok(Reply::TokenExpired) => {
                    log::debug!("Token expired during '{}'", service);
                    self.forget_token();
                    Error::ProtocolError {
                        code: response::ResultCode::TokenExpired as i64,
                        message: "token expired".to_string(),
                    }
                }
                Err(e) if e.is_link_failure() => {
                    log::debug!("Connection lost during '{}': {}", service, e);
                    self.close().await;
                    e
                }
                Err(e) => return Err(e),
            };

            recoveries += 1;
            if !self.settings.recover.allows_retry(recoveries) {
                log::error!("Giving up '{}' after {} recoveries", service, recoveries);
                return Err(cause);
            }
            self.settings.recover.pause().await;
        }
    }

    /// GET one of the plain HTTP endpoints; no WebSocket, no token.
    pub async fn http_get(&mut self, path: &endpoint::Path) -> Result<Value, Error> {
        let url = self.host.http_url(path);
        let mut recoveries: u32 = 0;
        loop {
            log::debug!("GETting from {}.", url);
            let (status, body) = self.transport.get(&url).await?;
            if status != http::StatusCode::OK.as_u16() {
                log::error!("{} returned status code {}", url, status);
                return Err(Error::ProtocolError {
                    code: i64::from(status),
                    message: format!("Unexpected status code {} from {}.", status, url),
                });
            }
            log::debug!("Received {}", body);

            match response::decode(response::parse(&body)?)? {
                Reply::Data(data) => return Ok(data),
                Reply::TokenExpired => {
                    recoveries += 1;
                    if !self.settings.recover.allows_retry(recoveries) {
                        return Err(Error::ProtocolError {
                            code: response::ResultCode::TokenExpired as i64,
                            message: format!("token expired from {}", url),
                        });
                    }
                    self.settings.recover.pause().await;
                }
            }
        }
    }

    /// Close the connection if one is open.
    pub async fn close(&mut self) {
        if let Connection::Connected { mut socket, .. } =
            std::mem::replace(&mut self.connection, Connection::Disconnected)
        {
            socket.close().await;
        }
    }

    /// Identity of the WiNet-S dongle.
    pub async fn get_wi_net_info(&mut self) -> Result<WiNetInfo, Error> {
        let about = response::payload::<AboutList>(self.http_get(endpoint::ABOUT).await?)?;

        let mut info = WiNetInfo::default();
        for row in about.list {
            match row.data_name.as_str() {
                "I18N_COMMON_DEVICE_SN" => info.device_sn = row.text(),
                "I18N_COMMON_VERSION" => info.device_version = row.text(),
                "I18N_COMMON_APPLI_SOFT_VERSION" => info.software_version = row.text(),
                "I18N_COMMON_BUILD_SOFT_VERSION" => info.software_build_version = row.text(),
                _ => log::info!("Unexpected data {} = {}", row.data_name, row.text()),
            }
        }
        Ok(info)
    }

    /// Realtime readings of the inverter with gateway-local id `dev_id`.
    pub async fn real(&mut self, dev_id: u32) -> Result<MetricSnapshot, Error> {
        self.realtime(endpoint::REAL, dev_id).await
    }

    /// Realtime readings of the battery attached to hybrid inverter `dev_id`.
    pub async fn real_battery(&mut self, dev_id: u32) -> Result<MetricSnapshot, Error> {
        self.realtime(endpoint::REAL_BATTERY, dev_id).await
    }

    async fn realtime(
        &mut self,
        service: &endpoint::Service,
        dev_id: u32,
    ) -> Result<MetricSnapshot, Error> {
        let request = params([
            ("dev_id", Value::from(dev_id.to_string())),
            ("time123456", Value::from(unix_now())),
        ]);
        let real = response::payload::<Real>(self.call(service, request).await?)?;

        Ok(real
            .list
            .into_iter()
            .map(|row| {
                (
                    row.data_name,
                    Reading {
                        value: MetricValue::from(row.data_value),
                        unit: row.data_unit.unwrap_or_default(),
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{FakeGateway, Step};
    use serde_json::json;

    fn session(gateway: &FakeGateway) -> Session<FakeGateway> {
        Session::new(
            GatewayHost::new("winet.local", 8082),
            gateway.clone(),
            SessionSettings::default(),
        )
    }

    #[test]
    fn request_envelope() {
        let request = envelope(
            "en_us",
            "abc",
            endpoint::DEVICE_LIST,
            &params([("type", json!("0")), ("is_check_token", json!("0"))]),
        );
        assert_eq!(
            json!({
                "lang": "en_us",
                "token": "abc",
                "service": "devicelist",
                "type": "0",
                "is_check_token": "0"
            }),
            request
        );
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_resets_token() {
        let gateway = FakeGateway::default();
        let mut session = session(&gateway);

        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(1, gateway.connects());
        assert!(!session.has_token());

        session.ensure_token().await.unwrap();
        assert!(session.has_token());

        session.close().await;
        session.connect().await.unwrap();
        assert_eq!(2, gateway.connects());
        assert!(!session.has_token());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_timeouts_up_to_the_bound() {
        let gateway = FakeGateway::default();
        gateway.fail_opens(9, Error::Timeout("handshake".to_string()));
        let mut session = session(&gateway);

        session.connect().await.unwrap();
        assert_eq!(1, gateway.connects());
        assert_eq!(10, gateway.open_attempts());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_ten_attempts() {
        let gateway = FakeGateway::default();
        gateway.fail_opens(10, Error::Timeout("handshake".to_string()));
        let mut session = session(&gateway);

        let started = tokio::time::Instant::now();
        let result = session.connect().await;
        assert!(started.elapsed() >= Duration::from_secs(9));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(result, Err(Error::ConnectionError(_))));
        assert_eq!(10, gateway.open_attempts());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn refused_connection_is_not_retried() {
        let gateway = FakeGateway::default();
        gateway.fail_opens(1, Error::ConnectionError("refused".to_string()));
        let mut session = session(&gateway);

        assert!(matches!(
            session.call(endpoint::DEVICE_LIST, Params::new()).await,
            Err(Error::ConnectionError(_))
        ));
        assert_eq!(1, gateway.open_attempts());
    }

    #[tokio::test]
    async fn token_is_requested_once_per_connection() {
        let gateway = FakeGateway::default();
        gateway.respond(endpoint::REAL, Step::Data(json!({ "list": [] })));
        let mut session = session(&gateway);

        for _ in 0..3 {
            session.real(1).await.unwrap();
        }
        assert_eq!(1, gateway.tokens_issued());
        assert_eq!(3, gateway.requests(endpoint::REAL).len());
    }

    #[tokio::test]
    async fn token_expiry_is_transparent() {
        let gateway = FakeGateway::default();
        gateway.script(
            endpoint::REAL,
            vec![Step::Expire, Step::Expire, Step::Expire],
        );
        gateway.respond(
            endpoint::REAL,
            Step::Data(json!({ "list": [
                { "data_name": "I18N_COMMON_BUS_VOLTAGE", "data_value": "652.0", "data_unit": "V" }
            ]})),
        );
        let mut session = session(&gateway);

        let snapshot = session.real(1).await.unwrap();
        let bus_voltage = snapshot.get("I18N_COMMON_BUS_VOLTAGE").unwrap();
        assert_eq!(Some(652.0), bus_voltage.value.as_f64());
        assert_eq!(4, gateway.tokens_issued());
        assert_eq!(1, gateway.connects());
    }

    #[tokio::test]
    async fn dropped_connection_is_reopened() {
        let gateway = FakeGateway::default();
        gateway.script(endpoint::DEVICE_LIST, vec![Step::Drop, Step::Timeout]);
        gateway.respond(endpoint::DEVICE_LIST, Step::Data(json!({ "list": [] })));
        let mut session = session(&gateway);

        let data = session.call(endpoint::DEVICE_LIST, Params::new()).await.unwrap();
        assert_eq!(json!({ "list": [] }), data);
        assert_eq!(3, gateway.connects());
        assert_eq!(3, gateway.tokens_issued());
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let gateway = FakeGateway::default();
        gateway.script(
            endpoint::REAL,
            vec![Step::Fail {
                code: 3,
                message: "I18N_COMMON_BUSY".to_string(),
            }],
        );
        let mut session = session(&gateway);

        assert_eq!(
            Err(Error::ProtocolError {
                code: 3,
                message: "I18N_COMMON_BUSY".to_string()
            }),
            session.real(1).await
        );
        assert_eq!(1, gateway.requests(endpoint::REAL).len());
    }

    #[tokio::test]
    async fn rejected_token_request() {
        let gateway = FakeGateway::default();
        gateway.reject_tokens(Step::Fail {
            code: 4,
            message: "I18N_COMMON_LOGIN_LIMIT".to_string(),
        });
        let mut session = session(&gateway);

        assert!(matches!(
            session.ensure_token().await,
            Err(Error::ProtocolError { code: 4, .. })
        ));
    }

    #[tokio::test]
    async fn bounded_recovery_surfaces_the_cause() {
        let gateway = FakeGateway::default();
        gateway.respond(endpoint::REAL, Step::Expire);
        let mut session = Session::new(
            GatewayHost::new("winet.local", 8082),
            gateway.clone(),
            SessionSettings {
                recover: RetryPolicy::bounded(3, Duration::ZERO),
                ..SessionSettings::default()
            },
        );

        assert!(matches!(
            session.real(1).await,
            Err(Error::ProtocolError { code: 106, .. })
        ));
        assert_eq!(3, gateway.requests(endpoint::REAL).len());
    }

    fn fixture_data(text: &str) -> Value {
        response::parse(text).unwrap().result_data
    }

    #[tokio::test]
    async fn realtime_snapshots() {
        let gateway = FakeGateway::default();
        gateway.respond(
            endpoint::REAL,
            Step::Data(fixture_data(include_str!("../../resources/test/real.json"))),
        );
        gateway.respond(
            endpoint::REAL_BATTERY,
            Step::Data(fixture_data(include_str!(
                "../../resources/test/real_battery.json"
            ))),
        );
        let mut session = session(&gateway);

        let snapshot = session.real(1).await.unwrap();
        let daily = snapshot.get("I18N_COMMON_PV_DAYILY_ENERGY_GENERATION").unwrap();
        assert_eq!(Some(43.5), daily.value.as_f64());
        assert_eq!("kWh", daily.unit);
        assert_eq!(
            MetricValue::Text("--".to_string()),
            snapshot
                .get("I18N_COMMON_PHASE_A_BACKUP_VOLTAGE_PEIYFKXE")
                .unwrap()
                .value
        );
        assert!(snapshot.get("I18N_COMMON_METER_GRID_FREQ_AMMAKPKU").is_some());
        assert!(!snapshot.has_value("I18N_COMMON_METER_GRID_FREQ_AMMAKPKU"));

        let battery = session.real_battery(1).await.unwrap();
        assert_eq!(4, battery.len());
        assert!(battery.has_value("I18N_COMMON_BATTERY_SOC"));
    }

    #[tokio::test]
    async fn realtime_request_parameters() {
        let gateway = FakeGateway::default();
        gateway.respond(endpoint::REAL_BATTERY, Step::Data(json!({ "list": [] })));
        let mut session = session(&gateway);

        session.real_battery(7).await.unwrap();
        let request = &gateway.requests(endpoint::REAL_BATTERY)[0];
        assert_eq!("7", request["dev_id"]);
        assert_eq!("en_us", request["lang"]);
        assert!(request["time123456"].as_u64().unwrap() > 1_600_000_000);
        assert!(!request["token"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wi_net_info() {
        let gateway = FakeGateway::default();
        gateway.http(
            endpoint::ABOUT,
            200,
            include_str!("../../resources/test/about_list.json"),
        );
        let mut session = session(&gateway);

        let info = session.get_wi_net_info().await.unwrap();
        assert_eq!(
            WiNetInfo {
                device_sn: "B2311452938".to_string(),
                device_version: "M_WiNet-S_V01_V01_A".to_string(),
                software_version: "WINET-SV200.001.00.P020".to_string(),
                software_build_version: "WINET-SV200.001.00.B001".to_string(),
            },
            info
        );
        assert_eq!(0, gateway.connects());
    }

    #[tokio::test]
    async fn http_status_is_checked() {
        let gateway = FakeGateway::default();
        gateway.http(endpoint::ABOUT, 404, "not found");
        let mut session = session(&gateway);

        assert!(matches!(
            session.get_wi_net_info().await,
            Err(Error::ProtocolError { code: 404, .. })
        ));
    }
}
