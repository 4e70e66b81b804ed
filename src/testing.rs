//! Scripted in-memory gateway used by the tests of the session, the poll loops and discovery.

use crate::api::endpoint;
use crate::api::transport::{Socket, Transport};
use crate::api::Error;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// What the gateway does with one request to a service.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Value),
    /// Answer with result code 106 and invalidate the token.
    Expire,
    Fail { code: i64, message: String },
    /// Break the connection instead of answering.
    Drop,
    /// Never answer.
    Timeout,
}

#[derive(Default)]
struct State {
    open_attempts: u32,
    open_failures: VecDeque<Error>,
    connection: u64,
    connects: u32,
    tokens_issued: u32,
    valid_tokens: HashSet<String>,
    token_rejection: Option<Step>,
    scripts: HashMap<String, VecDeque<Step>>,
    defaults: HashMap<String, Step>,
    requests: Vec<Value>,
    http: HashMap<String, (u16, String)>,
}

#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<State>>,
}

impl FakeGateway {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` calls to `open` fail with `error`.
    pub fn fail_opens(&self, count: usize, error: Error) {
        self.state()
            .open_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn reject_tokens(&self, step: Step) {
        self.state().token_rejection = Some(step);
    }

    /// Steps consumed in order before falling back to the `respond` default.
    pub fn script(&self, service: &str, steps: Vec<Step>) {
        self.state()
            .scripts
            .entry(service.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn respond(&self, service: &str, step: Step) {
        self.state().defaults.insert(service.to_string(), step);
    }

    pub fn http(&self, path: &str, status: u16, body: &str) {
        self.state()
            .http
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn tokens_issued(&self) -> u32 {
        self.state().tokens_issued
    }

    pub fn requests(&self, service: &str) -> Vec<Value> {
        self.state()
            .requests
            .iter()
            .filter(|request| request["service"] == service)
            .cloned()
            .collect()
    }

    fn answer(&self, connection: u64, text: &str) -> Result<String, Error> {
        let mut state = self.state();
        if state.connection != connection {
            return Err(Error::LinkError("socket was closed".to_string()));
        }
        let request: Value = serde_json::from_str(text)
            .map_err(|e| Error::LinkError(format!("unparseable request: {}", e)))?;
        state.requests.push(request.clone());

        let service = request["service"].as_str().unwrap_or_default().to_string();
        if service == endpoint::CONNECT {
            if let Some(step) = state.token_rejection.clone() {
                return reply(&mut state, None, step);
            }
            state.tokens_issued += 1;
            let token = format!("token-{:04}-{}", state.tokens_issued, connection);
            state.valid_tokens.insert(token.clone());
            return Ok(success(json!({ "service": "connect", "token": token })));
        }

        let token = request["token"].as_str().unwrap_or_default().to_string();
        if !state.valid_tokens.contains(&token) {
            return Ok(envelope(106, "I18N_COMMON_TOKEN_EXPIRED", json!({})));
        }

        let step = match state.scripts.get_mut(&service).and_then(VecDeque::pop_front) {
            Some(step) => step,
            None => state.defaults.get(&service).cloned().unwrap_or(Step::Fail {
                code: 2,
                message: format!("no such service {}", service),
            }),
        };
        reply(&mut state, Some(token), step)
    }
}

fn envelope(code: i64, message: &str, data: Value) -> String {
    json!({ "result_code": code, "result_msg": message, "result_data": data }).to_string()
}

fn success(data: Value) -> String {
    envelope(1, "success", data)
}

fn reply(state: &mut State, token: Option<String>, step: Step) -> Result<String, Error> {
    match step {
        Step::Data(data) => Ok(success(data)),
        Step::Expire => {
            if let Some(token) = token {
                state.valid_tokens.remove(&token);
            }
            Ok(envelope(106, "I18N_COMMON_TOKEN_EXPIRED", json!({})))
        }
        Step::Fail { code, message } => Ok(envelope(code, &message, json!({}))),
        Step::Drop => {
            state.connection += 1;
            state.valid_tokens.clear();
            Err(Error::LinkError("connection reset by gateway".to_string()))
        }
        Step::Timeout => Err(Error::Timeout("gateway did not answer".to_string())),
    }
}

pub struct FakeSocket {
    gateway: FakeGateway,
    connection: u64,
    pending: Option<Result<String, Error>>,
}

impl Transport for FakeGateway {
    type Socket = FakeSocket;

    async fn open(&self, _url: &str) -> Result<FakeSocket, Error> {
        let mut state = self.state();
        state.open_attempts += 1;
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        state.connects += 1;
        state.connection += 1;
        state.valid_tokens.clear();
        Ok(FakeSocket {
            gateway: self.clone(),
            connection: state.connection,
            pending: None,
        })
    }

    async fn get(&self, url: &str) -> Result<(u16, String), Error> {
        let state = self.state();
        Ok(state
            .http
            .iter()
            .find(|(path, _)| url.ends_with(path.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or((404, "not found".to_string())))
    }
}

impl Socket for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.pending = Some(self.gateway.answer(self.connection, &text));
        Ok(())
    }

    async fn receive_text(&mut self) -> Result<String, Error> {
        self.pending
            .take()
            .unwrap_or_else(|| Err(Error::LinkError("nothing to receive".to_string())))
    }

    async fn close(&mut self) {
        let mut state = self.gateway.state();
        if state.connection == self.connection {
            state.connection += 1;
            state.valid_tokens.clear();
        }
    }
}

/// `devicelist` entry.
pub fn device(dev_id: u32, serial: &str, dev_type: u32) -> Value {
    let model = if dev_type == 35 { "SH10RT" } else { "SG5.0RS" };
    json!({
        "dev_id": dev_id,
        "dev_sn": serial,
        "dev_type": dev_type,
        "dev_model": model,
        "dev_name": format!("{}(COM1-00{})", model, dev_id),
    })
}

/// `real`/`real_battery` result data with one row per `(name, value)`.
pub fn rows(rows: &[(&str, Value)]) -> Value {
    let list: Vec<Value> = rows
        .iter()
        .map(|(name, value)| json!({ "data_name": name, "data_value": value, "data_unit": "" }))
        .collect();
    json!({ "list": list })
}
