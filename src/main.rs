#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use rocket::fairing::AdHoc;
use rocket::http::ContentType;
use rocket::{Build, Rocket, State};
use std::sync::Arc;
use sungrow_winet_rs::api::transport::WsTransport;
use sungrow_winet_rs::api::{Error, Session};
use sungrow_winet_rs::coordinator::LoopView;
use sungrow_winet_rs::settings::{read_settings, Settings};
use sungrow_winet_rs::WiNet;

mod metrics;

type Gateway = WiNet<WsTransport>;

/// Structure containing state for API handlers.
pub struct StateData {
    winet: Arc<Gateway>,
    exporter: metrics::Exporter,
}

fn json<S: serde::Serialize>(value: &S) -> Result<(ContentType, String), Error> {
    serde_json::to_string(value)
        .map(|body| (ContentType::JSON, body))
        .or(Err(Error::FormatError))
}

#[get("/metrics")]
fn metrics_route() -> Result<String, Error> {
    metrics::read()
}

#[get("/devices")]
fn devices_route(state: &State<StateData>) -> Result<(ContentType, String), Error> {
    let views: Vec<LoopView> = state
        .winet
        .inverter_loops()
        .iter()
        .chain(state.winet.battery_loops().iter())
        .map(|handle| handle.view())
        .collect();
    json(&views)
}

#[get("/winet")]
fn winet_route(state: &State<StateData>) -> Result<(ContentType, String), Error> {
    let info = state
        .winet
        .info()
        .ok_or_else(|| Error::SetupNotReady(state.winet.host().host.clone()))?;
    json(&info)
}

/// Set up the gateway, waiting for it as long as it is not reachable.
async fn set_up(settings: &Settings) -> Result<Arc<Gateway>, Error> {
    loop {
        let transport = WsTransport::new(settings.connect_timeout(), settings.request_timeout())?;
        let session = Session::new(
            settings.gateway_host(),
            transport,
            settings.session_settings(),
        );
        let winet = WiNet::new(session, settings.poll_settings());

        match winet.setup().await {
            Ok(()) => return Ok(winet),
            Err(Error::SetupNotReady(reason)) => {
                log::warn!(
                    "Gateway not ready ({}), retrying in {:?}",
                    reason,
                    settings.setup_retry()
                );
                winet.shutdown().await;
                tokio::time::sleep(settings.setup_retry()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[launch]
async fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = read_settings().expect("Configuration error");
    let winet = set_up(&settings)
        .await
        .expect("Unable to set up the WiNet-S gateway");
    let exporter = metrics::Exporter::start(Arc::clone(&winet));
    let state = StateData { winet, exporter };

    rocket::build()
        .manage(state)
        .attach(AdHoc::on_shutdown("Stop polling", |rocket| {
            Box::pin(async move {
                if let Some(state) = rocket.state::<StateData>() {
                    state.exporter.stop();
                    state.winet.shutdown().await;
                }
            })
        }))
        .mount("/", routes![metrics_route, devices_route, winet_route])
}
