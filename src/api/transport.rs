use crate::api::Error;
use futures_util::{SinkExt, Stream, StreamExt};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Network access used by the session. One implementation talks to a real gateway; tests
/// substitute a scripted one.
pub trait Transport: Send + Sync + 'static {
    type Socket: Socket;

    /// Open a WebSocket connection to `url`.
    ///
    /// Fails with `Error::Timeout` when the attempt timed out (the session retries those) and
    /// with `Error::ConnectionError` otherwise.
    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Socket, Error>> + Send;

    /// Plain HTTP GET returning the status code and the body.
    fn get(&self, url: &str) -> impl Future<Output = Result<(u16, String), Error>> + Send;
}

/// An open WebSocket. Every failure is reported as `Error::LinkError` or `Error::Timeout`.
pub trait Socket: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Next text message; control frames are skipped.
    fn receive_text(&mut self) -> impl Future<Output = Result<String, Error>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub type ClientWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite for the WebSocket, reqwest for the HTTP endpoints.
pub struct WsTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .or(Err(Error::InternalError))?;

        Ok(WsTransport {
            client,
            connect_timeout,
            request_timeout,
        })
    }
}

/// Map reqwest failures: timeouts are retried by the caller, anything else means the gateway is
/// not reachable over HTTP.
fn map_http_err(url: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(format!("{}: {}", url, error))
    } else {
        Error::ConnectionError(format!("{}: {}", url, error))
    }
}

impl Transport for WsTransport {
    type Socket = WsSocket;

    async fn open(&self, url: &str) -> Result<WsSocket, Error> {
        match tokio::time::timeout(self.connect_timeout, connect_async(url)).await {
            Err(_) => Err(Error::Timeout(format!(
                "no handshake from {} within {:?}",
                url, self.connect_timeout
            ))),
            Ok(Err(TungsteniteError::Io(e))) if e.kind() == io::ErrorKind::TimedOut => {
                Err(Error::Timeout(format!("{}: {}", url, e)))
            }
            Ok(Err(e)) => Err(Error::ConnectionError(format!("{}: {}", url, e))),
            Ok(Ok((stream, response))) => {
                log::trace!("Handshake with {} answered {}", url, response.status());
                Ok(WsSocket {
                    stream,
                    request_timeout: self.request_timeout,
                })
            }
        }
    }

    async fn get(&self, url: &str) -> Result<(u16, String), Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_http_err(url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_http_err(url, e))?;
        Ok((status, body))
    }
}

pub struct WsSocket {
    stream: ClientWsStream,
    request_timeout: Duration,
}

async fn next_text<S>(stream: &mut S) -> Result<String, Error>
where
    S: Stream<Item = Result<Message, TungsteniteError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Binary(bin))) => {
                return Err(Error::LinkError(format!(
                    "unexpected binary frame ({} bytes)",
                    bin.len()
                )))
            }
            /* Pings are answered by tungstenite itself */
            Some(Ok(Message::Ping(_)))
            | Some(Ok(Message::Pong(_)))
            | Some(Ok(Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::LinkError(format!(
                    "connection closed by gateway: {:?}",
                    frame
                )))
            }
            Some(Err(e)) => return Err(Error::LinkError(e.to_string())),
            None => return Err(Error::LinkError("stream ended".to_string())),
        }
    }
}

impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::LinkError(e.to_string()))
    }

    async fn receive_text(&mut self) -> Result<String, Error> {
        match tokio::time::timeout(self.request_timeout, next_text(&mut self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response within {:?}",
                self.request_timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            log::trace!("Closing websocket: {}", e);
        }
    }
}
