use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The WebSocket connection could not be established.
    ConnectionError(String),
    /// A connect attempt or a single exchange did not complete in time.
    Timeout(String),
    /// An established connection broke in the middle of an exchange.
    LinkError(String),
    /// Non-success envelope (or non-200 HTTP status, in which case `code` is the status).
    ProtocolError { code: i64, message: String },
    /// Body that could not be decoded: `(body, reason)`.
    InvalidResponse(String, String),
    SetupNotReady(String),
    FormatError,
    InternalError,
}

impl Error {
    /// Failures of an already open connection; the session recovers from these by reconnecting.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::LinkError(_) | Error::Timeout(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionError(s) => write!(f, "connection error: {}", s),
            Error::Timeout(s) => write!(f, "timeout: {}", s),
            Error::LinkError(s) => write!(f, "connection lost: {}", s),
            Error::ProtocolError { code, message } => {
                write!(f, "unknown result returned from server: {}:{}", code, message)
            }
            Error::InvalidResponse(body, reason) => {
                write!(f, "invalid response ({}): {}", reason, body)
            }
            Error::SetupNotReady(s) => write!(f, "gateway not ready: {}", s),
            Error::FormatError => write!(f, "unable to format metrics"),
            Error::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = match self {
            Error::SetupNotReady(_) => Status::ServiceUnavailable,
            Error::ConnectionError(_) | Error::Timeout(_) | Error::LinkError(_) => {
                Status::BadGateway
            }
            _ => Status::InternalServerError,
        };
        let error = format!(
            "<html><body><h3>{}</h3>WiNet-S gateway: <code>{}</code></body></html>",
            status, self
        );
        Response::build()
            .status(status)
            .sized_body(error.len(), Cursor::new(error))
            .header(ContentType::new("text", "html"))
            .ok()
    }
}
