//! HTTP/JSON transport to the controller.
//!
//! Each call opens a fresh connection (optionally wrapped in TLS), posts
//! `{"args": [...], "secret": "..."}` to `/rpc/<procedure>` and expects
//! `{"result": ...}` back. Socket, TLS and HTTP failures are mapped onto
//! [`TransportError`] so the executor can classify them.

use std::io;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::Transport;

/// Port the controller listens on unless configured otherwise.
pub const DEFAULT_CONTROLLER_PORT: u16 = 17443;

#[derive(Serialize)]
struct RpcRequest<'a> {
    args: &'a [Value],
    secret: &'a str,
}


#[derive(Clone)]
struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// Transport that speaks JSON over HTTP/1.1, with optional TLS.
#[derive(Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
    tls: Option<TlsSettings>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl HttpTransport {
    /// Plain-HTTP transport to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    /// Wrap every connection in TLS, verifying the server as `server_name`.
    pub fn with_tls(mut self, connector: TlsConnector, server_name: ServerName<'static>) -> Self {
        self.tls = Some(TlsSettings {
            connector,
            server_name,
        });
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    async fn exchange<S>(
        &self,
        stream: S,
        procedure: &str,
        body: Vec<u8>,
    ) -> Result<Value, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = self.peer();
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| hyper_error(e, &peer, procedure))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "controller connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(format!("/rpc/{procedure}"))
            .header("host", peer.as_str())
            .header("content-type", "application/json")
            .header("user-agent", concat!("gridctl/", env!("CARGO_PKG_VERSION")))
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TransportError::Protocol(format!("build request for {procedure}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| hyper_error(e, &peer, procedure))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| hyper_error(e, &peer, procedure))?
            .to_bytes();

        if status == StatusCode::NOT_IMPLEMENTED {
            return Err(TransportError::Unimplemented(procedure.to_string()));
        }
        if !status.is_success() {
            debug!(%status, procedure, "controller returned non-2xx");
            return Err(TransportError::Status {
                procedure: procedure.to_string(),
                status: status.as_u16(),
            });
        }

        decode_response(procedure, &bytes)
    }
}

impl Transport for HttpTransport {
    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn call(
        &self,
        procedure: &str,
        args: &[Value],
        secret: &str,
    ) -> Result<Value, TransportError> {
        let peer = self.peer();
        let body = serde_json::to_vec(&RpcRequest { args, secret })
            .map_err(|e| TransportError::Protocol(format!("encode {procedure} request: {e}")))?;

        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                debug!(error = %e, %peer, procedure, "controller connection failed");
                TransportError::from_io(e, &peer)
            })?;

        match &self.tls {
            Some(tls) => {
                let stream = tls
                    .connector
                    .connect(tls.server_name.clone(), stream)
                    .await
                    .map_err(|e| handshake_error(e, &peer))?;
                self.exchange(stream, procedure, body).await
            }
            None => self.exchange(stream, procedure, body).await,
        }
    }
}

/// Decode the JSON envelope of a successful HTTP response.
fn decode_response(procedure: &str, bytes: &[u8]) -> Result<Value, TransportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(TransportError::EmptyResponse(procedure.to_string()));
    }

    let mut envelope: Map<String, Value> = serde_json::from_slice(bytes)
        .map_err(|e| TransportError::Protocol(format!("decode {procedure} response: {e}")))?;

    match envelope.remove("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(message)) => {
            return Err(TransportError::Remote {
                procedure: procedure.to_string(),
                message,
            });
        }
        Some(other) => {
            return Err(TransportError::Remote {
                procedure: procedure.to_string(),
                message: other.to_string(),
            });
        }
    }

    // A present `null` result is an answer; only a missing key is empty.
    envelope
        .remove("result")
        .ok_or_else(|| TransportError::EmptyResponse(procedure.to_string()))
}

/// A failed TLS connect. Socket-level resets keep their own classification.
fn handshake_error(err: io::Error, peer: &str) -> TransportError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::from_io(err, peer),
        _ => TransportError::Handshake {
            peer: peer.to_string(),
            message: err.to_string(),
        },
    }
}

fn hyper_error(err: hyper::Error, peer: &str, procedure: &str) -> TransportError {
    if err.is_incomplete_message() {
        return TransportError::EmptyResponse(procedure.to_string());
    }

    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return TransportError::from_io(io::Error::new(io_err.kind(), io_err.to_string()), peer);
        }
        source = std::error::Error::source(cause);
    }

    if err.is_closed() || err.is_canceled() {
        return TransportError::ConnectionReset(peer.to_string());
    }
    TransportError::Protocol(format!("{procedure}: {err}"))
}
