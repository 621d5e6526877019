//! HTTP exchange with the appliance management API.
//!
//! The transport only moves bytes: it sends one request and returns the raw
//! status and body. Interpreting the answer is left to the classifier.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ApplianceConfig;

const USER_AGENT: &str = concat!("jovian-csi/", env!("CARGO_PKG_VERSION"));

/// HTTP verbs used by the management API.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

/// One request to the management API. `path` is relative to the API root,
/// for example `api/v3/pools/Pool-0/volumes`.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path and query relative to the API root.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Builds a body-less request.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status code and undecoded body returned by the appliance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Builds a response from a status and a JSON value.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Failures raised before the appliance produced an answer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when no configured address accepted the connection.
    #[error("unable to reach appliance at {address}: {message}")]
    Unreachable {
        /// Last address tried.
        address: String,
        /// Client error message.
        message: String,
    },
    /// Raised when the exchange exceeded the configured timeout.
    #[error("request {path} timed out at {address}")]
    Timeout {
        /// Address the request was sent to.
        address: String,
        /// Request path.
        path: String,
    },
    /// Raised when the request could not be built or its body read.
    #[error("invalid request {path}: {message}")]
    InvalidRequest {
        /// Request path.
        path: String,
        /// Client error message.
        message: String,
    },
    /// Raised when the appliance answered but its body could not be read.
    /// The request already ran, so it is never replayed elsewhere.
    #[error("request {path} to {address} answered {status} but the body was lost: {message}")]
    Body {
        /// Address that answered.
        address: String,
        /// Request path.
        path: String,
        /// Status line received before the failure.
        status: u16,
        /// Client error message.
        message: String,
    },
    /// Raised when the configuration lists no appliance address.
    #[error("no appliance address configured")]
    NoAddress,
}

/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>>;

/// Seam between the classified appliance client and the wire.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw answer.
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a>;
}

/// `reqwest`-backed transport with basic authentication and address
/// failover.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    protocol: String,
    addrs: Vec<String>,
    port: u16,
    user: String,
    password: String,
    tries: usize,
    active: AtomicUsize,
}

impl HttpTransport {
    /// Builds a transport from the appliance configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoAddress`] when no address is configured
    /// and [`TransportError::InvalidRequest`] when the HTTP client cannot be
    /// built.
    pub fn new(config: &ApplianceConfig) -> Result<Self, TransportError> {
        let addrs = config.addresses();
        if addrs.is_empty() {
            return Err(TransportError::NoAddress);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(!config.tls_verify)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| TransportError::InvalidRequest {
                path: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            protocol: config.protocol.clone(),
            addrs,
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            tries: usize::try_from(config.tries).unwrap_or(1).max(1),
            active: AtomicUsize::new(0),
        })
    }

    fn url(&self, address: &str, path: &str) -> String {
        format!("{}://{address}:{}/{path}", self.protocol, self.port)
    }

    async fn send_to(
        &self,
        address: &str,
        request: &ApiRequest,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url(address, &request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .client
            .request(method, &url)
            .basic_auth(&self.user, Some(&self.password));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout {
                    address: address.to_owned(),
                    path: request.path.clone(),
                }
            } else if err.is_connect() {
                TransportError::Unreachable {
                    address: address.to_owned(),
                    message: err.to_string(),
                }
            } else {
                TransportError::InvalidRequest {
                    path: request.path.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Body {
                address: address.to_owned(),
                path: request.path.clone(),
                status,
                message: err.to_string(),
            })?;
        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut last_error = TransportError::NoAddress;
            for _ in 0..self.tries {
                let index = self
                    .active
                    .load(Ordering::Relaxed)
                    .checked_rem(self.addrs.len())
                    .unwrap_or(0);
                let Some(address) = self.addrs.get(index) else {
                    break;
                };
                debug!(method = %request.method, path = %request.path, %address, "sending");
                match self.send_to(address, request).await {
                    Ok(response) => return Ok(response),
                    Err(
                        err @ (TransportError::InvalidRequest { .. } | TransportError::Body { .. }),
                    ) => return Err(err),
                    Err(err) => {
                        warn!(%address, error = %err, "appliance address failed, rotating");
                        self.active.store(index.wrapping_add(1), Ordering::Relaxed);
                        last_error = err;
                    }
                }
            }
            Err(last_error)
        })
    }
}
