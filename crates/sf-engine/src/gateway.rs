//! Client side of the worker protocol with ordered failover.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sf_types::{config_error, CalError, CalResult, Curve, ParameterSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::protocol::{self, ACK};

/// Default bound on connecting, sending and receiving the acknowledgement.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Address of one simulation worker, written `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerEndpoint {
    pub host: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for WorkerEndpoint {
    type Err = CalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| config_error!("worker endpoint '{s}' is not host:port"))?;
        if host.is_empty() {
            return Err(config_error!("worker endpoint '{s}' has no host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| config_error!("worker endpoint '{s}' has invalid port: {e}"))?;
        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for WorkerEndpoint {
    type Error = CalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerEndpoint> for String {
    fn from(endpoint: WorkerEndpoint) -> Self {
        endpoint.address()
    }
}

/// Why a single endpoint attempt failed. Never leaves the gateway.
#[derive(Debug, thiserror::Error)]
enum EndpointError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("timed out during {stage}")]
    Timeout { stage: &'static str },
    #[error("unexpected acknowledgement {received:?}")]
    UnexpectedAck { received: String },
    #[error("communication error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed result payload: {0}")]
    Decode(String),
}

/// Errors surfaced by the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no simulation workers configured")]
    NoEndpoints,
    #[error("could not encode parameters: {message}")]
    Encode { message: String },
    #[error("all {attempted} simulation workers unreachable (last error: {last_error})")]
    AllWorkersUnreachable { attempted: usize, last_error: String },
}

impl From<GatewayError> for CalError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NoEndpoints => {
                CalError::Config("no simulation workers configured".to_string())
            }
            GatewayError::Encode { message } => CalError::Internal(message),
            GatewayError::AllWorkersUnreachable {
                attempted,
                last_error,
            } => CalError::WorkersUnreachable {
                attempted,
                last_error,
            },
        }
    }
}

/// Anything that turns a parameter set into a simulated curve.
///
/// Only [`CalError::WorkersUnreachable`] is treated as fatal by callers;
/// every other error is scored as a failed evaluation.
#[async_trait]
pub trait SimulationBackend: Send + Sync {
    async fn simulate(&self, params: &ParameterSet) -> CalResult<Curve>;
}

#[async_trait]
impl<T: SimulationBackend + ?Sized> SimulationBackend for Arc<T> {
    async fn simulate(&self, params: &ParameterSet) -> CalResult<Curve> {
        (**self).simulate(params).await
    }
}

/// Sends each request to the first worker that accepts it.
///
/// Endpoints are tried once each, in order. After a worker acknowledges the
/// request the gateway waits without a deadline for the result, since a
/// simulation may run for minutes and cannot be cancelled remotely.
#[derive(Debug, Clone)]
pub struct SimulationGateway {
    endpoints: Vec<WorkerEndpoint>,
    handshake_timeout: Duration,
}

impl SimulationGateway {
    pub fn new(endpoints: Vec<WorkerEndpoint>) -> Result<Self, GatewayError> {
        if endpoints.is_empty() {
            return Err(GatewayError::NoEndpoints);
        }
        Ok(Self {
            endpoints,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn endpoints(&self) -> &[WorkerEndpoint] {
        &self.endpoints
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Run one simulation on the first worker that accepts it.
    pub async fn call(&self, params: &ParameterSet) -> Result<Curve, GatewayError> {
        let payload = protocol::encode_request(params).map_err(|e| GatewayError::Encode {
            message: e.to_string(),
        })?;

        let mut last_error = String::new();
        for endpoint in &self.endpoints {
            info!(endpoint = %endpoint, "sending parameters to worker");
            match self.try_endpoint(endpoint, &payload).await {
                Ok(curve) => {
                    info!(endpoint = %endpoint, samples = curve.len(), "result received");
                    return Ok(curve);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "worker attempt failed, trying next");
                    last_error = format!("{endpoint}: {e}");
                }
            }
        }

        error!(
            attempted = self.endpoints.len(),
            "no simulation worker accepted the request"
        );
        Err(GatewayError::AllWorkersUnreachable {
            attempted: self.endpoints.len(),
            last_error,
        })
    }

    async fn try_endpoint(
        &self,
        endpoint: &WorkerEndpoint,
        payload: &[u8],
    ) -> Result<Curve, EndpointError> {
        let mut stream = timeout(self.handshake_timeout, TcpStream::connect(endpoint.address()))
            .await
            .map_err(|_| EndpointError::Timeout { stage: "connect" })?
            .map_err(EndpointError::Connect)?;

        timeout(self.handshake_timeout, stream.write_all(payload))
            .await
            .map_err(|_| EndpointError::Timeout { stage: "send" })??;

        let mut ack = [0u8; ACK.len()];
        timeout(self.handshake_timeout, stream.read_exact(&mut ack))
            .await
            .map_err(|_| EndpointError::Timeout {
                stage: "acknowledgement",
            })??;
        if &ack != ACK {
            return Err(EndpointError::UnexpectedAck {
                received: String::from_utf8_lossy(&ack).into_owned(),
            });
        }
        info!(endpoint = %endpoint, "worker acknowledged, awaiting result");

        // No deadline from here on: the worker closes the stream when done.
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await?;
        protocol::decode_result(&body).map_err(|e| EndpointError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SimulationBackend for SimulationGateway {
    async fn simulate(&self, params: &ParameterSet) -> CalResult<Curve> {
        Ok(self.call(params).await?)
    }
}
