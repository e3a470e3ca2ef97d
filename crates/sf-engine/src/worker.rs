//! Server side of the worker protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sf_types::{CalError, CalResult, Curve, ParameterSet};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::protocol::{self, ACK};
use crate::simulator::Simulator;

/// How long a connected client may take to deliver its request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves simulation requests one at a time.
///
/// Connections are handled inside the accept loop itself, so a second client
/// waits in the listen backlog until the running simulation has been sent
/// back. The gateway's handshake timeout turns that wait into a failover.
pub struct SimulationWorker {
    listener: TcpListener,
    simulator: Arc<Mutex<Box<dyn Simulator>>>,
    request_timeout: Duration,
}

impl SimulationWorker {
    pub async fn bind<A: ToSocketAddrs>(addr: A, simulator: Box<dyn Simulator>) -> CalResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            simulator: Arc::new(Mutex::new(simulator)),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn local_addr(&self) -> CalResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections forever.
    pub async fn serve(self) -> CalResult<()> {
        let simulator = self.simulator.lock().name().to_string();
        info!(addr = %self.local_addr()?, simulator = %simulator, "simulation worker listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(peer = %peer, "accepted connection");
            if let Err(e) = self.handle_connection(stream).await {
                warn!(peer = %peer, error = %e, "request aborted");
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> CalResult<()> {
        let request = timeout(self.request_timeout, protocol::read_request(&mut stream))
            .await
            .map_err(|_| CalError::Internal("timed out reading request".to_string()))??;
        if request.is_empty() {
            info!("connection closed without data");
            return Ok(());
        }

        stream.write_all(ACK).await?;
        stream.flush().await?;
        info!(bytes = request.len(), "request acknowledged");

        let curve = match protocol::decode_request(&request) {
            Ok(params) => self.simulate(params).await,
            Err(e) => {
                warn!(error = %e, "malformed parameters, replying with empty curve");
                Curve::empty()
            }
        };

        let body = protocol::encode_result(&curve)?;
        stream.write_all(&body).await?;
        stream.shutdown().await?;
        info!(samples = curve.len(), "result sent");
        Ok(())
    }

    /// Run the simulator off the async runtime. Failures become an empty
    /// curve, which the client scores as a failed evaluation.
    async fn simulate(&self, params: ParameterSet) -> Curve {
        let fingerprint = params.fingerprint();
        info!(fingerprint = %fingerprint.short(), "starting simulation: {params}");

        let simulator = Arc::clone(&self.simulator);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut simulator = simulator.lock();
            simulator.run(&params)
        })
        .await;

        match outcome {
            Ok(Ok(curve)) => {
                info!(
                    fingerprint = %fingerprint.short(),
                    samples = curve.len(),
                    "simulation finished"
                );
                curve
            }
            Ok(Err(failure)) => {
                warn!(fingerprint = %fingerprint.short(), error = %failure, "simulation failed");
                Curve::empty()
            }
            Err(e) => {
                error!(fingerprint = %fingerprint.short(), error = %e, "simulator task panicked");
                Curve::empty()
            }
        }
    }
}
