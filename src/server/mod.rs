//! HTTP server module
//!
//! Transport shell for the relay: binds the listener, terminates TLS when
//! certificate material is available, and hands every connection to the
//! boundary layer in its own tokio task so in-flight uploads overlap freely.
//!
//! Startup is an explicit two-branch initialization: try the TLS listener
//! with the configured certificate files, and only on a resource-acquisition
//! failure (files missing or unreadable) fall back to a plain HTTP listener
//! on the fallback address. The fallback exists so certificate-issuance
//! handshakes can still complete; it logs loudly and is not expected to
//! serve real traffic.

use crate::config::{Config, ServerConfig};
use crate::protocol::UploadProtocol;
use crate::router::{handle_request, AppState};
use crate::s3::S3Client;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

pub mod tls;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to create backend client: {0}")]
    BackendClientError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP server
pub struct Server {
    config: Arc<Config>,
    state: Arc<AppState>,
}

impl Server {
    /// Create a new server instance. Builds the backend client once; it is
    /// shared read-only across all request handlers.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let client = S3Client::new(&config.s3)
            .await
            .map_err(|e| ServerError::BackendClientError(e.to_string()))?;

        let protocol = UploadProtocol::new(Arc::new(client), &config.public_base_url);
        let state = Arc::new(AppState {
            protocol,
            max_body_size: config.server.max_body_size,
        });

        Ok(Self {
            config: Arc::new(config),
            state,
        })
    }

    /// Run the server until a fatal accept error.
    pub async fn run(self) -> Result<(), ServerError> {
        match plan_listener(&self.config.server) {
            ListenerPlan::Tls { acceptor, address } => self.run_tls(acceptor, &address).await,
            ListenerPlan::Plain { address } => self.run_plain(&address).await,
        }
    }

    async fn bind(address: &str) -> Result<(TcpListener, SocketAddr), ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address {}: {}", address, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        Ok((listener, local_addr))
    }

    async fn run_plain(&self, address: &str) -> Result<(), ServerError> {
        let (listener, local_addr) = Self::bind(address).await?;
        info!("Listening on http://{}", local_addr);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            let timeout = self.request_timeout();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service =
                    service_fn(move |req| handle_request(req, Arc::clone(&state)));

                if let Err(e) = http1_builder(timeout).serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }

    async fn run_tls(&self, acceptor: TlsAcceptor, address: &str) -> Result<(), ServerError> {
        let (listener, local_addr) = Self::bind(address).await?;
        info!("Listening on https://{}", local_addr);

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let acceptor = acceptor.clone();
            let state = Arc::clone(&self.state);
            let timeout = self.request_timeout();

            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("TLS handshake failed from {}: {}", peer_addr, e);
                        return;
                    }
                };

                let io = TokioIo::new(tls_stream);
                let service =
                    service_fn(move |req| handle_request(req, Arc::clone(&state)));

                if let Err(e) = http1_builder(timeout).serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.request_timeout_secs)
    }
}

/// The resolved two-branch startup decision: which address to bind and
/// whether to terminate TLS on it.
enum ListenerPlan {
    Tls {
        acceptor: TlsAcceptor,
        address: String,
    },
    Plain {
        address: String,
    },
}

/// Decide the listener configuration. Only resource-acquisition failures
/// (certificate files missing or unreadable) select the fallback branch;
/// the fallback listener exists so certificate-issuance handshakes can
/// complete and is not expected to serve real traffic.
fn plan_listener(config: &ServerConfig) -> ListenerPlan {
    match config.tls {
        Some(ref tls_config) => match tls::load_acceptor(tls_config) {
            Ok(acceptor) => ListenerPlan::Tls {
                acceptor,
                address: config.address.clone(),
            },
            Err(e) => {
                error!("--- TLS SETUP FAILED ---");
                error!(
                    cert_path = %tls_config.cert_path,
                    key_path = %tls_config.key_path,
                    "Could not load certificate material: {}",
                    e
                );
                warn!(
                    "Falling back to plain HTTP on {}",
                    config.fallback_address
                );
                ListenerPlan::Plain {
                    address: config.fallback_address.clone(),
                }
            }
        },
        None => ListenerPlan::Plain {
            address: config.address.clone(),
        },
    }
}

/// Long header-read timeout: large part uploads over slow links must not be
/// aborted by the transport while the backend call is still permitted to
/// run for the same ceiling.
fn http1_builder(timeout: Duration) -> http1::Builder {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(timeout);
    builder
}
