use crate::backend::pool::{ConnPool, PoolConfig};
use crate::backend::BackendOptions;
use crate::config::{AdmissionPolicy, ServerConfig};
use crate::error::{Error, Result};
use crate::server::client_conn::ClientConn;
use crate::server::count::{AtomicCounter, ConnCounter, SemaphoreCounter};

use mysql_common::constants::CapabilityFlags;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::watch;
use tracing::{info, warn};

pub mod auth;
pub mod client_conn;
pub mod count;

const RCV_BUFFER: u32 = 32767;
const SND_BUFFER: u32 = 65535;
const LISTEN_BACKLOG: u32 = 1024;

pub static DEFAULT_CAPABILITIES_ONCE: OnceLock<CapabilityFlags> = OnceLock::new();

/// Capability set advertised to downstream clients. Deliberately narrow:
/// `mysql_native_password` over `PROTOCOL_41`, no TLS, no compression, no
/// multi-statements.
pub fn default_capabilities() -> CapabilityFlags {
    *DEFAULT_CAPABILITIES_ONCE.get_or_init(|| {
        CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_FOUND_ROWS
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
    })
}

/// Accepts downstream connections, enforces the admission bound, and runs
/// one [`ClientConn`] task per client against the shared backend pool.
pub struct ProxyServer {
    cfg: Arc<ServerConfig>,
    pool: ConnPool,
    counter: Arc<dyn ConnCounter>,
    next_conn_id: AtomicU32,
}

impl ProxyServer {
    /// Must be called from within a tokio runtime: pool warm-up starts here.
    pub fn new(cfg: ServerConfig) -> Result<Self> {
        cfg.validate()?;
        let pool = ConnPool::new(
            BackendOptions::from_server_config(&cfg),
            PoolConfig {
                max_open: cfg.max_conn_num,
                max_idle: cfg.max_idle_conn,
                max_lifetime: cfg.max_lifetime(),
            },
        );
        let counter: Arc<dyn ConnCounter> = match cfg.admission {
            AdmissionPolicy::Blocking => Arc::new(SemaphoreCounter::new(cfg.max_client)),
            AdmissionPolicy::Reject => Arc::new(AtomicCounter::new(cfg.max_client)),
        };
        Ok(Self {
            cfg: Arc::new(cfg),
            pool,
            counter,
            next_conn_id: AtomicU32::new(1),
        })
    }

    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }

    pub fn active_clients(&self) -> usize {
        self.counter.size()
    }

    /// Binds the listening socket with the proxy's buffer sizing; accepted
    /// sockets inherit the buffers from the listener.
    pub fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .cfg
            .listen
            .parse()
            .map_err(|e| Error::Config(format!("bad listen address {:?}: {e}", self.cfg.listen)))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_recv_buffer_size(RCV_BUFFER)?;
        socket.set_send_buffer_size(SND_BUFFER)?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }

    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!("proxy listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            if !self.counter.incr().await {
                                warn!("client limit reached, closing {peer_addr}");
                                drop(stream);
                                continue;
                            }
                            // prefer Nagle coalescing for the many small packets
                            let _ = stream.set_nodelay(false);
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.run_client(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {e:?}");
                        }
                    }
                }
            }
        }
    }

    async fn run_client(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        info!(conn_id, "new client from {peer_addr}");
        let (reader, writer) = stream.into_split();
        let session = ClientConn::new(
            conn_id,
            peer_addr.to_string(),
            reader,
            writer,
            Arc::clone(&self.cfg),
            self.pool.clone(),
        );
        match session.run().await {
            Ok(()) => info!(conn_id, "client closed"),
            Err(e) => warn!(conn_id, "client session ended: {e}"),
        }
        self.counter.decr();
    }
}
