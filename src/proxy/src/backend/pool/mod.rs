use crate::backend::conn::BackendConn;
use crate::backend::BackendOptions;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_open: u32,
    pub max_idle: u32,
    /// Zero disables lifetime expiry.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 16,
            max_idle: 4,
            max_lifetime: Duration::ZERO,
        }
    }
}

struct PoolState {
    free: VecDeque<BackendConn>,
    num_open: u32,
}

struct PoolShared {
    opts: Arc<BackendOptions>,
    cfg: PoolConfig,
    state: Mutex<PoolState>,
    open_tx: mpsc::Sender<()>,
}

/// Fixed-capacity pool of authenticated backend sessions. Sessions are dialed
/// by a dedicated opener task fed through a bounded signal channel; takers
/// never wait — an empty pool is reported back to the caller immediately.
///
/// Invariants held under the state mutex: `num_open <= max_open` and
/// `free.len() <= num_open`. All work under the lock is O(1); the opener
/// dials outside of it against a reserved slot.
#[derive(Clone)]
pub struct ConnPool {
    shared: Arc<PoolShared>,
}

impl ConnPool {
    /// Builds the pool and posts `max_idle` warm-up signals. Must be called
    /// from within a tokio runtime (the opener task is spawned here).
    pub fn new(opts: BackendOptions, cfg: PoolConfig) -> Self {
        let (open_tx, open_rx) = mpsc::channel(cfg.max_open.max(1) as usize);
        let shared = Arc::new(PoolShared {
            opts: Arc::new(opts),
            cfg,
            state: Mutex::new(PoolState {
                free: VecDeque::new(),
                num_open: 0,
            }),
            open_tx,
        });
        tokio::spawn(opener(Arc::downgrade(&shared), open_rx));
        for _ in 0..shared.cfg.max_idle {
            let _ = shared.open_tx.try_send(());
        }
        ConnPool { shared }
    }

    /// Non-blocking take. Expired sessions found on the idle queue are closed
    /// on the way; `None` means the pool is drained and the caller should
    /// fail fast. Every call tops up the opener signals so capacity is
    /// restored in the background.
    pub fn get_conn(&self) -> Option<BackendConn> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let want = shared.cfg.max_open.saturating_sub(state.num_open);
        for _ in 0..want {
            if shared.open_tx.try_send(()).is_err() {
                break;
            }
        }
        while let Some(conn) = state.free.pop_front() {
            if conn.expired(shared.cfg.max_lifetime) {
                state.num_open -= 1;
                debug!("dropping expired idle backend session");
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Hands a healthy session back. Sessions over the idle watermark that
    /// outlived `max_lifetime` are closed instead of re-queued.
    pub fn put_conn(&self, conn: BackendConn) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !shared.cfg.max_lifetime.is_zero()
            && state.num_open > shared.cfg.max_idle
            && conn.expired(shared.cfg.max_lifetime)
        {
            state.num_open -= 1;
            debug!(
                num_open = state.num_open,
                "closing backend session by expiry"
            );
            return;
        }
        if state.free.len() < shared.cfg.max_open as usize {
            state.free.push_back(conn);
        } else {
            state.num_open -= 1;
            debug!("idle queue full, closing backend session");
        }
    }

    /// Removes a session that hit a transport error; it never goes back on
    /// the idle queue.
    pub fn discard(&self, conn: BackendConn) {
        let mut state = self.shared.state.lock();
        state.num_open -= 1;
        drop(conn);
    }

    pub fn num_open(&self) -> u32 {
        self.shared.state.lock().num_open
    }

    pub fn num_idle(&self) -> usize {
        self.shared.state.lock().free.len()
    }
}

async fn opener(shared: Weak<PoolShared>, mut open_rx: mpsc::Receiver<()>) {
    while open_rx.recv().await.is_some() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        // reserve a slot before dialing; stale signals above capacity are
        // simply dropped
        {
            let mut state = shared.state.lock();
            if state.num_open >= shared.cfg.max_open {
                continue;
            }
            state.num_open += 1;
        }
        match BackendConn::connect(Arc::clone(&shared.opts)).await {
            Ok(conn) => {
                let mut state = shared.state.lock();
                state.free.push_back(conn);
            }
            Err(e) => {
                shared.state.lock().num_open -= 1;
                warn!("failed to open backend session: {e}");
            }
        }
    }
    debug!("pool opener task finished");
}
