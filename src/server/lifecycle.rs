//! Server lifecycle: listeners and background tasks.

use super::{AppState, control_router, create_router};
use crate::error::{AppError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Created, nothing bound yet.
    NotStarted,
    /// Listeners bound and background tasks ticking.
    Running,
    /// Stop in progress.
    ShuttingDown,
    /// Everything torn down.
    Stopped,
}

/// Addresses actually bound by a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddrs {
    /// Public OPDS listener.
    pub public: SocketAddr,
    /// Control channel listener.
    pub control: SocketAddr,
}

struct Inner {
    state: ServerState,
    addrs: Option<LocalAddrs>,
    tasks_token: CancellationToken,
    listeners_token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    listeners: Vec<(&'static str, JoinHandle<std::io::Result<()>>)>,
}

/// OPDS server with its control channel and background tasks.
///
/// `start` and `stop` take `&self`; share the server behind an `Arc` to stop
/// it from another task.
pub struct Server {
    app: AppState,
    inner: Mutex<Inner>,
}

impl Server {
    /// Create a server that has not started yet.
    pub fn new(app: AppState) -> Self {
        Self {
            app,
            inner: Mutex::new(Inner {
                state: ServerState::NotStarted,
                addrs: None,
                tasks_token: CancellationToken::new(),
                listeners_token: CancellationToken::new(),
                tasks: Vec::new(),
                listeners: Vec::new(),
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServerState {
        self.inner.lock().await.state
    }

    /// Bound addresses, once started.
    pub async fn local_addrs(&self) -> Option<LocalAddrs> {
        self.inner.lock().await.addrs
    }

    /// Bind both listeners, serve them, and launch the rescan and compaction
    /// tasks. A server starts at most once.
    pub async fn start(&self) -> Result<LocalAddrs> {
        let mut inner = self.inner.lock().await;
        if inner.state != ServerState::NotStarted {
            return Err(AppError::Internal(format!(
                "Server cannot start from state {:?}",
                inner.state
            )));
        }

        let config = &self.app.config;
        let public = TcpListener::bind(config.server.bind).await?;
        let control = TcpListener::bind(config.server.control_bind).await?;
        let addrs = LocalAddrs {
            public: public.local_addr()?,
            control: control.local_addr()?,
        };

        let token = inner.listeners_token.clone();
        let router = create_router(self.app.clone());
        inner.listeners.push((
            "public",
            tokio::spawn(async move {
                axum::serve(public, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }),
        ));

        let token = inner.listeners_token.clone();
        let router = control_router(self.app.clone());
        inner.listeners.push((
            "control",
            tokio::spawn(async move {
                axum::serve(control, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }),
        ));

        let tasks_token = inner.tasks_token.clone();
        let rescan_every = (config.scan.interval_seconds > 0)
            .then(|| Duration::from_secs(config.scan.interval_seconds));
        inner.tasks.push((
            "rescan",
            tokio::spawn(rescan_task(
                self.app.clone(),
                rescan_every,
                tasks_token.clone(),
            )),
        ));

        if config.scan.compaction_interval_seconds > 0 {
            let every = Duration::from_secs(config.scan.compaction_interval_seconds);
            inner.tasks.push((
                "compaction",
                tokio::spawn(compaction_task(self.app.clone(), every, tasks_token)),
            ));
        }

        inner.addrs = Some(addrs);
        inner.state = ServerState::Running;

        tracing::info!(
            public = %addrs.public,
            control = %addrs.control,
            "Server listening"
        );

        Ok(addrs)
    }

    /// Stop background tasks, then close both listeners.
    ///
    /// Idempotent. Concurrent callers queue on the lifecycle lock and the
    /// later ones return once the first has finished. A listener that fails
    /// to shut down cleanly is reported as an error.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ServerState::Stopped => return Ok(()),
            ServerState::NotStarted => {
                inner.state = ServerState::Stopped;
                return Ok(());
            }
            ServerState::Running | ServerState::ShuttingDown => {}
        }

        inner.state = ServerState::ShuttingDown;
        tracing::info!("Stopping server");

        inner.tasks_token.cancel();
        for (name, task) in std::mem::take(&mut inner.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        inner.listeners_token.cancel();
        let mut failure = None;
        for (name, listener) in std::mem::take(&mut inner.listeners) {
            let result = match listener.await {
                Ok(result) => result.map_err(AppError::from),
                Err(e) => Err(AppError::Internal(format!("Listener task failed: {}", e))),
            };
            if let Err(e) = result {
                tracing::error!(listener = name, error = %e, "Listener did not close cleanly");
                failure.get_or_insert(e);
            }
        }

        inner.state = ServerState::Stopped;
        tracing::info!("Server stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Rescan immediately, then on every tick. Without a period the library is
/// scanned once.
async fn rescan_task(app: AppState, every: Option<Duration>, token: CancellationToken) {
    let Some(every) = every else {
        if !token.is_cancelled() {
            run_rescan(&app).await;
        }
        return;
    };

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => run_rescan(&app).await,
        }
    }

    tracing::debug!("Rescan task stopped");
}

async fn run_rescan(app: &AppState) {
    let app = app.clone();
    match tokio::task::spawn_blocking(move || app.rescan()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Scheduled rescan failed"),
        Err(e) => tracing::error!(error = %e, "Rescan task panicked"),
    }
}

/// Compact the store on every tick, skipping the immediate first one.
async fn compaction_task(app: AppState, every: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let db = app.db.clone();
                match tokio::task::spawn_blocking(move || db.compact()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "Compaction failed"),
                    Err(e) => tracing::error!(error = %e, "Compaction task panicked"),
                }
            }
        }
    }

    tracing::debug!("Compaction task stopped");
}
