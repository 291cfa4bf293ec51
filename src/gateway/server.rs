//! Gateway server lifecycle

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::knowledge::KnowledgeBase;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handler::tools_router;

/// Gateway server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Running,
    ShuttingDown,
}

/// HTTP tool surface bound to a socket.
pub struct Gateway {
    config: ServerConfig,
    kb: Arc<KnowledgeBase>,
    state: RwLock<GatewayState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl Gateway {
    pub fn new(config: ServerConfig, kb: Arc<KnowledgeBase>) -> Self {
        Self {
            config,
            kb,
            state: RwLock::new(GatewayState::Stopped),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }

    /// Address actually bound; differs from the config when port 0 is used.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    /// Bind and start serving in the background.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Stopped {
            return Err(Error::Internal("Gateway already running".to_string()));
        }

        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.write().await = Some(addr);

        let app = tools_router(self.kb.clone(), &self.config.cors_origins);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });
        *self.task.lock().await = Some(handle);
        *state = GatewayState::Running;

        tracing::info!(%addr, "Hippocampus gateway listening");
        Ok(())
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Running {
            return Ok(());
        }
        *state = GatewayState::ShuttingDown;

        self.shutdown.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            match handle.await {
                Ok(result) => result?,
                Err(e) => return Err(Error::Internal(format!("Server task failed: {}", e))),
            }
        }

        *state = GatewayState::Stopped;
        tracing::info!("Hippocampus gateway stopped");
        Ok(())
    }
}
