//! # Voice Desk Server
//!
//! Wires the store, orchestrator, push channel registry, notification
//! dispatcher and token service together and serves the HTTP/WebSocket API.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             VoiceDeskServer              │
//! ├──────────────────────────────────────────┤
//! │   axum router (api::router)              │
//! ├──────────────────────────────────────────┤
//! │   LifecycleOrchestrator │ CallTokenService│
//! ├──────────────────────────────────────────┤
//! │   NotificationFanout ──▶ dispatcher task │
//! │                          ChannelRegistry │
//! ├──────────────────────────────────────────┤
//! │   KeyedStore (MemoryStore + sweeper)     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```no_run
//! use voicedesk_call_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut server = VoiceDeskServerBuilder::new()
//!     .with_config(VoiceDeskConfig::default())
//!     .build()?;
//!
//! server.start().await?;
//! server.serve(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::VoiceDeskConfig;
use crate::error::{CallEngineError, Result};
use crate::notify::{ChannelRegistry, FanoutDispatcher, NotificationFanout};
use crate::orchestrator::LifecycleOrchestrator;
use crate::store::{KeyedStore, MemoryStore};
use crate::token::{CallTokenService, HmacTokenIssuer, TokenIssuer};

/// A complete voice desk server
pub struct VoiceDeskServer {
    config: VoiceDeskConfig,
    orchestrator: LifecycleOrchestrator,
    tokens: CallTokenService,
    registry: ChannelRegistry,

    /// Set when the store is the in-process backend, so it can be swept
    memory_store: Option<MemoryStore>,

    /// Taken by `start`
    dispatcher: Option<FanoutDispatcher>,
    dispatcher_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl VoiceDeskServer {
    pub fn new(config: VoiceDeskConfig, store: Arc<dyn KeyedStore>, issuer: Arc<dyn TokenIssuer>) -> Result<Self> {
        config.validate()?;

        let registry = ChannelRegistry::new(config.server.push_channel_capacity);
        let (fanout, dispatcher) = NotificationFanout::new(registry.clone());
        let tokens = CallTokenService::new(store.clone(), issuer, &config);
        let orchestrator = LifecycleOrchestrator::new(store, config.clone(), fanout);
        info!("✅ Voice desk engine initialized");

        Ok(Self {
            config,
            orchestrator,
            tokens,
            registry,
            memory_store: None,
            dispatcher: Some(dispatcher),
            dispatcher_handle: None,
            sweeper_handle: None,
        })
    }

    /// Server backed by the in-process store and the local token signer
    pub fn new_in_memory(config: VoiceDeskConfig) -> Result<Self> {
        let issuer = Arc::new(HmacTokenIssuer::from_config(&config.token)?);
        Self::with_memory_store(config, issuer)
    }

    fn with_memory_store(config: VoiceDeskConfig, issuer: Arc<dyn TokenIssuer>) -> Result<Self> {
        let store = MemoryStore::new();
        let mut server = Self::new(config, Arc::new(store.clone()), issuer)?;
        server.memory_store = Some(store);
        Ok(server)
    }

    /// Start background tasks: the notification dispatcher and, for the
    /// in-process store, the expired-key sweeper.
    pub async fn start(&mut self) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .take()
            .ok_or_else(|| CallEngineError::internal("server already started"))?;
        self.dispatcher_handle = Some(tokio::spawn(dispatcher.run()));

        if let Some(store) = &self.memory_store {
            let period = Duration::from_secs(self.config.server.sweep_interval_secs.max(1));
            self.sweeper_handle = Some(store.spawn_sweeper(period));
            info!("🧹 Store sweeper running every {:?}", period);
        }

        info!("✅ Voice desk server started");
        Ok(())
    }

    /// Serve HTTP/WebSocket traffic on the configured address until `shutdown` resolves
    pub async fn serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.server.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CallEngineError::configuration(format!("cannot bind {}: {}", addr, e)))?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| CallEngineError::internal(e.to_string()))?;
        info!("📞 Voice desk listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CallEngineError::internal(format!("server error: {}", e)))?;

        info!("📴 HTTP listener closed");
        Ok(())
    }

    /// Stop background tasks
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 Stopping voice desk server...");

        if let Some(handle) = self.sweeper_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        info!("✅ Voice desk server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        api::router(AppState::new(
            self.orchestrator.clone(),
            self.tokens.clone(),
            self.registry.clone(),
        ))
    }

    pub fn config(&self) -> &VoiceDeskConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.orchestrator
    }

    pub fn tokens(&self) -> &CallTokenService {
        &self.tokens
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

/// Builder for VoiceDeskServer with fluent API
#[derive(Default)]
pub struct VoiceDeskServerBuilder {
    config: Option<VoiceDeskConfig>,
    store: Option<Arc<dyn KeyedStore>>,
    issuer: Option<Arc<dyn TokenIssuer>>,
    bind_addr: Option<SocketAddr>,
}

impl VoiceDeskServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: VoiceDeskConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an external store instead of the in-process one
    pub fn with_store(mut self, store: Arc<dyn KeyedStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Override `server.bind_addr`
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<VoiceDeskServer> {
        let mut config = self.config.unwrap_or_default();
        if let Some(addr) = self.bind_addr {
            config.server.bind_addr = addr;
        }

        let issuer: Arc<dyn TokenIssuer> = match self.issuer {
            Some(issuer) => issuer,
            None => Arc::new(HmacTokenIssuer::from_config(&config.token)?),
        };
        match self.store {
            Some(store) => VoiceDeskServer::new(config, store, issuer),
            None => VoiceDeskServer::with_memory_store(config, issuer),
        }
    }
}
