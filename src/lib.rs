//! Coordination core for workspace clients.
//!
//! # Architecture
//!
//! - `bus`: topic-based publish/subscribe with debounced publishing
//! - `context`: shared key/value context that announces its mutations on the bus
//! - `polling`: fixed-interval, non-overlapping periodic tasks
//! - `commands`: selection glue and command execution
//! - `soa`: JSON REST service client and preference store
//! - `notification`: unread message count polling
//! - `config`: application configuration

pub mod bus;
pub mod commands;
pub mod config;
pub mod context;
pub mod notification;
pub mod polling;
pub mod soa;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use bus::EventBus;
use commands::{CommandDispatcher, SelectionGlue};
use config::{AppConfig, ConfigError};
use context::{ContextError, ContextStore};
use notification::UnreadMessagePoller;
use soa::{RequestService, SoaClient, SoaError, SoaPreferenceStore};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Soa(#[from] SoaError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Every component, constructed once and shared by `Arc`.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub ctx: Arc<ContextStore>,
    pub soa: Arc<dyn RequestService>,
    pub preferences: Arc<SoaPreferenceStore>,
    pub selection: Arc<SelectionGlue>,
    pub commands: Arc<CommandDispatcher>,
    pub notifications: Arc<UnreadMessagePoller>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let soa: Arc<dyn RequestService> = Arc::new(SoaClient::new(&config.soa)?);
        Ok(Self::with_service(config, soa))
    }

    /// Build the components on top of an existing request service.
    pub fn with_service(config: &AppConfig, soa: Arc<dyn RequestService>) -> Self {
        let bus = Arc::new(EventBus::new());
        let ctx = Arc::new(ContextStore::new(bus.clone()));
        let preferences = Arc::new(
            SoaPreferenceStore::new(soa.clone(), ctx.clone())
                .with_overrides(config.preferences.clone()),
        );
        let selection = Arc::new(SelectionGlue::new(
            ctx.clone(),
            Duration::from_millis(config.selection_debounce_ms),
        ));
        let commands = Arc::new(CommandDispatcher::new(
            bus.clone(),
            soa.clone(),
            selection.clone(),
        ));
        let notifications = Arc::new(
            UnreadMessagePoller::new(ctx.clone(), soa.clone(), preferences.clone())
                .with_initial_delay_ms(config.notification.initial_delay_ms),
        );

        Self {
            bus,
            ctx,
            soa,
            preferences,
            selection,
            commands,
            notifications,
        }
    }

    /// Start the pollers and load preferences. A failed preference load is
    /// logged; pollers waiting on preferences then stay idle.
    pub async fn start(&self) {
        self.notifications.init().await;
        if let Err(e) = self.preferences.load(&["*"]).await {
            tracing::warn!("failed to load preferences: {e}");
        }
    }

    pub fn shutdown(&self) {
        self.notifications.shutdown();
        self.ctx.clear();
        self.bus.clear();
        tracing::info!("shut down");
    }
}

// ---------------------------------------------------------------------------
// Application entry point
// ---------------------------------------------------------------------------

pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(filter))
                .unwrap_or_else(|_| "ctxbus=debug,info".parse().expect("valid env filter")),
        )
        .try_init();
}

pub async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    init_tracing(&config.log_filter);
    tracing::info!(soa = %config.soa.base_url, "starting");

    let state = AppState::new(&config)?;

    let mut tap = state.bus.tap();
    let tap_logger = tokio::spawn(async move {
        loop {
            match tap.recv().await {
                Ok(event) => {
                    tracing::debug!(seq = event.seq, topic = %event.topic, "bus event");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "bus tap lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    state.start().await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::Other(format!("failed to listen for ctrl-c: {e}")))?;

    state.shutdown();
    tap_logger.abort();
    Ok(())
}
