//! Bus backend selected by configuration.

use std::sync::Arc;

use tracing::info;

use ledgerflow_events::{EventBus, InMemoryEventBus};
use ledgerflow_infra::{AppConfig, BusKind, DeadLetterStore, InMemoryDeadLetterStore};
#[cfg(feature = "redis")]
use ledgerflow_infra::event_bus::{RedisStreamsConfig, RedisStreamsEventBus};

use crate::app::ServiceError;

/// The broker the process talks to, plus where its dead letters go.
#[derive(Debug, Clone)]
pub enum BusBackend {
    Memory {
        bus: Arc<InMemoryEventBus>,
        dead_letters: Arc<InMemoryDeadLetterStore>,
    },
    #[cfg(feature = "redis")]
    Redis(RedisStreamsEventBus),
}

impl BusBackend {
    pub fn in_memory() -> Self {
        BusBackend::Memory {
            bus: Arc::new(InMemoryEventBus::new()),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
        }
    }

    pub fn connect(config: &AppConfig) -> Result<Self, ServiceError> {
        match config.bus {
            BusKind::Memory => {
                info!("using in-memory event bus");
                Ok(Self::in_memory())
            }
            #[cfg(feature = "redis")]
            BusKind::Redis => {
                let bus = RedisStreamsEventBus::connect(RedisStreamsConfig::from_app_config(config))
                    .map_err(|e| ServiceError::Bus(e.to_string()))?;
                Ok(BusBackend::Redis(bus))
            }
            #[cfg(not(feature = "redis"))]
            BusKind::Redis => Err(ServiceError::Bus(
                "LEDGERFLOW_BUS=redis but the service was built without the `redis` feature".to_string(),
            )),
        }
    }

    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        match self {
            BusBackend::Memory { bus, .. } => Arc::clone(bus) as Arc<dyn EventBus>,
            #[cfg(feature = "redis")]
            BusBackend::Redis(bus) => Arc::new(bus.clone()),
        }
    }

    pub fn dead_letters(&self) -> Arc<dyn DeadLetterStore> {
        match self {
            BusBackend::Memory { dead_letters, .. } => Arc::clone(dead_letters) as Arc<dyn DeadLetterStore>,
            #[cfg(feature = "redis")]
            BusBackend::Redis(bus) => Arc::new(bus.dead_letter_store()),
        }
    }

    /// The in-memory bus and dead-letter store, when that is the backend.
    pub fn as_in_memory(&self) -> Option<(&Arc<InMemoryEventBus>, &Arc<InMemoryDeadLetterStore>)> {
        match self {
            BusBackend::Memory { bus, dead_letters } => Some((bus, dead_letters)),
            #[cfg(feature = "redis")]
            BusBackend::Redis(_) => None,
        }
    }

    /// Release broker resources. Call after the workers have stopped.
    pub fn shutdown(&self) {
        match self {
            BusBackend::Memory { .. } => {}
            #[cfg(feature = "redis")]
            BusBackend::Redis(bus) => bus.shutdown(),
        }
    }
}
