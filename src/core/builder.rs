use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::engine::Engine;
use super::executor::ExecutorParams;
use super::registry::TaskRegistry;
use crate::{
    core::EngineConfig,
    error::ConfigError,
    events::Bus,
    provider::ProviderConnector,
    store::{MemoryStore, TaskStore},
    subscribers::{Subscribe, SubscriberSet},
    trigger::{BroadcastSource, EventSource, ReactiveTrigger},
};

/// Builder for an [`Engine`].
///
/// Only the provider connector is mandatory. Without a store the engine
/// keeps state in a [`MemoryStore`]; without an event source it listens on
/// an in-process [`BroadcastSource`].
pub struct EngineBuilder {
    cfg: EngineConfig,
    store: Option<Arc<dyn TaskStore>>,
    connector: Option<Arc<dyn ProviderConnector>>,
    source: Option<Arc<dyn EventSource>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl EngineBuilder {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            store: None,
            connector: None,
            source: None,
            subscribers: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn ProviderConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets event subscribers; each gets its own worker and bounded queue.
    pub fn subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Wires bus, subscribers, registry and trigger. Must run inside a tokio runtime.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when the configuration does not validate or
    /// no connector was given.
    pub fn build(self) -> Result<Arc<Engine>, ConfigError> {
        self.cfg.validate()?;
        let connector = self
            .connector
            .ok_or_else(|| ConfigError::Invalid("a provider connector is required".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn TaskStore>);
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(BroadcastSource::default()) as Arc<dyn EventSource>);

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let runtime_token = CancellationToken::new();

        let params = ExecutorParams {
            policy: self.cfg.retry_policy(),
            poll: self.cfg.poll_policy(),
            password_length: self.cfg.password_length,
        };
        let registry = TaskRegistry::new(
            Arc::clone(&store),
            Arc::clone(&connector),
            params,
            bus.clone(),
            runtime_token.clone(),
        );
        let trigger = ReactiveTrigger::new(
            source,
            self.cfg.stock_channel.clone(),
            self.cfg.cpu_shapes.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            bus.clone(),
        );

        let engine = Arc::new(Engine::new_internal(
            self.cfg, store, connector, registry, trigger, bus, subs,
        ));
        engine.subscriber_listener();
        Ok(engine)
    }
}
