use crate::config::ServerConfig;
use crate::worker::EvaluationPool;
use chrono::{DateTime, Utc};
use pulsewatch_alert::AlertEngine;
use pulsewatch_notify::{NotificationDispatcher, Notifier, PluginNotifier, TemplateSet};
use pulsewatch_storage::{ContactRegistry, NotifyLogStore, RuleCatalog, StateStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlertEngine>,
    pub pool: EvaluationPool,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        engine: Arc<AlertEngine>,
        dispatcher: Arc<NotificationDispatcher>,
        config: ServerConfig,
    ) -> Self {
        let pool = EvaluationPool::new(
            engine.clone(),
            config.alert.max_concurrent_evaluations,
            config.evaluation_timeout(),
        );
        Self {
            engine,
            pool,
            dispatcher,
            start_time: Utc::now(),
            config: Arc::new(config),
        }
    }

    /// Wires engine and dispatcher over one store, delivering through the
    /// built-in channels.
    pub fn from_store<S>(store: Arc<S>, config: ServerConfig) -> Self
    where
        S: RuleCatalog + StateStore + NotifyLogStore + ContactRegistry + 'static,
    {
        Self::with_notifier(store, Arc::new(PluginNotifier::default()), config)
    }

    pub fn with_notifier<S>(store: Arc<S>, notifier: Arc<dyn Notifier>, config: ServerConfig) -> Self
    where
        S: RuleCatalog + StateStore + NotifyLogStore + ContactRegistry + 'static,
    {
        let engine = Arc::new(AlertEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.engine_config(),
        ));
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            store.clone(),
            store,
            notifier,
            config.dispatcher_config(),
        )
        .with_templates(TemplateSet::with_overrides(config.templates.clone()));
        Self::new(engine, Arc::new(dispatcher), config)
    }
}
