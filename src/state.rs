use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{dispatcher::Dispatcher, routing::RoutingEngine, store::TreeStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: TreeStore,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: AppConfig, store: TreeStore, router: Arc<dyn RoutingEngine>) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            router,
            config.driver_base_url.clone(),
        );
        Self {
            config,
            store,
            dispatcher,
        }
    }
}
