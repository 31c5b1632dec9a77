use common::ClientConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub client_config: Arc<ClientConfig>,
}

impl AppState {
    pub fn new(client_config: ClientConfig) -> Self {
        Self {
            client_config: Arc::new(client_config),
        }
    }
}
