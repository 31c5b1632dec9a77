/// API handler for client configuration
///
/// The browser form fetches this once at start-up: image host endpoint and
/// key, email relay identifiers, recipient and the default map centre.

use crate::state::AppState;
use axum::{extract::State, Json};
use common::ClientConfig;

pub async fn get_client_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(state.client_config.as_ref().clone())
}
