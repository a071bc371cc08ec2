use std::net::SocketAddr;
use std::sync::Arc;

use warp::filters::BoxedFilter;
use warp::Filter;

use crate::auth::{GoogleVerifier, TokenService};
use crate::chat::InferenceClient;
use crate::configuration::Config;
use crate::storage::Database;
use crate::web_interface::filters;

/// Shared dependencies every route group pulls out of the request pipeline.
pub struct AppState {
    pub db: Database,
    pub tokens: TokenService,
    pub google: GoogleVerifier,
    pub inference: InferenceClient,
}

impl AppState {
    pub fn new(config: &Config, db: Database) -> Self {
        Self {
            db,
            tokens: TokenService::new(&config.tokens),
            google: GoogleVerifier::new(&config.google_client_id),
            inference: InferenceClient::new(&config.inference),
        }
    }
}

/// Full route table: every domain group or'd together, with rejection
/// translation and request logging on the outside.
pub fn routes(state: Arc<AppState>) -> BoxedFilter<(warp::reply::Response,)> {
    crate::auth::handlers::routes(state.clone())
        .or(crate::users::handlers::routes(state.clone()))
        .unify()
        .or(crate::chat::handlers::routes(state.clone()))
        .unify()
        .or(crate::analytics::handlers::routes(state.clone()))
        .unify()
        .or(crate::devices::handlers::routes(state))
        .unify()
        .recover(filters::handle_rejection)
        .unify()
        .boxed()
}

/// HTTP API server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start serving on the given address. Runs until the process exits.
    pub async fn start(&self, addr: SocketAddr) {
        let api = routes(self.state.clone()).with(warp::log("storypals"));
        log::info!("listening on {}", addr);
        warp::serve(api).run(addr).await;
    }
}
