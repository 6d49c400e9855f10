use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;

use colloquy_service::Discussion;

use crate::handler;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub discussion: Discussion,
    /// Buffer size of each live comment stream.
    pub live_capacity: usize,
    /// Reported by `/v1/info`.
    pub store_kind: &'static str,
    /// Cancelled when the server begins shutting down; ends live streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(discussion: Discussion) -> Self {
        Self {
            discussion,
            live_capacity: 64,
            store_kind: "memory",
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the axum router with all Colloquy endpoints.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route(
            "/v1/posts",
            get(handler::list_posts).post(handler::create_post),
        )
        .route("/v1/posts/:id", get(handler::get_post))
        .route(
            "/v1/posts/:id/comments-closed",
            put(handler::set_comments_closed),
        )
        .route(
            "/v1/posts/:id/comments",
            get(handler::list_comments).post(handler::add_comment),
        )
        .route("/v1/posts/:id/comments/live", get(handler::live_comments))
        .route("/v1/comments/:id", get(handler::get_comment))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin is echoed back when the list is empty; otherwise only listed
/// origins are.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(handler::USER_HEADER),
        ])
}
