use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// Exam pages are served from arbitrary quiz hosts, so any origin may call the API.
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any)
}
