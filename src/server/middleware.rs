//! Middleware for request processing

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::CorsConfig;

/// CORS middleware configuration
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(config.max_age));

    if config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
        // Wildcard origins can never be combined with credentials.
        cors = cors.allow_credentials(false);
    } else {
        let origins: Vec<&str> = if config.allowed_origins.is_empty() {
            vec![
                "http://localhost:3000",
                "http://127.0.0.1:3000",
            ]
        } else {
            config.allowed_origins.iter().map(String::as_str).collect()
        };
        let origins: Vec<HeaderValue> = origins
            .into_iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect();
        cors = cors.allow_origin(AllowOrigin::list(origins));
        if config.allow_credentials {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}
