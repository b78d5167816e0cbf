//! CORS Middleware Configuration

use tower_http::cors::{Any, CorsLayer};

/// Create the CORS layer. The gateway fronts browser clients on arbitrary
/// origins; auth happens per connection, not per origin.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
