//! OpenAPI documentation for the Fleetlink API

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// API Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fleetlink API",
        version = "0.1.0",
        description = "Control API for tunnel-connected nodes.\n\n## Features\n- Register nodes and provision their tunnel peers\n- Track node liveness from agent heartbeats\n- Stream status changes as server-sent events\n- Relay requests and event streams to node agents",
        license(name = "MIT"),
        contact(name = "Fleetlink Team")
    ),
    servers(
        (url = "http://localhost:6276", description = "Local development server")
    ),
    tags(
        (name = "health", description = "Service liveness"),
        (name = "auth", description = "Operator login and token checks"),
        (name = "nodes", description = "Node registry, heartbeats and status events"),
        (name = "relay", description = "Requests forwarded to node agents over the tunnel")
    ),
    paths(
        crate::api::health::health_check,
        crate::api::auth::login,
        crate::api::auth::logout,
        crate::api::auth::me,
        crate::api::nodes::list,
        crate::api::nodes::get,
        crate::api::nodes::create,
        crate::api::nodes::update,
        crate::api::nodes::heartbeat,
        crate::api::events::status_events,
        crate::api::proxy::proxy,
        crate::api::proxy::proxy_sse,
    ),
    components(
        schemas(
            crate::models::Node,
            crate::models::NodeStatus,
            crate::models::Liveness,
            crate::models::OperatingSystem,
            crate::models::CreateNode,
            crate::models::UpdateNode,
            crate::models::Credentials,
            crate::models::TokenResponse,
            crate::api::auth::SessionInfo,
            crate::api::auth::LogoutResponse,
            crate::api::health::HealthResponse,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/auth", "/nodes", "/nodes/{id}", "/nodes/events", "/nodes/{id}/proxy-sse"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
