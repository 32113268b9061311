//! HTTP boundary of the tunnel relay

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, Method},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::AppState;
use crate::error::AppResult;
use crate::relay::RelayRequest;

/// Framing headers that belong to the agent connection, not to the caller's
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    HeaderName::from_static("keep-alive"),
];

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProxyQuery {
    /// Agent path, e.g. `/health`
    pub path: Option<String>,
}

/// Forward a request to the node agent and return its answer unchanged
#[utoipa::path(
    get,
    path = "/nodes/{id}/proxy",
    tag = "relay",
    params(
        ("id" = String, Path, description = "Node ID"),
        ProxyQuery
    ),
    responses(
        (status = 200, description = "Agent response, passed through"),
        (status = 400, description = "Missing path"),
        (status = 404, description = "Node not found"),
        (status = 502, description = "Agent unreachable"),
        (status = 504, description = "Agent timed out")
    ),
    security(("bearer" = []))
)]
pub async fn proxy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProxyQuery>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let relayed = state
        .relay
        .relay(
            &id,
            RelayRequest {
                method,
                path: query.path.unwrap_or_default(),
                headers,
                body,
            },
        )
        .await?;

    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = relayed.status;
    for (name, value) in relayed.headers.iter() {
        if !STRIPPED_RESPONSE_HEADERS.contains(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }

    Ok(response)
}

/// Relay an agent event stream line by line until either side goes away
#[utoipa::path(
    get,
    path = "/nodes/{id}/proxy-sse",
    tag = "relay",
    params(
        ("id" = String, Path, description = "Node ID"),
        ProxyQuery
    ),
    responses(
        (status = 200, description = "Agent event stream, relayed line by line"),
        (status = 400, description = "Missing path"),
        (status = 404, description = "Node not found"),
        (status = 502, description = "Agent unreachable")
    ),
    security(("bearer" = []))
)]
pub async fn proxy_sse(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ProxyQuery>,
) -> AppResult<Response> {
    let lines = state
        .relay
        .relay_stream(
            &id,
            query.path.as_deref().unwrap_or_default(),
            state.shutdown.clone(),
        )
        .await?;

    let body = Body::from_stream(lines.map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response())
}
