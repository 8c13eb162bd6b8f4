//! HTTP service boundary
//!
//! # Endpoints
//!
//! - POST /plugin/:tenant_id/install/pkg - Upload a package (multipart),
//!   install progress is streamed back as server-sent events
//! - POST /plugin/:tenant_id/install/identifier - Install a registered plugin
//!
//! Every payload is a `{code, message, data}` envelope. Upload failures that
//! happen before the install starts (bad archive, failed verification) are
//! answered with a single error envelope instead of an event stream.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use sdk::errors::PluginError;
use sdk::manifest::PluginUniqueIdentifier;
use sdk::types::Response as Envelope;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::installer::{IdentifierInstall, InstallOrchestrator};

/// Multipart field carrying the package archive
pub const PACKAGE_FIELD: &str = "dify_pkg";

/// Multipart framing allowance on top of the package size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
struct ApiState {
    orchestrator: Arc<InstallOrchestrator>,
}

#[derive(Debug, Deserialize)]
struct InstallIdentifierRequest {
    plugin_unique_identifier: String,
}

/// Build the plugin install router
pub fn router(orchestrator: Arc<InstallOrchestrator>, max_package_size: usize) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/plugin/:tenant_id/install/pkg", post(install_pkg_handler))
        .route(
            "/plugin/:tenant_id/install/identifier",
            post(install_identifier_handler),
        )
        .layer(DefaultBodyLimit::max(
            max_package_size.saturating_add(MULTIPART_OVERHEAD),
        ))
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Plugin API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Plugin API stopped");
    Ok(())
}

fn error_response(err: &PluginError) -> Response {
    Json(Envelope::<()>::from_error(err)).into_response()
}

/// Read the package upload out of the multipart body
async fn read_package(multipart: &mut Multipart) -> Result<Vec<u8>, PluginError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PluginError::Format(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some(PACKAGE_FIELD) || field.file_name().is_some() {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PluginError::Format(format!("Failed to read upload: {}", e)))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(PluginError::Format(format!(
        "Missing '{}' file field",
        PACKAGE_FIELD
    )))
}

async fn install_pkg_handler(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let bytes = match read_package(&mut multipart).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(&e),
    };

    let stream = match state
        .orchestrator
        .install_from_bytes(&tenant_id, bytes)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Rejected package upload for tenant {}: {}", tenant_id, e);
            return error_response(&e);
        }
    };

    let events = stream.map(|event| Event::default().json_data(Envelope::success(event)));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn install_identifier_handler(
    State(state): State<ApiState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<InstallIdentifierRequest>,
) -> Response {
    let identifier: PluginUniqueIdentifier = match request.plugin_unique_identifier.parse() {
        Ok(identifier) => identifier,
        Err(e) => return error_response(&e),
    };

    match state
        .orchestrator
        .install_from_identifier(&tenant_id, &identifier)
        .await
    {
        Ok(installed) => Json(Envelope::<IdentifierInstall>::success(installed)).into_response(),
        Err(e) => {
            warn!("Identifier install failed for tenant {}: {}", tenant_id, e);
            error_response(&e)
        }
    }
}
