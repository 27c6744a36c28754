use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use relay::Observation;
use tokio::net::TcpListener;

use super::Gateway;
use crate::core::shutdown::ShutdownHandle;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/publicar", post(publicar))
        .with_state(gateway)
}

/// serve the gateway on `listener` until shutdown, finishing in-flight requests
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    mut handle: ShutdownHandle,
) -> Result<()> {
    info!("gateway listening on {:?}", listener.local_addr()?);
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async move { handle.wait_for_shutdown().await })
        .await?;
    info!("gateway stopped");
    Ok(())
}

async fn publicar(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let record: Observation = match serde_json::from_slice(&body) {
        Ok(record) => record,
        Err(e) => {
            debug!("rejecting request body: {e}");
            return (StatusCode::BAD_REQUEST, "invalid JSON").into_response();
        }
    };
    info!("publishing {record:?}");
    match gateway.publish(&record).await {
        Ok(res) => Json(res).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
