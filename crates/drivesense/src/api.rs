//! HTTP query facade.
//!
//! [`QueryFacade`] exposes the store to external consumers: reads return the
//! live snapshot, pushes go through the same merge path as datagrams. There is
//! no second copy of the snapshot here.
//!
//! [`router`] mounts the facade on a single route:
//!
//! - `GET <route>` returns the flat snapshot.
//! - `POST <route>` takes a JSON object patch and returns
//!   `{"success": true, "data": <snapshot>, "persisted": <bool>}`, or `400`
//!   with `{"error": "Invalid data"}` when the body is not an acceptable patch.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::snapshot::{Field, PartialUpdate, Snapshot};
use crate::store::{MergeOutcome, SnapshotStore};

/// Read and push access to the snapshot for external consumers.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    store: SnapshotStore,
}

impl QueryFacade {
    /// Wrap a store handle.
    #[must_use]
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// The current snapshot.
    #[must_use]
    pub fn get(&self) -> Snapshot {
        self.store.read()
    }

    /// Merge a JSON patch into the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPatch`] if `patch` is not an acceptable patch,
    /// in which case nothing is merged, or [`Error::StoreClosed`] if the store
    /// has stopped.
    pub async fn push(&self, patch: &Value) -> Result<MergeOutcome> {
        let update = parse_patch(patch)?;
        self.store.merge(update).await
    }
}

/// Turn a JSON object into a [`PartialUpdate`].
///
/// Only the six raw keys are taken; each must be a finite JSON number. Other
/// keys, including the derived ones, are ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidPatch`] if `patch` is not an object or a raw key
/// carries anything but a finite number.
pub fn parse_patch(patch: &Value) -> Result<PartialUpdate> {
    let Value::Object(entries) = patch else {
        return Err(Error::invalid_patch("expected a JSON object"));
    };

    let mut update = PartialUpdate::empty();
    for (key, value) in entries {
        let Some(field) = Field::from_key(key) else {
            warn!("Ignoring unknown patch key {:?}", key);
            continue;
        };
        let number = value
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| Error::invalid_patch(format!("{field} must be a number")))?;
        update.set(field, number);
    }
    Ok(update)
}

/// Build the HTTP router serving `facade` at `route`.
pub fn router(facade: QueryFacade, route: &str) -> Router {
    Router::new()
        .route(route, get(get_snapshot).post(push_patch))
        .with_state(facade)
}

async fn get_snapshot(State(facade): State<QueryFacade>) -> Json<Snapshot> {
    Json(facade.get())
}

async fn push_patch(State(facade): State<QueryFacade>, body: Bytes) -> Response {
    let patch: Value = match serde_json::from_slice(&body) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("Rejected push with unparsable body: {}", e);
            return invalid_data();
        }
    };

    match facade.push(&patch).await {
        Ok(MergeOutcome {
            snapshot,
            persisted,
        }) => {
            debug!(persisted, "Applied pushed patch");
            Json(json!({
                "success": true,
                "data": snapshot,
                "persisted": persisted,
            }))
            .into_response()
        }
        Err(e) if e.is_client_error() => {
            warn!("Rejected push: {}", e);
            invalid_data()
        }
        Err(e) => {
            error!("Push failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn invalid_data() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid data" })),
    )
        .into_response()
}
