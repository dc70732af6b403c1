//! Task status relay for the extraction and schema services

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::raw_body;
use crate::dispatch::Service;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::storage::ensure_component;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub task_id: Option<String>,
    /// `extract` (default) or `generate`
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// GET /api/status - One status lookup against the owning service
pub async fn task_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>> {
    let task_id = query
        .task_id
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::invalid("Missing taskId parameter"))?;
    let task_id = ensure_component("taskId", task_id)?;

    let service = match query.kind.as_deref() {
        None | Some("extract") => Service::Extract,
        Some(_) => Service::Schema,
    };

    let probe = state.client().report_status(service, task_id).await?;
    if probe.is_not_found() {
        return Err(Error::not_found("Task not found"));
    }
    if !probe.is_success() {
        return Err(Error::rejected(service.name(), probe.status, raw_body(&probe.body)));
    }

    Ok(Json(json!({ "ok": true, "data": probe.body })))
}
