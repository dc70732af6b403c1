//! Document-server callback and editor session endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::required_param;
use crate::editor::{open_session, CallbackPayload, CallbackQuery, CallbackResponse, SessionLookup};
use crate::error::Result;
use crate::server::state::AppState;

/// GET /api/onlyoffice-callback - Liveness probe for the document server
pub async fn callback_alive() -> Json<Value> {
    Json(json!({ "ok": true, "message": "onlyoffice-callback is alive" }))
}

/// POST /api/onlyoffice-callback - Save-back notification.
///
/// The document server retries anything but `{"error": 0}`, so a malformed
/// body is acknowledged like every other failure.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: Option<Json<CallbackPayload>>,
) -> Json<CallbackResponse> {
    let payload = match body {
        Some(Json(payload)) => payload,
        None => {
            tracing::warn!("Callback body is not valid JSON");
            CallbackPayload::default()
        }
    };
    Json(state.editor().handle(payload, query).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocUrlQuery {
    pub agent_user_id: Option<String>,
    pub task_id: Option<String>,
}

/// GET /api/onlyoffice-docurl - Editor session of a task's document
pub async fn doc_url(
    State(state): State<AppState>,
    Query(query): Query<DocUrlQuery>,
) -> Result<Json<Value>> {
    let user = required_param(&query.agent_user_id, "agentUserId")?;
    let task_id = required_param(&query.task_id, "taskId")?;

    let body = match open_session(state.layout(), &state.config().editor, user, task_id).await? {
        SessionLookup::Ready(session) => {
            let mut body = json!({ "ok": true });
            if let (Some(obj), Value::Object(fields)) = (body.as_object_mut(), serde_json::to_value(&session)?) {
                obj.extend(fields);
            }
            body
        }
        SessionLookup::Processing(message) => json!({
            "ok": false,
            "processing": true,
            "message": message,
        }),
    };
    Ok(Json(body))
}
