use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use crate::api::error::{ApiError, Op};
use crate::api::AppState;
use crate::models::{DeleteRequest, Issue, IssueFilter, IssueId, NewIssue, UpdateRequest};

/// Success shape for update and delete.
#[derive(Debug, Serialize)]
pub struct ActionOutcome {
    pub result: &'static str,
    #[serde(rename = "_id")]
    pub id: IssueId,
}

fn require_project(project: &str, op: Op) -> Result<(), ApiError> {
    if project.trim().is_empty() {
        return Err(ApiError::missing_project(op));
    }
    Ok(())
}

/// A body that fails to parse is treated as an empty payload; the regular
/// missing-field validation then produces the caller-visible error. Malformed
/// input must never surface as a transport-level failure.
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>) -> T {
    match body {
        Ok(Json(inner)) => inner,
        Err(rejection) => {
            tracing::debug!(%rejection, "unreadable request body, treating as empty");
            T::default()
        }
    }
}

pub(super) async fn no_project() -> ApiError {
    ApiError::missing_project(Op::List)
}

pub(super) async fn list(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    require_project(&project, Op::List)?;
    let filter = IssueFilter::from_params(&params);

    let db = state.db.lock().await;
    let issues = db.find_issues(&project, &filter).map_err(|err| {
        tracing::error!(error = %err, %project, "issue query failed");
        ApiError::store(Op::List, None)
    })?;

    Ok(Json(issues))
}

pub(super) async fn create(
    State(state): State<AppState>,
    Path(project): Path<String>,
    body: Result<Json<NewIssue>, JsonRejection>,
) -> Result<Json<Issue>, ApiError> {
    require_project(&project, Op::Create)?;
    let new = body_or_default(body);
    if new.missing_required() {
        return Err(ApiError::missing_required_field());
    }

    let db = state.db.lock().await;
    let issue = db.insert_issue(&project, &new).map_err(|err| {
        tracing::error!(error = %err, %project, "issue insert failed");
        ApiError::store(Op::Create, None)
    })?;

    Ok(Json(issue))
}

pub(super) async fn update(
    State(state): State<AppState>,
    Path(project): Path<String>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Result<Json<ActionOutcome>, ApiError> {
    require_project(&project, Op::Update)?;
    let req = body_or_default(body);

    let id = req.id.ok_or_else(|| ApiError::missing_id(Op::Update))?;
    if req.changes.is_empty() {
        return Err(ApiError::no_update_fields(id));
    }
    let key = id
        .as_key()
        .ok_or_else(|| ApiError::invalid_id(Op::Update, id.clone()))?;

    let db = state.db.lock().await;
    let matched = db.update_issue(&project, key, &req.changes).map_err(|err| {
        tracing::error!(error = %err, %project, %id, "issue update failed");
        ApiError::store(Op::Update, Some(id.clone()))
    })?;

    if !matched {
        return Err(ApiError::not_found(Op::Update, id));
    }
    Ok(Json(ActionOutcome {
        result: "successfully updated",
        id,
    }))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    Path(project): Path<String>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<ActionOutcome>, ApiError> {
    require_project(&project, Op::Delete)?;
    let req = body_or_default(body);

    let id = req.id.ok_or_else(|| ApiError::missing_id(Op::Delete))?;
    let key = id
        .as_key()
        .ok_or_else(|| ApiError::invalid_id(Op::Delete, id.clone()))?;

    let db = state.db.lock().await;
    let deleted = db.delete_issue(&project, key).map_err(|err| {
        tracing::error!(error = %err, %project, %id, "issue delete failed");
        ApiError::store(Op::Delete, Some(id.clone()))
    })?;

    if !deleted {
        return Err(ApiError::not_found(Op::Delete, id));
    }
    Ok(Json(ActionOutcome {
        result: "successfully deleted",
        id,
    }))
}
