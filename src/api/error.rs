use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::models::IssueId;

/// Which controller operation an error surfaced from. Store and lookup
/// failures render as that operation's generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Create,
    Update,
    Delete,
}

impl Op {
    fn store_message(self) -> &'static str {
        match self {
            Op::List => "Error fetching issues",
            Op::Create => "Error creating issue",
            Op::Update => "could not update",
            Op::Delete => "could not delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No project path segment supplied.
    MissingProject,
    /// Create request lacking a mandatory field.
    MissingRequiredField,
    /// Update/delete request lacking `_id`.
    MissingId,
    /// Update request carrying `_id` and nothing to change.
    NoUpdateFields,
    /// `_id` present but not parseable as a store identifier.
    InvalidId,
    /// Identifier well-formed but matched zero records.
    NotFound,
    /// The store call itself errored.
    Store,
}

/// A caller-visible failure. Always rendered as HTTP 200 with an `error`
/// key in the body; callers detect failure by inspecting the body, never
/// the status code.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    op: Op,
    /// Echoed whenever the request carried an identifier, omitted only when
    /// none was given. Applied uniformly across every error path.
    id: Option<IssueId>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, op: Op, id: Option<IssueId>) -> Self {
        ApiError { kind, op, id }
    }

    pub fn missing_project(op: Op) -> Self {
        Self::new(ErrorKind::MissingProject, op, None)
    }

    pub fn missing_required_field() -> Self {
        Self::new(ErrorKind::MissingRequiredField, Op::Create, None)
    }

    pub fn missing_id(op: Op) -> Self {
        Self::new(ErrorKind::MissingId, op, None)
    }

    pub fn no_update_fields(id: IssueId) -> Self {
        Self::new(ErrorKind::NoUpdateFields, Op::Update, Some(id))
    }

    pub fn invalid_id(op: Op, id: IssueId) -> Self {
        Self::new(ErrorKind::InvalidId, op, Some(id))
    }

    pub fn not_found(op: Op, id: IssueId) -> Self {
        Self::new(ErrorKind::NotFound, op, Some(id))
    }

    pub fn store(op: Op, id: Option<IssueId>) -> Self {
        Self::new(ErrorKind::Store, op, id)
    }

    pub fn message(&self) -> &'static str {
        match self.kind {
            ErrorKind::MissingProject => "No project provided",
            ErrorKind::MissingRequiredField => "required field(s) missing",
            ErrorKind::MissingId => "missing _id",
            ErrorKind::NoUpdateFields => "no update field(s) sent",
            ErrorKind::InvalidId | ErrorKind::NotFound | ErrorKind::Store => {
                self.op.store_message()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message() });
        if let Some(id) = &self.id {
            body["_id"] = json!(id);
        }
        (StatusCode::OK, Json(body)).into_response()
    }
}
