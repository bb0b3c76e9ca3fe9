use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::FacadeError;
use crate::server::server::AppState;

/// Body of `POST /password`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetRequestBody {
    pub user_id: Option<String>,
    pub reset_url: Option<String>,
}

/// Body of `PUT /password`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompleteResetBody {
    pub reset_password_token: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChangePasswordUser {
    pub username: Option<String>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

/// Body of `POST /users/{id}/change_password`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChangePasswordBody {
    pub user: Option<ChangePasswordUser>,
}

/// Facade error rendered as `{success, error, message, info: {message}}`.
pub struct ApiError(pub FacadeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FacadeError::MissingInput(_)
            | FacadeError::InvalidResetUrl
            | FacadeError::InvalidResetToken
            | FacadeError::TokenAlreadyUsed => StatusCode::BAD_REQUEST,
            FacadeError::UserNotFound | FacadeError::DirectoryNotFound(_) => StatusCode::NOT_FOUND,
            FacadeError::PasswordChangeRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FacadeError::AuthRefreshFailed(_) | FacadeError::DirectoryRejected { .. } => StatusCode::BAD_GATEWAY,
            FacadeError::DirectoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FacadeError::Unconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FacadeError> for ApiError {
    fn from(err: FacadeError) -> Self {
        ApiError(err.external())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "success": false,
            "error": self.0.kind(),
            "message": self.0.message(),
            "info": { "message": self.0.info_message() },
        });
        (status, Json(body)).into_response()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/password", post(request_reset).put(complete_reset))
        .route("/users/{id}/change_password", post(change_password))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn request_reset(
    State(state): State<AppState>,
    Json(body): Json<ResetRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = body.user_id.unwrap_or_default();
    let reset_url = body.reset_url.unwrap_or_default();
    state.workflow.request_reset(&user_id, &reset_url).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

async fn complete_reset(
    State(state): State<AppState>,
    Json(body): Json<CompleteResetBody>,
) -> Result<impl IntoResponse, ApiError> {
    let token = body.reset_password_token.unwrap_or_default();
    let new_password = body.new_password.unwrap_or_default();
    state.workflow.complete_reset(&token, &new_password).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

async fn change_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChangePasswordBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = body
        .user
        .ok_or_else(|| FacadeError::MissingInput("user".to_owned()))?;
    let changed_id = state
        .workflow
        .change_password(
            &id,
            &user.username.unwrap_or_default(),
            &user.old_password.unwrap_or_default(),
            &user.new_password.unwrap_or_default(),
        )
        .await?;
    info!("Emitted change-password event for: {}", changed_id);
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true, "data": { "id": changed_id } }))))
}
