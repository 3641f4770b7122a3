use crate::api::response::{ApiResponse, ErrorResponse};
use crate::db::GameStoreError;
use crate::features::FeatureState;
use crate::middleware::{Caller, Unauthorized};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use super::commands::{UpdateGameCommand, UpdateGameError};

const MODIFY_FORBIDDEN: &str = "You are not allowed to create events.";

pub fn games_routes() -> Router<FeatureState> {
    Router::new().route("/modify", post(modify_game))
}

#[tracing::instrument(skip(state, caller, payload))]
async fn modify_game(
    State(state): State<FeatureState>,
    caller: Caller,
    payload: Result<Json<UpdateGameCommand>, JsonRejection>,
) -> Result<Response, GameApiError> {
    let admin = caller.require_admin(MODIFY_FORBIDDEN)?;
    let Json(command) = payload.map_err(|e| UpdateGameError::Validation(e.body_text()))?;

    let response =
        super::commands::update::handle(state.games.as_ref(), &admin, command).await?;

    tracing::info!(
        short_name = %response.game.event_short_name,
        year = response.game.year,
        "Game updated via API"
    );

    Ok(ApiResponse::success(response).into_response())
}

#[derive(Debug)]
enum GameApiError {
    Unauthorized(Unauthorized),
    Update(UpdateGameError),
}

impl From<Unauthorized> for GameApiError {
    fn from(err: Unauthorized) -> Self {
        Self::Unauthorized(err)
    }
}

impl From<UpdateGameError> for GameApiError {
    fn from(err: UpdateGameError) -> Self {
        Self::Update(err)
    }
}

impl IntoResponse for GameApiError {
    fn into_response(self) -> Response {
        match self {
            GameApiError::Unauthorized(err) => {
                let error = ErrorResponse::new("UNAUTHORIZED", err.to_string());
                (StatusCode::UNAUTHORIZED, Json(error)).into_response()
            },
            GameApiError::Update(
                err @ (UpdateGameError::Validation(_) | UpdateGameError::NoFieldsToUpdate),
            ) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", err.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            GameApiError::Update(
                err @ (UpdateGameError::EventNotFound(_) | UpdateGameError::GameNotFound(_)),
            ) => {
                let error = ErrorResponse::new("NOT_FOUND", err.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            GameApiError::Update(UpdateGameError::Store(err)) => {
                tracing::error!("Game store error during update: {}", err);
                let (status, code, message) = match err {
                    GameStoreError::Unavailable(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "STORE_UNAVAILABLE",
                        "The game store is unavailable",
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "A database error occurred",
                    ),
                };
                (status, Json(ErrorResponse::new(code, message))).into_response()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_404() {
        let response = GameApiError::Update(UpdateGameError::GameNotFound(1999)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_empty_patch_is_400() {
        let response = GameApiError::Update(UpdateGameError::NoFieldsToUpdate).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unavailable_store_is_503() {
        let response = GameApiError::Update(UpdateGameError::Store(GameStoreError::Unavailable(
            "offline".to_string(),
        )))
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
