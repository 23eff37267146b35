use axum::{extract::State, Json};
use validator::Validate;

use crate::{
    dto::auth_dto::{AuthenticatedUser, TelegramAuthRequest, TelegramAuthResponse},
    error::{Error, Result},
    utils::telegram_auth::AuthError,
    AppState,
};

#[axum::debug_handler]
pub async fn authenticate(
    State(state): State<AppState>,
    Json(payload): Json<TelegramAuthRequest>,
) -> Result<Json<TelegramAuthResponse>> {
    payload.validate()?;

    let parsed = state.verifier.verify(&payload.init_data)?;

    // The signature may be valid without a user field (e.g. a payload from
    // an inline-mode launch); this endpoint needs an identity.
    let user = parsed
        .user
        .ok_or(Error::Auth(AuthError::MalformedUser))?;

    tracing::info!(user_id = user.id, "telegram init data verified");

    let profile = state.user_service.upsert_profile(&user).await?;

    Ok(Json(TelegramAuthResponse {
        ok: true,
        user: AuthenticatedUser {
            id: profile.telegram_id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            username: profile.username,
            photo_url: profile.photo_url,
        },
    }))
}
