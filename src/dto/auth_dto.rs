use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TelegramAuthRequest {
    #[serde(rename = "initData")]
    #[validate(length(min = 1, message = "initData is required"))]
    pub init_data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelegramAuthResponse {
    pub ok: bool,
    pub user: AuthenticatedUser,
}
