pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::services::user_service::UserService;
use crate::utils::telegram_auth::InitDataVerifier;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub user_service: UserService,
    pub verifier: Arc<InitDataVerifier>,
}

impl AppState {
    pub fn new(pool: PgPool) -> crate::error::Result<Self> {
        let config = crate::config::get_config();

        let verifier = InitDataVerifier::new(
            &config.telegram_bot_token,
            config.auth_max_age_secs,
        )?;
        let user_service = UserService::new(pool.clone());

        Ok(Self {
            pool,
            user_service,
            verifier: Arc::new(verifier),
        })
    }
}
