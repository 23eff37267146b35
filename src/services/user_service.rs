use crate::error::Result;
use crate::models::user::UserProfile;
use crate::utils::telegram_auth::TelegramUser;
use sqlx::PgPool;

#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create-or-refresh the profile row for a verified Telegram user.
    ///
    /// A single statement, so concurrent launches from the same account
    /// (several devices at once) cannot race: the insert sets `created_at`
    /// exactly once, the conflict branch refreshes everything else.
    pub async fn upsert_profile(&self, user: &TelegramUser) -> Result<UserProfile> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            INSERT INTO users (telegram_id, first_name, last_name, username, language_code, photo_url, allows_write_to_pm, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
            ON CONFLICT (telegram_id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                username = EXCLUDED.username,
                language_code = EXCLUDED.language_code,
                photo_url = EXCLUDED.photo_url,
                allows_write_to_pm = EXCLUDED.allows_write_to_pm,
                updated_at = now()
            RETURNING telegram_id, first_name, last_name, username, language_code, photo_url, allows_write_to_pm, created_at, updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.username)
        .bind(&user.language_code)
        .bind(&user.photo_url)
        .bind(user.allows_write_to_pm)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    pub async fn get_by_telegram_id(&self, telegram_id: i64) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT telegram_id, first_name, last_name, username, language_code, photo_url, allows_write_to_pm, created_at, updated_at
            FROM users
            WHERE telegram_id = $1
            "#,
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}
