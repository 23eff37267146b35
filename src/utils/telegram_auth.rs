use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Failure modes of init data verification. Every variant is a terminal
/// rejection of the payload; retrying with the same input cannot succeed.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("init data has no hash field")]
    MissingSignature,

    #[error("init data signature mismatch")]
    InvalidSignature,

    #[error("init data user field is missing or not valid JSON")]
    MalformedUser,

    #[error("init data auth_date is missing or not a number")]
    MalformedAuthDate,

    #[error("init data is too old")]
    Expired,
}

/// The user object Telegram embeds in the `user` field of init data.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
    pub photo_url: Option<String>,
    pub allows_write_to_pm: Option<bool>,
}

/// A verified init data payload. Known fields are typed; anything else the
/// client sent (`query_id`, `chat_instance`, ...) is kept as raw strings in
/// `extra`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedInitData {
    pub user: Option<TelegramUser>,
    pub auth_date: Option<i64>,
    pub hash: String,
    pub extra: HashMap<String, String>,
}

/// Verifier for Telegram WebApp init data.
///
/// See <https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app>
///
/// The per-bot secret key (`HMAC-SHA256("WebAppData", bot_token)`) is derived
/// once at construction and reused read-only across requests.
pub struct InitDataVerifier {
    secret_key: [u8; 32],
    max_age_secs: Option<u64>,
}

impl InitDataVerifier {
    /// `max_age_secs` enables an optional freshness window on `auth_date`;
    /// `None` accepts payloads of any age.
    pub fn new(bot_token: &str, max_age_secs: Option<u64>) -> Result<Self> {
        if bot_token.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN must not be empty".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(b"WebAppData")
            .expect("HMAC accepts any key length");
        mac.update(bot_token.as_bytes());
        let secret_key: [u8; 32] = mac.finalize().into_bytes().into();

        Ok(Self {
            secret_key,
            max_age_secs,
        })
    }

    /// Validate a raw init data string and extract its typed contents.
    pub fn verify(&self, init_data: &str) -> std::result::Result<ParsedInitData, AuthError> {
        // Last value wins per key, as in any query-string map.
        let mut fields: HashMap<String, String> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(init_data.as_bytes()) {
            fields.insert(key.into_owned(), value.into_owned());
        }

        let received_hash = fields.remove("hash").ok_or(AuthError::MissingSignature)?;

        let check_string = data_check_string(&fields);

        let mut mac = HmacSha256::new_from_slice(&self.secret_key)
            .expect("HMAC accepts any key length");
        mac.update(check_string.as_bytes());
        let computed = mac.finalize().into_bytes();

        // A non-hex hash can never match, so it gets the same answer as a
        // mismatch.
        let received_bytes =
            hex::decode(&received_hash).map_err(|_| AuthError::InvalidSignature)?;
        if computed.as_slice().ct_eq(&received_bytes).unwrap_u8() != 1 {
            return Err(AuthError::InvalidSignature);
        }

        let auth_date = fields.get("auth_date").and_then(|v| v.parse::<i64>().ok());

        if let Some(max_age) = self.max_age_secs {
            let ts = auth_date.ok_or(AuthError::MalformedAuthDate)?;
            let age = chrono::Utc::now().timestamp() - ts;
            if age > max_age as i64 {
                return Err(AuthError::Expired);
            }
        }

        let user = match fields.get("user") {
            Some(raw) => Some(
                serde_json::from_str::<TelegramUser>(raw)
                    .map_err(|_| AuthError::MalformedUser)?,
            ),
            None => None,
        };

        let extra: HashMap<String, String> = fields
            .into_iter()
            .filter(|(key, _)| key != "user" && key != "auth_date")
            .collect();

        Ok(ParsedInitData {
            user,
            auth_date,
            hash: received_hash,
            extra,
        })
    }
}

/// Canonical string signed by Telegram: every `key=value` pair except
/// `hash`, with values as decoded, sorted ascending, joined with newlines.
fn data_check_string(fields: &HashMap<String, String>) -> String {
    let mut lines: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11";

    fn compute_hash(fields: &[(&str, &str)], bot_token: &str) -> String {
        let mut lines: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        lines.sort();
        let check_string = lines.join("\n");

        let mut mac = HmacSha256::new_from_slice(b"WebAppData").unwrap();
        mac.update(bot_token.as_bytes());
        let secret_key = mac.finalize().into_bytes();

        let mut mac = HmacSha256::new_from_slice(&secret_key).unwrap();
        mac.update(check_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_init_data(fields: &[(&str, &str)], bot_token: &str) -> String {
        let hash = compute_hash(fields, bot_token);
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in fields {
            serializer.append_pair(k, v);
        }
        serializer.append_pair("hash", &hash);
        serializer.finish()
    }

    fn verifier() -> InitDataVerifier {
        InitDataVerifier::new(BOT_TOKEN, None).unwrap()
    }

    #[test]
    fn recovers_user_from_signed_payload() {
        let user_json = r#"{"id":123456789,"first_name":"John","last_name":"Doe","username":"johndoe","language_code":"en","photo_url":"https://t.me/i/userpic/320/johndoe.jpg","allows_write_to_pm":true}"#;
        let raw = signed_init_data(
            &[
                ("user", user_json),
                ("auth_date", "1700000000"),
                ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ],
            BOT_TOKEN,
        );

        let parsed = verifier().verify(&raw).expect("valid payload");
        let user = parsed.user.expect("user present");
        assert_eq!(user.id, 123456789);
        assert_eq!(user.first_name.as_deref(), Some("John"));
        assert_eq!(user.last_name.as_deref(), Some("Doe"));
        assert_eq!(user.username.as_deref(), Some("johndoe"));
        assert_eq!(user.language_code.as_deref(), Some("en"));
        assert_eq!(
            user.photo_url.as_deref(),
            Some("https://t.me/i/userpic/320/johndoe.jpg")
        );
        assert_eq!(user.allows_write_to_pm, Some(true));
        assert_eq!(parsed.auth_date, Some(1700000000));
    }

    #[test]
    fn minimal_payload_yields_user_id() {
        let raw = signed_init_data(
            &[("user", r#"{"id":42}"#), ("auth_date", "1700000000")],
            BOT_TOKEN,
        );
        let parsed = verifier().verify(&raw).expect("valid payload");
        assert_eq!(parsed.user.unwrap().id, 42);
    }

    #[test]
    fn verification_is_deterministic() {
        let raw = signed_init_data(
            &[("user", r#"{"id":7,"first_name":"A"}"#), ("auth_date", "1700000000")],
            BOT_TOKEN,
        );
        let v = verifier();
        assert_eq!(v.verify(&raw).unwrap(), v.verify(&raw).unwrap());
    }

    #[test]
    fn check_string_is_sorted_and_excludes_hash() {
        let mut fields = HashMap::new();
        fields.insert("b".to_string(), "2".to_string());
        fields.insert("a".to_string(), "1".to_string());
        assert_eq!(data_check_string(&fields), "a=1\nb=2");
    }

    #[test]
    fn field_order_does_not_affect_verification() {
        let fields = [("auth_date", "1700000000"), ("user", r#"{"id":1}"#)];
        let hash = compute_hash(&fields, BOT_TOKEN);
        let forward = format!(
            "auth_date=1700000000&user=%7B%22id%22%3A1%7D&hash={}",
            hash
        );
        let backward = format!(
            "hash={}&user=%7B%22id%22%3A1%7D&auth_date=1700000000",
            hash
        );
        let v = verifier();
        assert!(v.verify(&forward).is_ok());
        assert!(v.verify(&backward).is_ok());
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        // Only "a=2" is signed; the earlier "a=1" must be shadowed.
        let hash = compute_hash(&[("a", "2")], BOT_TOKEN);
        let raw = format!("a=1&a=2&hash={}", hash);
        let parsed = verifier().verify(&raw).expect("last value wins");
        assert_eq!(parsed.extra.get("a").map(String::as_str), Some("2"));
    }

    #[test]
    fn tampered_field_is_rejected() {
        let raw = signed_init_data(
            &[
                ("user", r#"{"id":42,"username":"alice"}"#),
                ("auth_date", "1700000000"),
            ],
            BOT_TOKEN,
        );
        let tampered = raw.replace("alice", "mallory");
        assert_ne!(raw, tampered);
        assert_eq!(
            verifier().verify(&tampered),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn replaced_hash_is_rejected() {
        let raw = signed_init_data(&[("user", r#"{"id":42}"#)], BOT_TOKEN);
        let (front, _) = raw.split_once("hash=").unwrap();
        let forged = format!("{}hash={}", front, "ab".repeat(32));
        assert_eq!(verifier().verify(&forged), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn non_hex_hash_is_rejected() {
        assert_eq!(
            verifier().verify("a=1&hash=not-hex-at-all"),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn missing_hash_is_rejected() {
        assert_eq!(
            verifier().verify("auth_date=1700000000&user=%7B%22id%22%3A1%7D"),
            Err(AuthError::MissingSignature)
        );
    }

    #[test]
    fn wrong_bot_token_is_rejected() {
        let raw = signed_init_data(&[("user", r#"{"id":42}"#)], BOT_TOKEN);
        let other = InitDataVerifier::new("999999:wrong-token", None).unwrap();
        assert_eq!(other.verify(&raw), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn unparseable_user_is_rejected() {
        let raw = signed_init_data(
            &[("user", "not-json"), ("auth_date", "1700000000")],
            BOT_TOKEN,
        );
        assert_eq!(verifier().verify(&raw), Err(AuthError::MalformedUser));
    }

    #[test]
    fn unknown_fields_pass_through_as_raw_strings() {
        let raw = signed_init_data(
            &[
                ("user", r#"{"id":1}"#),
                ("auth_date", "1700000000"),
                ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
                ("chat_instance", "-428617000"),
            ],
            BOT_TOKEN,
        );
        let parsed = verifier().verify(&raw).unwrap();
        assert_eq!(
            parsed.extra.get("query_id").map(String::as_str),
            Some("AAHdF6IQAAAAAN0XohDhrOrc")
        );
        assert_eq!(
            parsed.extra.get("chat_instance").map(String::as_str),
            Some("-428617000")
        );
        assert!(!parsed.extra.contains_key("user"));
        assert!(!parsed.extra.contains_key("auth_date"));
        assert!(!parsed.extra.contains_key("hash"));
    }

    #[test]
    fn old_payload_passes_without_max_age() {
        // auth_date far in the past; no freshness window configured.
        let raw = signed_init_data(
            &[("user", r#"{"id":1}"#), ("auth_date", "1700000000")],
            BOT_TOKEN,
        );
        assert!(verifier().verify(&raw).is_ok());
    }

    #[test]
    fn stale_payload_is_rejected_with_max_age() {
        let stale = (chrono::Utc::now().timestamp() - 600).to_string();
        let raw = signed_init_data(
            &[("user", r#"{"id":1}"#), ("auth_date", &stale)],
            BOT_TOKEN,
        );
        let v = InitDataVerifier::new(BOT_TOKEN, Some(300)).unwrap();
        assert_eq!(v.verify(&raw), Err(AuthError::Expired));
    }

    #[test]
    fn fresh_payload_passes_with_max_age() {
        let now = chrono::Utc::now().timestamp().to_string();
        let raw = signed_init_data(
            &[("user", r#"{"id":1}"#), ("auth_date", &now)],
            BOT_TOKEN,
        );
        let v = InitDataVerifier::new(BOT_TOKEN, Some(300)).unwrap();
        assert!(v.verify(&raw).is_ok());
    }

    #[test]
    fn missing_auth_date_is_rejected_with_max_age() {
        let raw = signed_init_data(&[("user", r#"{"id":1}"#)], BOT_TOKEN);
        let v = InitDataVerifier::new(BOT_TOKEN, Some(300)).unwrap();
        assert_eq!(v.verify(&raw), Err(AuthError::MalformedAuthDate));
    }

    #[test]
    fn empty_bot_token_is_a_config_error() {
        assert!(InitDataVerifier::new("", None).is_err());
    }
}
