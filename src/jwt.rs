//! Session token codec.
//!
//! Tokens are HS256 JWTs carrying `id`, `username`, `email`, `roles`, `iat`
//! and `exp`. Verification only honours HS256; the header algorithm is checked
//! before the signature, and `exp` is compared against the current time with
//! no leeway.

use std::collections::HashSet;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::AppState;
use crate::errors::AppError;

const ALGORITHM: Algorithm = Algorithm::HS256;
const DEFAULT_EXP_HOURS: i64 = 4;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(DEFAULT_EXP_HOURS))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        let config = Self::new(secret.into_bytes(), exp_hours);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }
        if self.exp_hours <= 0 {
            return Err(AppError::configuration("JWT_EXP_HOURS must be positive"));
        }
        if self.secret.len() < 32 {
            tracing::warn!("JWT secret is shorter than recommended (32 bytes)");
        }
        Ok(())
    }
}

/// Identity and authorization claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// The claim set as it appears on the wire. `id` is left untyped so that
/// numeric and numeric-string encodings both parse.
#[derive(Debug, Serialize, Deserialize)]
struct WireClaims {
    id: Value,
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    iat: i64,
    exp: i64,
}

impl From<&SessionClaims> for WireClaims {
    fn from(claims: &SessionClaims) -> Self {
        WireClaims {
            id: Value::from(claims.user_id),
            username: claims.username.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            iat: claims.issued_at,
            exp: claims.expires_at,
        }
    }
}

impl TryFrom<WireClaims> for SessionClaims {
    type Error = AppError;

    fn try_from(wire: WireClaims) -> Result<Self, Self::Error> {
        Ok(SessionClaims {
            user_id: parse_subject_id(&wire.id)?,
            username: wire.username,
            email: wire.email,
            roles: wire.roles,
            issued_at: wire.iat,
            expires_at: wire.exp,
        })
    }
}

fn parse_subject_id(value: &Value) -> Result<i64, AppError> {
    let id = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(AppError::malformed("subject id claim is not a positive integer")),
    }
}

/// Signs and verifies session tokens with one process-wide secret.
#[derive(Clone)]
pub struct SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl SessionCodec {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked by `verify_at` so the comparison is exactly `now > exp`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        Self {
            encoding_key: EncodingKey::from_secret(&config.secret),
            decoding_key: DecodingKey::from_secret(&config.secret),
            validation,
            lifetime: Duration::hours(config.exp_hours),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Builds claims valid from now for the configured lifetime and signs them.
    pub fn mint(
        &self,
        user_id: i64,
        username: &str,
        email: Option<&str>,
        roles: Vec<String>,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id,
            username: username.to_string(),
            email: email.map(str::to_string),
            roles,
            issued_at: now.timestamp(),
            expires_at: (now + self.lifetime).timestamp(),
        };
        self.issue(&claims)
    }

    pub fn issue(&self, claims: &SessionClaims) -> Result<String, AppError> {
        self.sign(&WireClaims::from(claims))
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AppError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|err| AppError::internal(format!("failed to sign token: {err}")))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<SessionClaims, AppError> {
        let data = jsonwebtoken::decode::<WireClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?;

        let claims = SessionClaims::try_from(data.claims)?;
        if now > claims.expires_at {
            return Err(AppError::Expired);
        }
        Ok(claims)
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AppError {
    match err.kind() {
        ErrorKind::InvalidSignature => AppError::bad_signature("signature mismatch"),
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AppError::bad_signature("unexpected signing algorithm")
        }
        ErrorKind::ExpiredSignature => AppError::Expired,
        _ => AppError::malformed(err.to_string()),
    }
}

pub fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticated caller, as confirmed by [`crate::authenticator::Authenticator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub roles: Vec<String>,
}

impl From<SessionClaims> for AuthUser {
    fn from(claims: SessionClaims) -> Self {
        AuthUser {
            user_id: claims.user_id,
            username: claims.username,
            roles: claims.roles,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        state.authenticator.authenticate(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec(secret: &str) -> SessionCodec {
        SessionCodec::new(&JwtConfig::new(secret.as_bytes().to_vec(), 4))
    }

    fn sample_claims(now: i64) -> SessionClaims {
        SessionClaims {
            user_id: 42,
            username: "ada".to_string(),
            email: Some("ada@example.com".to_string()),
            roles: vec!["admin".to_string(), "viewer".to_string()],
            issued_at: now,
            expires_at: now + 4 * 3600,
        }
    }

    #[test]
    fn issued_claims_verify_unchanged() {
        let codec = codec("round-trip-secret");
        let now = Utc::now().timestamp();
        let claims = sample_claims(now);

        let token = codec.issue(&claims).unwrap();
        assert_eq!(codec.verify(&token).unwrap(), claims);
    }

    #[test]
    fn expiry_is_strictly_after_exp() {
        let codec = codec("expiry-secret");
        let claims = sample_claims(1_000);
        let token = codec.issue(&claims).unwrap();

        assert!(codec.verify_at(&token, claims.expires_at).is_ok());
        let err = codec.verify_at(&token, claims.expires_at + 1).unwrap_err();
        assert!(matches!(err, AppError::Expired), "got {err:?}");
        assert!(matches!(codec.verify(&token), Err(AppError::Expired)));
    }

    #[test]
    fn minted_token_carries_roles_and_lifetime() {
        let codec = codec("mint-secret");
        let token = codec
            .mint(7, "grace", None, vec!["editor".to_string()])
            .unwrap();
        let claims = codec.verify(&token).unwrap();

        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.roles, vec!["editor".to_string()]);
        assert_eq!(claims.email, None);
        assert_eq!(claims.expires_at - claims.issued_at, 4 * 3600);
    }

    #[test]
    fn other_secret_is_bad_signature() {
        let token = codec("secret-one").issue(&sample_claims(Utc::now().timestamp())).unwrap();
        let err = codec("secret-two").verify(&token).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)), "got {err:?}");
    }

    #[test]
    fn altered_claims_are_bad_signature() {
        let codec = codec("tamper-secret");
        let claims = sample_claims(Utc::now().timestamp());
        let token = codec.issue(&claims).unwrap();

        let mut forged = claims.clone();
        forged.roles.push("super_admin".to_string());
        let forged_token = codec.issue(&forged).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged_token.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        let err = codec.verify(&spliced).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)), "got {err:?}");
    }

    #[test]
    fn other_algorithm_is_rejected() {
        let codec = codec("alg-secret");
        let claims = WireClaims::from(&sample_claims(Utc::now().timestamp()));
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS512), &claims, &codec.encoding_key).unwrap();

        let err = codec.verify(&token).unwrap_err();
        assert!(matches!(err, AppError::BadSignature(_)), "got {err:?}");
    }

    #[test]
    fn unsigned_token_is_rejected() {
        let codec = codec("none-secret");
        let token = codec.issue(&sample_claims(Utc::now().timestamp())).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        // {"alg":"none","typ":"JWT"}
        let unsigned = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{payload}.");

        let err = codec.verify(&unsigned).unwrap_err();
        assert!(err.is_token_error());
        assert!(!matches!(err, AppError::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = codec("garbage-secret").verify("not.a.jwt").unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn string_subject_id_is_accepted() {
        let codec = codec("string-id-secret");
        let now = Utc::now().timestamp();
        let token = codec
            .sign(&json!({"id": "17", "username": "lin", "roles": ["ops"], "iat": now, "exp": now + 60}))
            .unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.user_id, 17);
        assert_eq!(claims.roles, vec!["ops".to_string()]);
    }

    #[test]
    fn float_subject_id_is_accepted() {
        let codec = codec("float-id-secret");
        let now = Utc::now().timestamp();
        let token = codec
            .sign(&json!({"id": 9.0, "username": "lin", "iat": now, "exp": now + 60}))
            .unwrap();

        assert_eq!(codec.verify(&token).unwrap().user_id, 9);
    }

    #[test]
    fn unrecognised_subject_id_is_malformed() {
        let codec = codec("bad-id-secret");
        let now = Utc::now().timestamp();
        for id in [json!(true), json!("seven"), json!(1.5), json!(null), json!([1])] {
            let token = codec
                .sign(&json!({"id": id, "username": "lin", "iat": now, "exp": now + 60}))
                .unwrap();
            let err = codec.verify(&token).unwrap_err();
            assert!(matches!(err, AppError::Malformed(_)), "id {id} gave {err:?}");
        }
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn config_rejects_empty_secret_and_bad_lifetime() {
        assert!(JwtConfig::new(Vec::new(), 4).validate().is_err());
        assert!(JwtConfig::new(b"secret".to_vec(), 0).validate().is_err());
        assert!(JwtConfig::new(b"secret".to_vec(), 4).validate().is_ok());
    }
}
