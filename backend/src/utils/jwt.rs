//! JWT token utilities for authentication and authorization.
//!
//! Provides creation and validation of the signed access/refresh token pair
//! that represents a client session. Tokens are never stored server-side; a
//! token stays usable until its expiry passes or its signature stops
//! verifying.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::Config;
use crate::errors::{ServiceError, ServiceResult};

/// Marker value carried in the `type` claim of refresh tokens. Access tokens
/// carry no `type` claim at all.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Claims embedded in a session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Account ID the session belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Convenience copy of the username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// `"refresh"` on refresh tokens, absent on access tokens.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Token expiration timestamp (seconds since epoch).
    pub exp: i64,
    /// Token issued at timestamp.
    pub iat: i64,
}

impl Claims {
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type.as_deref() == Some(REFRESH_TOKEN_TYPE)
    }
}

/// Signs and validates session tokens.
///
/// The signing algorithm and secret are process-wide configuration, loaded
/// once and passed in at construction.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Creates a codec from the process configuration.
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` if the configured algorithm name
    /// is not a known signing algorithm.
    pub fn new(config: &Config) -> ServiceResult<Self> {
        let algorithm = Algorithm::from_str(&config.jwt_algorithm).map_err(|_| {
            ServiceError::configuration(format!(
                "Unknown signing algorithm: {}",
                config.jwt_algorithm
            ))
        })?;

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        // An expired token is expired: no clock-skew grace.
        validation.leeway = 0;

        Ok(TokenCodec {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            header: Header::new(algorithm),
            validation,
            access_ttl: Duration::minutes(config.access_token_expire_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expire_days),
        })
    }

    /// Issues an access token for `subject`, expiring after `ttl` or the
    /// configured access-token lifetime.
    pub fn issue_access(
        &self,
        subject: &str,
        username: Option<&str>,
        ttl: Option<Duration>,
    ) -> ServiceResult<String> {
        self.issue(subject, username, None, ttl.unwrap_or(self.access_ttl))
    }

    /// Issues a refresh token for `subject`, marked with the refresh type
    /// claim and a longer default lifetime.
    pub fn issue_refresh(
        &self,
        subject: &str,
        username: Option<&str>,
        ttl: Option<Duration>,
    ) -> ServiceResult<String> {
        self.issue(
            subject,
            username,
            Some(REFRESH_TOKEN_TYPE.to_string()),
            ttl.unwrap_or(self.refresh_ttl),
        )
    }

    fn issue(
        &self,
        subject: &str,
        username: Option<&str>,
        token_type: Option<String>,
        ttl: Duration,
    ) -> ServiceResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: Some(subject.to_string()),
            username: username.map(str::to_string),
            token_type,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| ServiceError::configuration(format!("Token generation failed: {}", e)))
    }

    /// Validates a token's signature and expiry and returns its claims.
    /// Malformed, forged and expired tokens are all rejected the same way;
    /// access and refresh tokens are not distinguished here, callers inspect
    /// the type claim.
    pub fn decode(&self, token: &str) -> ServiceResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| ServiceError::unauthorized("Invalid token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    fn test_config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout_seconds: 3,
            jwt_secret: "unit-test-secret".to_string(),
            jwt_algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            server_port: 3000,
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(&test_config()).unwrap()
    }

    fn payload_json(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_access_token_round_trip() {
        let codec = codec();
        let token = codec
            .issue_access("0191f5e8-0000-7000-8000-000000000001", Some("alice"), None)
            .unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.subject(), Some("0191f5e8-0000-7000-8000-000000000001"));
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert!(!claims.is_refresh());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_access_token_has_no_type_claim() {
        let codec = codec();
        let token = codec.issue_access("subject-1", None, None).unwrap();

        let payload = payload_json(&token);
        assert!(payload.get("type").is_none());
        assert!(payload.get("username").is_none());
        assert!(payload.get("exp").is_some());
    }

    #[test]
    fn test_refresh_token_carries_type_claim() {
        let codec = codec();
        let token = codec.issue_refresh("subject-1", Some("alice"), None).unwrap();

        let claims = codec.decode(&token).unwrap();
        assert!(claims.is_refresh());
        assert_eq!(payload_json(&token)["type"], "refresh");
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = codec();
        let token = codec
            .issue_access("subject-1", None, Some(Duration::seconds(-5)))
            .unwrap();

        let err = codec.decode(&token).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized { .. }));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = codec();
        let token = codec.issue_access("subject-1", None, None).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let flipped = if parts[2].ends_with('A') { 'B' } else { 'A' };
        parts[2].pop();
        parts[2].push(flipped);
        let tampered = parts.join(".");

        assert!(codec.decode(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = codec().issue_access("subject-1", None, None).unwrap();

        let mut other_config = test_config();
        other_config.jwt_secret = "a-different-secret".to_string();
        let other = TokenCodec::new(&other_config).unwrap();

        assert!(other.decode(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let codec = codec();
        assert!(codec.decode("not-a-token").is_err());
        assert!(codec.decode("").is_err());
    }

    #[test]
    fn test_unknown_algorithm_is_configuration_error() {
        let mut config = test_config();
        config.jwt_algorithm = "HS9000".to_string();

        let err = TokenCodec::new(&config).unwrap_err();
        assert!(matches!(err, ServiceError::Configuration { .. }));
    }
}
