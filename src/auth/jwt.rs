use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

use super::{AuthenticatedUser, Claims};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid user ID")]
    InvalidSubject,
}

/// Validates access tokens presented at the WebSocket handshake
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        // HMAC only; tokens are issued by the auth service with HS256
        let mut validation = Validation::new(Algorithm::HS256);

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.decode_claims(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(AuthenticatedUser {
            user_id,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tokio_test::{assert_err, assert_ok};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(sub: &str, exp_offset: i64) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: sub.to_string(),
            role: "player".to_string(),
            exp: now + exp_offset,
            iat: now,
        }
    }

    #[test]
    fn test_valid_token() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        let user_id = Uuid::new_v4();

        let token = create_test_token(&claims_for(&user_id.to_string(), 3600), &config.secret);
        let user = assert_ok!(validator.validate(&token));

        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, "player");
    }

    #[test]
    fn test_invalid_token() {
        let validator = JwtValidator::new(&create_test_config());
        let err = assert_err!(validator.validate("invalid-token"));
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new(&create_test_config());
        let token = create_test_token(&claims_for(&Uuid::new_v4().to_string(), 3600), "other");
        assert_err!(validator.validate(&token));
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        let claims = claims_for(&Uuid::new_v4().to_string(), -3600);
        assert!(claims.exp < chrono::Utc::now().timestamp());

        let token = create_test_token(&claims, &config.secret);
        assert_err!(validator.validate(&token));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        let token = create_test_token(&claims_for("user-123", 3600), &config.secret);

        let err = assert_err!(validator.validate(&token));
        assert!(matches!(err, AuthError::InvalidSubject));
        assert_eq!(err.to_string(), "Invalid user ID");
    }
}
