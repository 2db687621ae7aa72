//! HS256 bearer tokens

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TokenVerifier;

/// Claims read from an access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Principal (profile) id
    pub sub: String,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

/// Verifies tokens issued by the account service with a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and validate, returning the claims
    pub fn claims(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(data.claims),
            Ok(_) => None,
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => debug!("Rejected expired token"),
                    ErrorKind::InvalidSignature => debug!("Rejected token with bad signature"),
                    _ => debug!("Rejected malformed token: {}", e),
                }
                None
            }
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Option<String> {
        self.claims(token).map(|claims| claims.sub)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Claims;
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Issue a token the way the account service does
    pub fn issue(secret: &str, sub: &str, ttl_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + ttl_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::issue;
    use super::*;

    #[tokio::test]
    async fn test_valid_token_yields_principal() {
        let verifier = JwtVerifier::new("secret");
        let token = issue("secret", "profile-1", 3600);
        assert_eq!(verifier.verify(&token).await.as_deref(), Some("profile-1"));
    }

    #[tokio::test]
    async fn test_rejected_tokens() {
        let verifier = JwtVerifier::new("secret");

        assert_eq!(verifier.verify(&issue("other", "profile-1", 3600)).await, None);
        // Past the default 60 s leeway
        assert_eq!(verifier.verify(&issue("secret", "profile-1", -600)).await, None);
        assert_eq!(verifier.verify("not-a-jwt").await, None);
        assert_eq!(verifier.verify(&issue("secret", "", 3600)).await, None);
    }
}
