//! JWT bearer-token authentication.
//!
//! Tokens are HS256-signed and carry the actor id and role set. Who issues them is outside this
//! server: an identity provider or the ops tooling mints them with the shared `SSC_JWT_SECRET`.
//! The server only validates and extracts [`JwtClaims`].

use std::{future::ready, time::Duration};

use actix_web::{dev::Payload, http::header, web, FromRequest, HttpMessage, HttpRequest};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use settle_common::Secret;
use settlement_engine::db_types::{Actor, Role, Roles};

use crate::{config::AuthConfig, errors::AuthError};

const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// The actor id.
    pub sub: String,
    pub roles: Roles,
    pub exp: i64,
}

impl JwtClaims {
    /// The engine actor this token authenticates as. The most privileged role present is the one
    /// recorded on audit entries.
    pub fn actor(&self) -> Actor {
        let role = [Role::SuperAdmin, Role::Finance, Role::Admin, Role::ReadOnly]
            .into_iter()
            .find(|r| self.roles.contains(r))
            .unwrap_or(Role::ReadOnly);
        Actor::new(self.sub.clone(), role)
    }
}

pub fn validate_token(token: &str, secret: &Secret<String>) -> Result<JwtClaims, AuthError> {
    let key = DecodingKey::from_secret(secret.reveal().as_bytes());
    let data = decode::<JwtClaims>(token, &key, &Validation::default())
        .map_err(|e| AuthError::ValidationError(e.to_string()))?;
    Ok(data.claims)
}

/// Pulls the bearer token off the request and validates it against the configured secret.
pub fn claims_from_request(req: &HttpRequest) -> Result<JwtClaims, AuthError> {
    if let Some(claims) = req.extensions().get::<JwtClaims>() {
        return Ok(claims.clone());
    }
    let header = req.headers().get(header::AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = header.to_str().map_err(|e| AuthError::PoorlyFormattedToken(e.to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::PoorlyFormattedToken("Expected a Bearer token".to_string()))?;
    let config = req
        .app_data::<web::Data<AuthConfig>>()
        .ok_or_else(|| AuthError::ValidationError("Server auth configuration is missing".to_string()))?;
    let claims = validate_token(token, &config.jwt_secret)?;
    req.extensions_mut().insert(claims.clone());
    Ok(claims)
}

impl FromRequest for JwtClaims {
    type Error = crate::errors::ServerError;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(claims_from_request(req).map_err(Into::into))
    }
}

/// Issues access tokens. Used by the ops tooling and the test suites; the server itself never
/// mints tokens on behalf of a caller.
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self { key: EncodingKey::from_secret(config.jwt_secret.reveal().as_bytes()) }
    }

    pub fn issue_token(&self, actor_id: &str, roles: Roles, duration: Option<Duration>) -> Result<String, AuthError> {
        let duration = duration.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let exp = Utc::now().timestamp() + duration.as_secs() as i64;
        let claims = JwtClaims { sub: actor_id.to_string(), roles, exp };
        encode(&Header::default(), &claims, &self.key).map_err(|e| AuthError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use settle_common::Secret;
    use settlement_engine::db_types::{Role, Roles};

    use super::{validate_token, TokenIssuer};
    use crate::config::AuthConfig;

    fn config() -> AuthConfig {
        AuthConfig { jwt_secret: Secret::new("test-secret".to_string()) }
    }

    #[test]
    fn issued_tokens_validate_and_round_trip_the_claims() {
        let issuer = TokenIssuer::new(&config());
        let token = issuer.issue_token("alice", Roles(vec![Role::Finance, Role::ReadOnly]), None).unwrap();
        let claims = validate_token(&token, &config().jwt_secret).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.roles.contains(&Role::Finance));
        let actor = claims.actor();
        assert_eq!(actor.id, "alice");
        assert_eq!(actor.role, Role::Finance);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let issuer = TokenIssuer::new(&AuthConfig { jwt_secret: Secret::new("other-secret".to_string()) });
        let token = issuer.issue_token("mallory", Roles(vec![Role::SuperAdmin]), None).unwrap();
        assert!(validate_token(&token, &config().jwt_secret).is_err());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(validate_token("not-a-jwt", &config().jwt_secret).is_err());
    }
}
