use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use chatrelay_core::SessionUser;
use chatrelay_traits::UserType;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

/// Session token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type", default = "default_user_type")]
    pub user_type: UserType,
    pub exp: usize,
}

fn default_user_type() -> UserType {
    UserType::Regular
}

#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(Validation::new(Algorithm::HS256)),
        }
    }

    pub fn verify(&self, token: &str) -> Option<SessionUser> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(SessionUser {
                id: data.claims.sub,
                user_type: data.claims.user_type,
            }),
            Err(err) => {
                tracing::debug!(error = %err, "Rejected session token");
                None
            }
        }
    }
}

/// Resolves the session and stores it as a request extension.
///
/// Never rejects: handlers decide when a missing session is a 401, since
/// body validation has to answer first.
pub async fn session_middleware(
    State(verifier): State<JwtVerifier>,
    mut req: Request,
    next: Next,
) -> Response {
    let user = extract_bearer(req.headers().get(header::AUTHORIZATION))
        .and_then(|token| verifier.verify(&token));
    if let Some(user) = user {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The caller's session, if any.
pub struct CurrentUser(pub Option<SessionUser>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(parts.extensions.get::<SessionUser>().cloned()))
    }
}
