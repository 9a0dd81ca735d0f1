use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EditorUser, ErrorResponse};
use crate::services::auth_service::{get_auth_token, validate_jwt};

const SUPER_ADMIN_ACCOUNT_TYPE: &str = "super_admin";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token supplied")]
    MissingToken,
    #[error("no JWT secret configured")]
    NotConfigured,
    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token does not contain '{0}' claim")]
    MissingClaim(&'static str),
}

/// The authenticated principal behind one connection or REST call.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub display_name: String,
    pub account_type: Option<String>,
    pub office_id: Option<String>,
}

impl SessionUser {
    pub fn is_super_admin(&self) -> bool {
        self.account_type.as_deref() == Some(SUPER_ADMIN_ACCOUNT_TYPE)
    }

    pub fn editor(&self) -> EditorUser {
        EditorUser {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    /// Build the principal from login-service claims.
    ///
    /// `accountId` wins over `id`, `displayName` over `username`. Ids may be numbers.
    pub fn from_claims(claims: &Value) -> Result<Self, AuthError> {
        let id = claim_string(claims, "accountId")
            .or_else(|| claim_string(claims, "id"))
            .ok_or(AuthError::MissingClaim("accountId"))?;
        let display_name = claim_string(claims, "displayName")
            .or_else(|| claim_string(claims, "username"))
            .unwrap_or_else(|| id.clone());
        Ok(Self {
            id,
            display_name,
            account_type: claim_string(claims, "accountType"),
            office_id: claim_string(claims, "officeId"),
        })
    }
}

fn claim_string(claims: &Value, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validates an opaque bearer token presented at connect time.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<SessionUser, AuthError>;
}

/// HS256 validator for tokens issued by the login service.
pub struct JwtValidator {
    secret: Option<String>,
}

impl JwtValidator {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<SessionUser, AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured)?;
        let token_data = validate_jwt(token, secret)?;
        SessionUser::from_claims(&token_data.claims)
    }
}

/// Resolve the principal behind a request from its header, cookie or `token` query parameter.
pub fn authenticate(
    validator: &dyn TokenValidator,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<SessionUser, AuthError> {
    let token = get_auth_token(headers, query).map_err(|_| AuthError::MissingToken)?;
    validator.validate(&token)
}

pub fn ensure_super_admin(user: &SessionUser) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if user.is_super_admin() {
        return Ok(());
    }
    Err(ErrorResponse::reply(StatusCode::FORBIDDEN, "Super admin access required"))
}

/// Whether `user` may subscribe to the change feed of `account_id`.
pub fn may_watch_account(user: &SessionUser, account_id: &str) -> bool {
    user.is_super_admin() || user.id == account_id
}
