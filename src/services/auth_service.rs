use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};

/// Get the auth token from request headers, falling back to the `token` query parameter.
///
/// Browsers cannot attach headers to a websocket upgrade, so the query form is
/// what the page client uses.
pub fn get_auth_token(headers: &HeaderMap, query: Option<&str>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = headers.get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
    }

    // 3. Try the query string
    if let Some(query) = query {
        let token = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "token" && !value.is_empty());
        if let Some((_, value)) = token {
            return Ok(value.into_owned());
        }
    }

    Err("Missing Authorization header, auth_token cookie or token parameter".to_string())
}

// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}
