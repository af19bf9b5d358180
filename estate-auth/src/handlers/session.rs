//! Login, refresh, logout and introspection.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::RngCore;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

use crate::config::{AuthConfig, SameSitePolicy};
use crate::dtos::auth::{
    IntrospectRequest, IntrospectResponse, LoginRequest, LoginResponse, LogoutRequest,
    PrincipalSummary, RefreshRequest, TokenResponse,
};
use crate::middleware::{fingerprint, verify_csrf, CurrentPrincipal, RequestCancel};
use crate::models::Platform;
use crate::services::{AuthError, LoginCommand, TokenBundle};
use crate::utils::{Password, ValidatedJson};
use crate::AppState;

const REFRESH_COOKIE_PATH: &str = "/auth";

fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: String,
    path: &'static str,
    http_only: bool,
    max_age: time::Duration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), value))
        .path(path)
        .http_only(http_only)
        .secure(config.cookie.secure)
        .same_site(same_site(config.cookie.same_site))
        .max_age(max_age);
    if let Some(domain) = &config.cookie.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

fn removal_cookie(config: &AuthConfig, name: &str, path: &'static str) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), String::new())).path(path);
    if let Some(domain) = &config.cookie.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

fn new_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Put the bundle into cookies for a browser session. Returns the jar and
/// the anti-forgery token the page must echo in `x-csrf-token`.
fn set_session_cookies(config: &AuthConfig, jar: CookieJar, tokens: &TokenBundle) -> (CookieJar, String) {
    let csrf = new_csrf_token();
    let access_age = time::Duration::minutes(config.jwt.access_token_minutes);
    let refresh_age = time::Duration::days(config.jwt.refresh_token_days);

    let jar = jar
        .add(build_cookie(
            config,
            &config.cookie.access_cookie,
            tokens.access.token.clone(),
            "/",
            true,
            access_age,
        ))
        .add(build_cookie(
            config,
            &config.cookie.refresh_cookie,
            tokens.refresh.token.clone(),
            REFRESH_COOKIE_PATH,
            true,
            refresh_age,
        ))
        .add(build_cookie(
            config,
            &config.cookie.csrf_cookie,
            csrf.clone(),
            "/",
            false,
            refresh_age,
        ));
    (jar, csrf)
}

fn clear_session_cookies(config: &AuthConfig, jar: CookieJar) -> CookieJar {
    jar.remove(removal_cookie(config, &config.cookie.access_cookie, "/"))
        .remove(removal_cookie(config, &config.cookie.refresh_cookie, REFRESH_COOKIE_PATH))
        .remove(removal_cookie(config, &config.cookie.csrf_cookie, "/"))
}

fn body_tokens(state: &AppState, tokens: TokenBundle) -> TokenResponse {
    TokenResponse {
        token_type: "Bearer",
        expires_in: state.tokens.access_lifetime_seconds(),
        access_token: Some(tokens.access.token),
        refresh_token: Some(tokens.refresh.token),
        offline_expires_at: tokens.offline.as_ref().map(|t| t.expires_at),
        offline_token: tokens.offline.map(|t| t.token),
        csrf_token: None,
    }
}

fn cookie_tokens(state: &AppState, csrf: String) -> TokenResponse {
    TokenResponse {
        token_type: "Bearer",
        expires_in: state.tokens.access_lifetime_seconds(),
        csrf_token: Some(csrf),
        ..TokenResponse::default()
    }
}

/// Parse an optional JSON body; an empty body yields the default.
fn optional_body<T>(body: &Bytes) -> Result<T, AppError>
where
    T: DeserializeOwned + Default + Validate,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: T = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidJson(e.to_string()))?;
    value.validate()?;
    Ok(value)
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let platform = req.platform;
    let outcome = state
        .auth
        .login(
            &cancel,
            LoginCommand {
                username: req.username,
                password: Password::new(req.password),
                platform,
                device: req.device,
                remember_device: req.remember_device,
            },
        )
        .await?;

    let principal = PrincipalSummary::from(&outcome.principal);
    let (jar, tokens) = match platform {
        Platform::Web => {
            let (jar, csrf) = set_session_cookies(&state.config, jar, &outcome.tokens);
            (jar, cookie_tokens(&state, csrf))
        }
        Platform::Mobile => (jar, body_tokens(&state, outcome.tokens)),
    };

    Ok((
        jar,
        Json(LoginResponse {
            principal,
            device: outcome.device,
            tokens,
        }),
    ))
}

/// POST /auth/refresh
///
/// Mobile clients send the refresh token in the body. Browsers rely on the
/// refresh cookie and must pass the CSRF check.
pub async fn refresh(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(CookieJar, Json<TokenResponse>), AppError> {
    let req: RefreshRequest = optional_body(&body)?;

    let (token, from_cookie) = match req.refresh_token {
        Some(token) => (token, false),
        None => {
            let token = jar
                .get(&state.config.cookie.refresh_cookie)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::InvalidRefreshToken)?;
            verify_csrf(&jar, &headers, &state.config.cookie)?;
            (token, true)
        }
    };

    let bundle = state
        .tokens
        .refresh(&cancel, &token, fingerprint(&headers))
        .await?;

    if from_cookie {
        let (jar, csrf) = set_session_cookies(&state.config, jar, &bundle);
        Ok((jar, Json(cookie_tokens(&state, csrf))))
    } else {
        Ok((jar, Json(body_tokens(&state, bundle))))
    }
}

/// POST /auth/logout
///
/// Revokes the presented access token and, when supplied, the refresh
/// token. Session cookies are cleared either way.
pub async fn logout(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    CurrentPrincipal(auth): CurrentPrincipal,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<serde_json::Value>), AppError> {
    let req: LogoutRequest = optional_body(&body)?;

    state.tokens.revoke(&cancel, auth.token()).await?;

    let refresh_token = req.refresh_token.or_else(|| {
        jar.get(&state.config.cookie.refresh_cookie)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    });
    if let Some(refresh_token) = refresh_token {
        match state.tokens.revoke(&cancel, &refresh_token).await {
            Ok(_) | Err(AuthError::TokenMalformed) => {}
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(principal_id = %auth.claims.sub, "Logged out");
    Ok((
        clear_session_cookies(&state.config, jar),
        Json(serde_json::json!({ "message": "Logged out successfully" })),
    ))
}

/// POST /auth/introspect
pub async fn introspect(
    State(state): State<AppState>,
    RequestCancel(cancel): RequestCancel,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<IntrospectRequest>,
) -> Json<IntrospectResponse> {
    let result = state
        .tokens
        .introspect(&cancel, &req.token, fingerprint(&headers))
        .await;
    Json(IntrospectResponse {
        active: result.active,
        claims: result.claims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let mut config = AuthConfig::for_tests();
        config.cookie.secure = true;
        config.cookie.domain = Some("estates.example".to_string());

        let cookie = build_cookie(
            &config,
            "estate_session",
            "token".to_string(),
            "/",
            true,
            time::Duration::minutes(15),
        );
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.domain(), Some("estates.example"));
        assert_eq!(cookie.max_age(), Some(time::Duration::minutes(15)));
    }

    #[test]
    fn test_csrf_tokens_are_random_hex() {
        let a = new_csrf_token();
        let b = new_csrf_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_optional_body() {
        let empty: RefreshRequest = optional_body(&Bytes::new()).unwrap();
        assert!(empty.refresh_token.is_none());

        let given: RefreshRequest =
            optional_body(&Bytes::from_static(br#"{"refresh_token":"abc"}"#)).unwrap();
        assert_eq!(given.refresh_token.as_deref(), Some("abc"));

        assert!(optional_body::<RefreshRequest>(&Bytes::from_static(b"{not json")).is_err());
        assert!(optional_body::<RefreshRequest>(&Bytes::from_static(br#"{"refresh_token":""}"#)).is_err());
    }
}
