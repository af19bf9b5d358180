use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::config::JwtConfig;
use crate::models::{Platform, Principal, Role, Scope, TokenType};

/// Claims carried by every token class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: Uuid,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    pub platform: Platform,
    pub typ: TokenType,
    /// Snapshot taken at issuance. Refresh tokens carry none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or_else(Utc::now)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// HS256 signing and verification with one key per token class.
pub struct JwtService {
    access: KeyPair,
    refresh: KeyPair,
    offline: KeyPair,
    issuer: String,
    audience: String,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    offline_lifetime: Duration,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        tracing::info!(issuer = %config.issuer, "JWT service initialized with per-type HS256 keys");

        Self {
            access: KeyPair::from_secret(config.access_secret.expose_secret()),
            refresh: KeyPair::from_secret(config.refresh_secret.expose_secret()),
            offline: KeyPair::from_secret(config.offline_secret.expose_secret()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_lifetime: Duration::minutes(config.access_token_minutes),
            refresh_lifetime: Duration::days(config.refresh_token_days),
            offline_lifetime: Duration::days(config.offline_token_days),
        }
    }

    fn keys(&self, typ: TokenType) -> &KeyPair {
        match typ {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
            TokenType::Offline => &self.offline,
        }
    }

    pub fn lifetime(&self, typ: TokenType) -> Duration {
        match typ {
            TokenType::Access => self.access_lifetime,
            TokenType::Refresh => self.refresh_lifetime,
            TokenType::Offline => self.offline_lifetime,
        }
    }

    /// Fresh claims for `principal`, without permission or scope snapshots.
    pub fn new_claims(
        &self,
        typ: TokenType,
        principal: &Principal,
        device_id: Option<Uuid>,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Claims {
        Claims {
            sub: principal.principal_id,
            role: principal.role,
            tenant_id: principal.tenant_id,
            device_id,
            platform,
            typ,
            permissions: Vec::new(),
            scope: None,
            iat: now.timestamp(),
            exp: (now + self.lifetime(typ)).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        }
    }

    /// Sign with the key belonging to `claims.typ`.
    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys(claims.typ).encoding,
        )
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode {} token: {}", claims.typ, e)))
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        if validate_exp {
            validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        } else {
            validation.set_required_spec_claims(&["iss", "aud", "sub"]);
        }
        validation
    }

    /// Verify signature, structure, issuer, audience and expiry for one
    /// expected token class.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        self.decode_with(token, expected, true)
    }

    /// Like [`decode`](Self::decode) but for any token class, with expiry
    /// ignored. Used by revocation, which must accept expired tokens.
    pub fn decode_any_ignoring_expiry(&self, token: &str) -> Result<Claims, AuthError> {
        for typ in TokenType::ALL {
            match self.decode_with(token, typ, false) {
                Ok(claims) => return Ok(claims),
                Err(AuthError::TokenMalformed) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(AuthError::TokenMalformed)
    }

    fn decode_with(
        &self,
        token: &str,
        expected: TokenType,
        validate_exp: bool,
    ) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &self.keys(expected).decoding,
            &self.validation(validate_exp),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenMalformed,
        })?;

        // A valid signature with the wrong `typ` means a key was shared or
        // the claims were minted incorrectly. Reject either way.
        if data.claims.typ != expected {
            return Err(AuthError::TokenMalformed);
        }

        Ok(data.claims)
    }
}
