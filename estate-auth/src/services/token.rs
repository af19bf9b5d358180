//! Token lifecycle: issue, validate, refresh, revoke.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::security_audit::{SecurityAuditLog, SecurityEventType, Severity};
use super::session_cache::{CachedCredential, SessionCache};
use super::{
    AuthError, Claims, DeviceBindingService, JwtService, RoleResolver, SecurityContextPropagator,
    StoreCallPolicy,
};
use crate::models::{hash_token, CredentialRecord, Platform, Principal, Scope, TokenType};
use crate::store::{CredentialStore, PrincipalStore};

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenBundle {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<IssuedToken>,
    pub device_id: Option<Uuid>,
}

/// Result of introspection. Any failure reads as inactive.
#[derive(Debug, Clone, Serialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

pub struct TokenService {
    jwt: Arc<JwtService>,
    credentials: Arc<dyn CredentialStore>,
    principals: Arc<dyn PrincipalStore>,
    cache: Arc<SessionCache>,
    devices: Arc<DeviceBindingService>,
    propagator: Arc<SecurityContextPropagator>,
    policy: StoreCallPolicy,
}

impl TokenService {
    pub fn new(
        jwt: Arc<JwtService>,
        credentials: Arc<dyn CredentialStore>,
        principals: Arc<dyn PrincipalStore>,
        cache: Arc<SessionCache>,
        devices: Arc<DeviceBindingService>,
        propagator: Arc<SecurityContextPropagator>,
        policy: StoreCallPolicy,
    ) -> Self {
        Self {
            jwt,
            credentials,
            principals,
            cache,
            devices,
            propagator,
            policy,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn access_lifetime_seconds(&self) -> i64 {
        self.jwt.lifetime(TokenType::Access).num_seconds()
    }

    /// Mint access and refresh tokens, plus an offline token for a mobile
    /// device that asked to be remembered.
    pub async fn issue(
        &self,
        cancel: &CancellationToken,
        principal: &Principal,
        device_id: Option<Uuid>,
        platform: Platform,
        remember_device: bool,
    ) -> Result<TokenBundle, AuthError> {
        if platform == Platform::Mobile && device_id.is_none() {
            return Err(AuthError::DeviceRequired);
        }

        let with_offline = platform == Platform::Mobile && remember_device;
        let scope = self
            .propagator
            .resolve_scope(cancel, principal.principal_id, principal.role)
            .await?;
        let (bundle, records) = self.mint(principal, device_id, platform, scope, with_offline)?;

        self.policy
            .run_once(cancel, "credentials.insert_bundle", || {
                self.credentials.insert_bundle(&records)
            })
            .await?;
        self.prime_cache(&records);

        tracing::info!(
            principal_id = %principal.principal_id,
            platform = platform.as_str(),
            offline = bundle.offline.is_some(),
            "Issued token bundle"
        );
        Ok(bundle)
    }

    fn mint(
        &self,
        principal: &Principal,
        device_id: Option<Uuid>,
        platform: Platform,
        scope: Scope,
        with_offline: bool,
    ) -> Result<(TokenBundle, Vec<CredentialRecord>), AuthError> {
        let now = Utc::now();
        let permissions = RoleResolver::permissions(principal.role);
        let mut records = Vec::with_capacity(3);

        let mut mint_one = |typ: TokenType, snapshot: bool| -> Result<IssuedToken, AuthError> {
            let mut claims = self.jwt.new_claims(typ, principal, device_id, platform, now);
            if snapshot {
                claims.permissions = permissions.clone();
                claims.scope = Some(scope.clone());
            }
            let token = self.jwt.encode(&claims)?;
            let expires_at = claims.expires_at();
            records.push(CredentialRecord::new(
                claims.jti,
                principal.principal_id,
                device_id,
                typ,
                &token,
                now,
                expires_at,
            ));
            Ok(IssuedToken {
                token,
                jti: claims.jti,
                expires_at,
            })
        };

        let access = mint_one(TokenType::Access, true)?;
        let refresh = mint_one(TokenType::Refresh, false)?;
        let offline = if with_offline && device_id.is_some() {
            Some(mint_one(TokenType::Offline, true)?)
        } else {
            None
        };

        Ok((
            TokenBundle {
                access,
                refresh,
                offline,
                device_id,
            },
            records,
        ))
    }

    fn prime_cache(&self, records: &[CredentialRecord]) {
        for record in records.iter().filter(|r| r.token_type != TokenType::Refresh) {
            self.cache
                .put_if_absent(&record.token_hash, CachedCredential::from(record));
        }
    }

    /// Validate an access token.
    pub async fn validate(
        &self,
        cancel: &CancellationToken,
        token: &str,
        fingerprint: Option<&str>,
    ) -> Result<Claims, AuthError> {
        self.validate_typed(cancel, token, TokenType::Access, fingerprint)
            .await
    }

    /// Validate an offline token. Same checks as access tokens.
    pub async fn validate_offline(
        &self,
        cancel: &CancellationToken,
        token: &str,
        fingerprint: Option<&str>,
    ) -> Result<Claims, AuthError> {
        self.validate_typed(cancel, token, TokenType::Offline, fingerprint)
            .await
    }

    // Signature and structure, then expiry (both in decode), then
    // revocation, then device binding.
    async fn validate_typed(
        &self,
        cancel: &CancellationToken,
        token: &str,
        expected: TokenType,
        fingerprint: Option<&str>,
    ) -> Result<Claims, AuthError> {
        let claims = self.jwt.decode(token, expected)?;
        let token_hash = hash_token(token);

        let state = match self.cache.get(&token_hash) {
            Some(state) => state,
            None => {
                let record = self
                    .policy
                    .run(cancel, "credentials.find", || self.credentials.find(claims.jti))
                    .await?
                    .ok_or(AuthError::TokenRevoked)?;

                if record.token_hash != token_hash
                    || record.principal_id != claims.sub
                    || record.token_type != expected
                {
                    return Err(AuthError::TokenMalformed);
                }

                let state = CachedCredential::from(&record);
                self.cache.put_if_absent(&token_hash, state.clone());
                state
            }
        };

        if state.jti != claims.jti {
            return Err(AuthError::TokenMalformed);
        }

        if state.revoked {
            SecurityAuditLog::revoked_token_usage(claims.sub, claims.jti).emit();
            return Err(AuthError::TokenRevoked);
        }

        if let Some(device_id) = claims.device_id {
            self.devices
                .verify(cancel, claims.sub, device_id, fingerprint)
                .await?;
        }

        Ok(claims)
    }

    /// Exchange a refresh token for a new access and refresh pair.
    ///
    /// The presented token is consumed atomically with storing the new
    /// pair. A second use, concurrent or later, fails with `RefreshReplay`.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
        refresh_token: &str,
        fingerprint: Option<&str>,
    ) -> Result<TokenBundle, AuthError> {
        let claims = self
            .jwt
            .decode(refresh_token, TokenType::Refresh)
            .map_err(|e| match e {
                AuthError::TokenExpired | AuthError::TokenMalformed => AuthError::InvalidRefreshToken,
                other => other,
            })?;
        let token_hash = hash_token(refresh_token);

        let record = self
            .policy
            .run(cancel, "credentials.find", || self.credentials.find(claims.jti))
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if record.token_hash != token_hash || record.token_type != TokenType::Refresh {
            return Err(AuthError::InvalidRefreshToken);
        }
        if record.is_consumed() {
            SecurityAuditLog::refresh_replay(claims.sub, claims.jti).emit();
            return Err(AuthError::RefreshReplay);
        }
        if record.is_revoked() || record.is_expired() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let principal = self
            .policy
            .run(cancel, "principals.find", || self.principals.find(claims.sub))
            .await?
            .filter(|p| p.is_active)
            .ok_or(AuthError::InvalidRefreshToken)?;

        if let Some(device_id) = claims.device_id {
            self.devices
                .verify(cancel, claims.sub, device_id, fingerprint)
                .await?;
        }

        let scope = self
            .propagator
            .resolve_scope(cancel, principal.principal_id, principal.role)
            .await?;
        let (bundle, records) =
            self.mint(&principal, claims.device_id, claims.platform, scope, false)?;

        let rotated = self
            .policy
            .run_once(cancel, "credentials.rotate_refresh", || {
                self.credentials.rotate_refresh(claims.jti, &records)
            })
            .await?;

        if !rotated {
            SecurityAuditLog::refresh_replay(claims.sub, claims.jti).emit();
            return Err(AuthError::RefreshReplay);
        }

        let mut consumed = CachedCredential::from(&record);
        consumed.revoked = true;
        self.cache.put(&token_hash, consumed);
        self.prime_cache(&records);

        tracing::info!(principal_id = %principal.principal_id, "Refresh token rotated");
        Ok(bundle)
    }

    /// Revoke a single token of any class, expired or not. Returns whether
    /// the token was live before the call.
    pub async fn revoke(&self, cancel: &CancellationToken, token: &str) -> Result<bool, AuthError> {
        let claims = self.jwt.decode_any_ignoring_expiry(token)?;
        let token_hash = hash_token(token);

        let revoked = self
            .policy
            .run(cancel, "credentials.revoke", || self.credentials.revoke(claims.jti))
            .await?;

        match revoked {
            Some(record) => {
                self.cache.mark_revoked([&record]);
                tracing::info!(principal_id = %claims.sub, jti = %claims.jti, typ = %claims.typ, "Token revoked");
                Ok(true)
            }
            None => {
                self.cache.invalidate(&token_hash);
                Ok(false)
            }
        }
    }

    /// Revoke every live credential of a principal.
    pub async fn revoke_all(&self, cancel: &CancellationToken, principal_id: Uuid) -> Result<usize, AuthError> {
        let revoked = self
            .policy
            .run(cancel, "credentials.revoke_all", || {
                self.credentials.revoke_all_for_principal(principal_id)
            })
            .await?;

        // Evict first so the revocation markers below are not swept away.
        self.cache.invalidate_all_for_principal(principal_id);
        self.cache.mark_revoked(&revoked);

        SecurityAuditLog::new(
            SecurityEventType::AdminAction,
            Severity::Info,
            Some(principal_id),
            format!("revoked {} credentials", revoked.len()),
        )
        .emit();
        Ok(revoked.len())
    }

    /// Revoke every live credential bound to one device.
    pub async fn revoke_device(
        &self,
        cancel: &CancellationToken,
        principal_id: Uuid,
        device_id: Uuid,
    ) -> Result<usize, AuthError> {
        let revoked = self
            .policy
            .run(cancel, "credentials.revoke_for_device", || {
                self.credentials.revoke_for_device(principal_id, device_id)
            })
            .await?;
        self.cache.mark_revoked(&revoked);

        tracing::info!(
            principal_id = %principal_id,
            device_id = %device_id,
            revoked = revoked.len(),
            "Device credentials revoked"
        );
        Ok(revoked.len())
    }

    /// Report whether an access or offline token is currently usable.
    pub async fn introspect(
        &self,
        cancel: &CancellationToken,
        token: &str,
        fingerprint: Option<&str>,
    ) -> Introspection {
        for typ in [TokenType::Access, TokenType::Offline] {
            match self.validate_typed(cancel, token, typ, fingerprint).await {
                Ok(claims) => {
                    return Introspection {
                        active: true,
                        claims: Some(claims),
                    }
                }
                Err(AuthError::TokenMalformed) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Introspected token inactive");
                    break;
                }
            }
        }
        Introspection {
            active: false,
            claims: None,
        }
    }

    /// Pre-populate the cache with the most recently issued live credentials.
    pub async fn warm_up(&self, cancel: &CancellationToken, limit: usize) -> Result<usize, AuthError> {
        if limit == 0 {
            return Ok(0);
        }
        let records = self
            .policy
            .run(cancel, "credentials.recent_active", || {
                self.credentials.recent_active(limit)
            })
            .await?;
        let loaded = self.cache.warm_up(&records);
        tracing::info!(loaded, "Session cache warmed up");
        Ok(loaded)
    }
}
