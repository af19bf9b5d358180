//! Credential verification and login.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{AuthError, DeviceBindingService, RoleResolver, StoreCallPolicy, TokenBundle, TokenService};
use crate::models::{Device, DeviceRegistration, Platform, Principal};
use crate::store::PrincipalStore;
use crate::utils::{dummy_verify, verify_password, Password};

pub struct LoginCommand {
    pub username: String,
    pub password: Password,
    pub platform: Platform,
    pub device: Option<DeviceRegistration>,
    pub remember_device: bool,
}

pub struct LoginOutcome {
    pub principal: Principal,
    pub device: Option<Device>,
    pub tokens: TokenBundle,
}

pub struct AuthService {
    principals: Arc<dyn PrincipalStore>,
    devices: Arc<DeviceBindingService>,
    tokens: Arc<TokenService>,
    policy: StoreCallPolicy,
}

impl AuthService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        devices: Arc<DeviceBindingService>,
        tokens: Arc<TokenService>,
        policy: StoreCallPolicy,
    ) -> Self {
        Self {
            principals,
            devices,
            tokens,
            policy,
        }
    }

    /// Verify username and password, bind the device for mobile clients,
    /// and issue tokens.
    ///
    /// Unknown user, wrong password and deactivated principal are
    /// indistinguishable to the caller.
    pub async fn login(&self, cancel: &CancellationToken, command: LoginCommand) -> Result<LoginOutcome, AuthError> {
        let username = command.username.trim().to_lowercase();
        let found = self
            .policy
            .run(cancel, "principals.find_by_username", || {
                self.principals.find_by_username(&username)
            })
            .await?;

        let password = command.password.clone();
        let principal = tokio::task::spawn_blocking(move || match found {
            Some(principal) if verify_password(&password, &principal.password_hash) => Some(principal),
            Some(_) => None,
            None => {
                dummy_verify(&password);
                None
            }
        })
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("password verification task failed: {}", e)))?;

        let Some(principal) = principal.filter(|p| p.is_active) else {
            tracing::info!(username = %username, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if !RoleResolver::has_platform_access(principal.role, command.platform) {
            return Err(AuthError::InsufficientPermission(format!(
                "{} has no {} access",
                principal.role,
                command.platform.as_str()
            )));
        }

        let device = match (command.platform, command.device.as_ref()) {
            (Platform::Mobile, None) => return Err(AuthError::DeviceRequired),
            (Platform::Mobile, Some(registration)) => Some(
                self.devices
                    .bind(cancel, principal.principal_id, registration)
                    .await?,
            ),
            (Platform::Web, _) => None,
        };

        let tokens = self
            .tokens
            .issue(
                cancel,
                &principal,
                device.as_ref().map(|d| d.device_id),
                command.platform,
                command.remember_device,
            )
            .await?;

        tracing::info!(
            principal_id = %principal.principal_id,
            role = %principal.role,
            platform = command.platform.as_str(),
            "Login succeeded"
        );
        Ok(LoginOutcome {
            principal,
            device,
            tokens,
        })
    }
}
