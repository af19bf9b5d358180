//! Authentication core: tokens, devices, session cache, scope resolution
//! and role rules.

mod auth;
mod context;
mod device;
pub mod error;
mod jwt;
mod roles;
pub mod security_audit;
pub mod session_cache;
mod store_call;
mod token;

pub use auth::{AuthService, LoginCommand, LoginOutcome};
pub use context::SecurityContextPropagator;
pub use device::{validate_fingerprint, DeviceBindingService};
pub use error::AuthError;
pub use jwt::{Claims, JwtService};
pub use roles::{AccessCheck, RoleResolver};
pub use session_cache::{CacheStats, CachedCredential, SessionCache};
pub use store_call::StoreCallPolicy;
pub use token::{Introspection, IssuedToken, TokenBundle, TokenService};
