pub mod assignment;
pub mod context;
pub mod credential;
pub mod device;
pub mod principal;
pub mod role;

pub use assignment::{Assignment, DivisionRef, EstateRef, ScopeLevel};
pub use context::{Scope, ScopeIds, SecurityContext};
pub use credential::{CredentialRecord, Platform, TokenType, hash_token};
pub use device::{Device, DeviceInfo, DeviceRegistration, TrustLevel};
pub use principal::Principal;
pub use role::{Role, RoleDefinition, WILDCARD_PERMISSION};
