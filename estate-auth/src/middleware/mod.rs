pub mod admin;
pub mod auth;
pub mod cancel;

pub use admin::{admin_auth_middleware, ADMIN_KEY_HEADER};
pub use auth::{
    auth_middleware, bearer_token, fingerprint, verify_csrf, AuthContext, Carriage,
    CurrentPrincipal, CSRF_HEADER, FINGERPRINT_HEADER,
};
pub use cancel::{cancellation_middleware, RequestCancel};
