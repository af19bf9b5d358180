pub mod logging;

pub use logging::{SECURITY_AUDIT_TARGET, init_tracing};
