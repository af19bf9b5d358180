pub mod password;
pub mod validation;

pub use password::{dummy_verify, hash_password, verify_password, Password};
pub use validation::ValidatedJson;
