//! HTTP handlers.

pub mod admin;
pub mod context;
pub mod session;
