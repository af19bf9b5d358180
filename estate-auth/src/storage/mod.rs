//! Storage-layer side of the security context contract.
//!
//! A storage session is checked out per request. The context is installed
//! on that session, consulted by every row access, and removed before the
//! session is released. [`ContextScope`] guarantees removal on every exit
//! path: explicit finish, early return, error, panic or cancellation.

mod memory;
mod policy;
mod postgres;

pub use memory::{MemoryRowStore, MemorySession, ScopedRow};
pub use policy::{RowOperation, RowPolicy, RowScope};
pub use postgres::PgSession;

use async_trait::async_trait;

use crate::models::SecurityContext;
use crate::store::StoreError;

#[async_trait]
pub trait ContextSink: Send {
    async fn set_context(&mut self, ctx: &SecurityContext) -> Result<(), StoreError>;

    async fn clear_context(&mut self) -> Result<(), StoreError>;

    /// Synchronous last resort used from `Drop`. After this call the session
    /// must deny every row access and must not be reused with its context.
    fn discard_context(&mut self);
}

/// Guard owning the installed context of one checked-out session.
pub struct ContextScope<'a, S: ContextSink> {
    session: &'a mut S,
    active: bool,
}

impl<'a, S: ContextSink> ContextScope<'a, S> {
    pub async fn install(session: &'a mut S, ctx: &SecurityContext) -> Result<Self, StoreError> {
        // Armed before the call so a failed or cancelled install still
        // discards whatever was partially applied.
        let scope = Self {
            session,
            active: true,
        };
        scope.session.set_context(ctx).await?;
        Ok(scope)
    }

    pub fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    /// Clear the context. On failure the guard still discards on drop.
    pub async fn finish(mut self) -> Result<(), StoreError> {
        self.session.clear_context().await?;
        self.active = false;
        Ok(())
    }
}

impl<S: ContextSink> Drop for ContextScope<'_, S> {
    fn drop(&mut self) {
        if self.active {
            tracing::debug!("Security context discarded without explicit clear");
            self.session.discard_context();
        }
    }
}
