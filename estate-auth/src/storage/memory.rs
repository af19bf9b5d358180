use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{ContextSink, RowOperation, RowPolicy, RowScope};
use crate::models::SecurityContext;
use crate::services::AuthError;
use crate::store::StoreError;

/// A scoped business row. The payload is opaque to the auth core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedRow {
    pub id: Uuid,
    pub scope: RowScope,
    pub payload: serde_json::Value,
}

impl ScopedRow {
    pub fn new(scope: RowScope, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            payload,
        }
    }
}

/// In-memory scoped table, shared by every session checked out from it.
#[derive(Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<DashMap<Uuid, ScopedRow>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a row without policy checks. For fixtures and migrations only.
    pub fn seed(&self, row: ScopedRow) -> Uuid {
        let id = row.id;
        self.rows.insert(id, row);
        id
    }

    /// Check out a session. It starts with no context and denies everything.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            rows: self.rows.clone(),
            context: None,
        }
    }
}

pub struct MemorySession {
    rows: Arc<DashMap<Uuid, ScopedRow>>,
    context: Option<SecurityContext>,
}

impl MemorySession {
    pub fn context(&self) -> Option<&SecurityContext> {
        self.context.as_ref()
    }

    /// Read by id. Supplying the id of a row outside the scope is a
    /// violation, not a miss.
    pub fn get(&self, id: Uuid) -> Result<Option<ScopedRow>, AuthError> {
        let Some(row) = self.rows.get(&id).map(|r| r.clone()) else {
            return Ok(None);
        };
        RowPolicy::check(self.context.as_ref(), &row.scope, RowOperation::Read)?;
        Ok(Some(row))
    }

    /// Every visible row. Invisible rows are filtered, not reported.
    pub fn list(&self) -> Vec<ScopedRow> {
        let ctx = self.context.as_ref();
        let mut rows: Vec<ScopedRow> = self
            .rows
            .iter()
            .filter(|r| RowPolicy::allows(ctx, &r.scope))
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    pub fn insert(&self, row: ScopedRow) -> Result<Uuid, AuthError> {
        RowPolicy::check(self.context.as_ref(), &row.scope, RowOperation::Write)?;
        let id = row.id;
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Both the current and the new location must be writable.
    pub fn update(&self, id: Uuid, scope: RowScope, payload: serde_json::Value) -> Result<bool, AuthError> {
        let ctx = self.context.as_ref();
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Ok(false);
        };
        RowPolicy::check(ctx, &row.scope, RowOperation::Write)?;
        RowPolicy::check(ctx, &scope, RowOperation::Write)?;
        row.scope = scope;
        row.payload = payload;
        Ok(true)
    }
}

#[async_trait]
impl ContextSink for MemorySession {
    async fn set_context(&mut self, ctx: &SecurityContext) -> Result<(), StoreError> {
        self.context = Some(ctx.clone());
        Ok(())
    }

    async fn clear_context(&mut self) -> Result<(), StoreError> {
        self.context = None;
        Ok(())
    }

    fn discard_context(&mut self) {
        self.context = None;
    }
}
