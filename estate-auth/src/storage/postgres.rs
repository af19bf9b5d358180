use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;

use super::{ContextSink, RowOperation, RowScope};
use crate::models::SecurityContext;
use crate::services::AuthError;
use crate::store::StoreError;

/// One request's checked-out connection, wrapped in a transaction.
///
/// The context is applied with transaction-local `set_config`, so rolling
/// back or dropping the transaction removes it. A session whose context
/// was discarded is poisoned: every further call fails and the dropped
/// transaction rolls back.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    poisoned: bool,
}

impl PgSession {
    pub async fn begin(pool: &PgPool) -> Result<Self, StoreError> {
        Ok(Self {
            tx: pool.begin().await?,
            poisoned: false,
        })
    }

    /// The underlying transaction, for queries against row-secured tables.
    pub fn transaction(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        if self.poisoned {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "storage session used after its security context was discarded"
            )));
        }
        Ok(&mut self.tx)
    }

    /// Ask the database's own row predicate whether `row` is visible under
    /// the installed context.
    pub async fn check_row(&mut self, row: &RowScope, op: RowOperation) -> Result<(), AuthError> {
        let visible: bool = sqlx::query_scalar("SELECT app_row_visible($1, $2, $3)")
            .bind(row.tenant_id)
            .bind(row.estate_id)
            .bind(row.division_id)
            .fetch_one(&mut **self.transaction()?)
            .await
            .map_err(StoreError::from)?;

        if visible {
            Ok(())
        } else {
            Err(AuthError::ScopeViolation(format!(
                "{} denied for row scope {:?}",
                op.as_str(),
                row
            )))
        }
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "refusing to commit a session with a discarded security context"
            )));
        }
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ContextSink for PgSession {
    async fn set_context(&mut self, ctx: &SecurityContext) -> Result<(), StoreError> {
        let (tenant_ids, estate_ids, division_ids) = ctx.scope.id_lists();
        sqlx::query("SELECT app_set_user_context($1, $2, $3, $4, $5, $6)")
            .bind(ctx.principal_id)
            .bind(ctx.role.as_str())
            .bind(ctx.scope.is_all())
            .bind(tenant_ids)
            .bind(estate_ids)
            .bind(division_ids)
            .execute(&mut **self.transaction()?)
            .await?;
        Ok(())
    }

    async fn clear_context(&mut self) -> Result<(), StoreError> {
        sqlx::query("SELECT app_clear_user_context()")
            .execute(&mut **self.transaction()?)
            .await?;
        Ok(())
    }

    fn discard_context(&mut self) {
        self.poisoned = true;
    }
}
