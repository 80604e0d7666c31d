//! Compiled-command execution over SQLx Postgres pools.

use sharq_core::ast::Scalar;
use sharq_core::sharding::MultipleCommand;
use sharq_core::CompiledSql;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::rewrite::rewrite_placeholders;

/// Error type for execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Compilation failure surfaced before any I/O.
    #[error(transparent)]
    Core(#[from] sharq_core::Error),
    /// Driver failure, rethrown after cleanup.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// The cancel token fired before or between I/O operations.
    #[error("operation cancelled")]
    Cancelled,
    /// Runtime construction failed in the blocking form.
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Executes compiled commands against one pool. Not for concurrent use from
/// multiple tasks; clone the pool and build one executor per task instead.
pub struct SqlExecutor {
    pool: PgPool,
    cancel: Option<CancelToken>,
}

impl SqlExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, cancel: None }
    }

    /// Attach a cooperative cancel token, observed at I/O boundaries only.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn check_cancelled(&self) -> ExecResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ExecError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn guard<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> ExecResult<T> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(ExecError::Cancelled),
                result = fut => Ok(result?),
            },
            None => Ok(fut.await?),
        }
    }

    /// Fetch all rows of a compiled query as `T`.
    pub async fn fetch_all<T>(&self, command: &CompiledSql) -> ExecResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        self.check_cancelled()?;
        let (sql, values) = rewrite_placeholders(&command.sql, &command.params);
        debug!(sql = %sql, params = values.len(), "fetch");
        let mut query = sqlx::query_as::<_, T>(&sql);
        for value in &values {
            query = bind_scalar_as(query, value);
        }
        self.guard(query.fetch_all(&self.pool)).await
    }

    /// Fetch exactly one row; `sqlx::Error::RowNotFound` when there is none.
    pub async fn fetch_one<T>(&self, command: &CompiledSql) -> ExecResult<T>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = self.fetch_all(command).await?;
        rows.into_iter()
            .next()
            .ok_or(ExecError::Sqlx(sqlx::Error::RowNotFound))
    }

    pub async fn fetch_optional<T>(&self, command: &CompiledSql) -> ExecResult<Option<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = self.fetch_all(command).await?;
        Ok(rows.into_iter().next())
    }

    /// Execute one mutating command; returns affected rows.
    pub async fn execute(&self, command: &CompiledSql) -> ExecResult<u64> {
        self.check_cancelled()?;
        let (sql, values) = rewrite_placeholders(&command.sql, &command.params);
        debug!(sql = %sql, params = values.len(), "execute");
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_scalar(query, value);
        }
        let result = self.guard(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    /// Execute a shard fan-out in list order, summing affected rows.
    /// Atomicity across elements is the caller's transaction.
    pub async fn execute_many(&self, commands: &MultipleCommand) -> ExecResult<u64> {
        let mut affected = 0;
        for command in commands.iter() {
            affected += self.execute(command).await?;
        }
        Ok(affected)
    }

    /// Open an explicit transaction scope.
    pub async fn begin(&self) -> ExecResult<SqlTransaction> {
        self.check_cancelled()?;
        let tx = self.pool.begin().await?;
        debug!("transaction begin");
        Ok(SqlTransaction { tx })
    }

    /// Blocking form of [`execute`](Self::execute): drives the async path on
    /// the ambient Tokio runtime, or a private one outside any runtime.
    pub fn execute_blocking(&self, command: &CompiledSql) -> ExecResult<u64> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle)
                if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread =>
            {
                tokio::task::block_in_place(|| handle.block_on(self.execute(command)))
            }
            Ok(_) => {
                // block_in_place is unavailable on a current-thread runtime;
                // drive a private runtime on a scoped thread instead.
                std::thread::scope(|scope| {
                    let worker = scope.spawn(|| {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()?;
                        runtime.block_on(self.execute(command))
                    });
                    match worker.join() {
                        Ok(result) => result,
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                })
            }
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.execute(command))
            }
        }
    }
}

/// An explicit transaction scope. Commands execute on the transaction's
/// connection; dropping without `commit` rolls back.
pub struct SqlTransaction {
    tx: Transaction<'static, Postgres>,
}

impl SqlTransaction {
    pub async fn execute(&mut self, command: &CompiledSql) -> ExecResult<u64> {
        let (sql, values) = rewrite_placeholders(&command.sql, &command.params);
        debug!(sql = %sql, params = values.len(), "tx execute");
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_scalar(query, value);
        }
        let result = query.execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    pub async fn execute_many(&mut self, commands: &MultipleCommand) -> ExecResult<u64> {
        let mut affected = 0;
        for command in commands.iter() {
            affected += self.execute(command).await?;
        }
        Ok(affected)
    }

    pub async fn commit(self) -> ExecResult<()> {
        self.tx.commit().await?;
        debug!("transaction commit");
        Ok(())
    }

    pub async fn rollback(self) -> ExecResult<()> {
        self.tx.rollback().await?;
        debug!("transaction rollback");
        Ok(())
    }
}

pub(crate) fn bind_scalar<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &Scalar,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Scalar::Null => query.bind(None::<String>),
        Scalar::Bool(b) => query.bind(*b),
        Scalar::Int(i) => query.bind(*i),
        Scalar::Float(f) => query.bind(*f),
        Scalar::Decimal(d) => query.bind(*d),
        Scalar::Str(s) => query.bind(s.clone()),
        Scalar::Date(d) => query.bind(*d),
        Scalar::DateTime(ts) => query.bind(*ts),
        Scalar::Uuid(u) => query.bind(*u),
    }
}

fn bind_scalar_as<'q, T>(
    query: sqlx::query::QueryAs<'q, Postgres, T, PgArguments>,
    value: &Scalar,
) -> sqlx::query::QueryAs<'q, Postgres, T, PgArguments>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    match value {
        Scalar::Null => query.bind(None::<String>),
        Scalar::Bool(b) => query.bind(*b),
        Scalar::Int(i) => query.bind(*i),
        Scalar::Float(f) => query.bind(*f),
        Scalar::Decimal(d) => query.bind(*d),
        Scalar::Str(s) => query.bind(s.clone()),
        Scalar::Date(d) => query.bind(*d),
        Scalar::DateTime(ts) => query.bind(*ts),
        Scalar::Uuid(u) => query.bind(*u),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_pool() -> PgPool {
        // Lazy pool: no connection is attempted until a command runs, and the
        // first attempt fails fast against a closed port.
        PgPool::connect_lazy("postgres://sharq@127.0.0.1:1/sharq").unwrap()
    }

    // The blocking form must not panic when the ambient runtime is
    // single-threaded; it falls back to a scoped worker thread and surfaces
    // the driver error normally.
    #[tokio::test]
    async fn blocking_form_survives_current_thread_runtime() {
        let executor = SqlExecutor::new(unreachable_pool());
        let command = CompiledSql::new("SELECT 1", Vec::new());
        let result = executor.execute_blocking(&command);
        assert!(matches!(result, Err(ExecError::Sqlx(_))));
    }

    #[test]
    fn blocking_form_runs_outside_any_runtime() {
        let executor = SqlExecutor::new(unreachable_pool());
        let command = CompiledSql::new("SELECT 1", Vec::new());
        let result = executor.execute_blocking(&command);
        assert!(matches!(result, Err(ExecError::Sqlx(_))));
    }
}
