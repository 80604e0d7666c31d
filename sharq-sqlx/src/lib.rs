//! SQLx-backed execution for sharq compiled commands.
//!
//! Compilation happens entirely in `sharq-core`; this crate binds the
//! resulting SQL and `@`-named parameters to a Postgres pool, including the
//! bulk-copy merge path and cooperative cancellation.

pub mod bulk;
pub mod cancel;
pub mod executor;
pub mod rewrite;

pub use bulk::bulk_merge;
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use executor::{ExecError, ExecResult, SqlExecutor, SqlTransaction};
pub use rewrite::rewrite_placeholders;
