//! Bulk-copy-then-merge execution.
//!
//! Runs a [`BulkMergePlan`] on one pooled connection: create the temp table,
//! stream rows through `COPY ... FROM STDIN` in text format, merge with one
//! set-based UPDATE, then drop the temp table. The drop always runs, even
//! when the load or merge fails, and the original error is rethrown.

use sharq_core::ast::Scalar;
use sharq_core::bulk::BulkMergePlan;
use sqlx::{Connection, PgPool};
use tracing::debug;

use crate::executor::{ExecError, ExecResult};

/// Execute the whole plan; returns rows affected by the merge UPDATE.
pub async fn bulk_merge(pool: &PgPool, plan: &BulkMergePlan) -> ExecResult<u64> {
    let mut conn = pool.acquire().await.map_err(ExecError::Sqlx)?;
    sqlx::query(&plan.create_temp).execute(&mut *conn).await?;
    debug!(temp = %plan.temp_table, rows = plan.rows.len(), "bulk load start");

    let merged = load_and_merge(&mut conn, plan).await;

    // Temp cleanup runs regardless of the merge outcome; the merge error
    // takes precedence over a cleanup error.
    let dropped = sqlx::query(&plan.drop_temp).execute(&mut *conn).await;
    let affected = merged?;
    dropped?;
    debug!(temp = %plan.temp_table, affected, "bulk merge done");
    Ok(affected)
}

async fn load_and_merge(
    conn: &mut sqlx::PgConnection,
    plan: &BulkMergePlan,
) -> ExecResult<u64> {
    let copy_stmt = format!(
        "COPY {} ({}) FROM STDIN",
        plan.temp_table,
        plan.copy_columns.join(", ")
    );
    let mut sink = conn.copy_in_raw(&copy_stmt).await?;
    let payload = encode_copy_rows(&plan.rows);
    if let Err(err) = sink.send(payload.into_bytes()).await.map(|_| ()) {
        let _ = sink.abort("load failed").await;
        return Err(err.into());
    }
    sink.finish().await?;

    // The connection may have been left in a failed state by the copy; ping
    // before the merge so the error surfaces here, not inside the UPDATE.
    conn.ping().await?;
    let result = sqlx::query(&plan.update).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Encode rows in Postgres `COPY` text format: tab-separated fields,
/// newline-terminated records, `\N` for NULL.
pub fn encode_copy_rows(rows: &[Vec<Scalar>]) -> String {
    let mut out = String::new();
    for row in rows {
        let fields: Vec<String> = row.iter().map(encode_field).collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

fn encode_field(value: &Scalar) -> String {
    match value {
        Scalar::Null => "\\N".to_string(),
        Scalar::Bool(true) => "t".to_string(),
        Scalar::Bool(false) => "f".to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Decimal(d) => d.to_string(),
        Scalar::Str(s) => escape_text(s),
        Scalar::Date(d) => d.to_string(),
        Scalar::DateTime(ts) => ts.to_string(),
        Scalar::Uuid(u) => u.to_string(),
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encodes_nulls_and_escapes() {
        let rows = vec![
            vec![Scalar::Int(1), Scalar::Str("a\tb".into()), Scalar::Null],
            vec![Scalar::Int(2), Scalar::Str("line\nbreak".into()), Scalar::Bool(true)],
        ];
        let encoded = encode_copy_rows(&rows);
        assert_eq!(encoded, "1\ta\\tb\t\\N\n2\tline\\nbreak\tt\n");
    }

    #[test]
    fn encodes_dates_and_backslashes() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let rows = vec![vec![Scalar::Date(date), Scalar::Str("c:\\tmp".into())]];
        assert_eq!(encode_copy_rows(&rows), "2024-02-29\tc:\\\\tmp\n");
    }

    #[test]
    fn empty_rows_encode_to_nothing() {
        assert_eq!(encode_copy_rows(&[]), "");
    }
}
