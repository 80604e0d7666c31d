use crate::dialect::{ConflictAction, DatePart, DateUnit, DbType, Dialect};
use crate::error::Result;

/// PostgreSQL-family provider.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_always(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn bool_literal(&self, val: bool) -> &'static str {
        if val {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn db_type_name(&self, ty: DbType) -> &'static str {
        match ty {
            DbType::Bool => "boolean",
            DbType::Int => "integer",
            DbType::BigInt => "bigint",
            DbType::Float => "double precision",
            DbType::Decimal => "numeric",
            DbType::Text => "text",
            DbType::Date => "date",
            DbType::Timestamp => "timestamp",
            DbType::Uuid => "uuid",
        }
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        let field = match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::DayOfYear => "DOY",
        };
        format!("EXTRACT({} FROM {})", field, expr)
    }

    fn date_add(&self, unit: DateUnit, expr: &str, amount: &str) -> String {
        let unit_name = match unit {
            DateUnit::Day => "days",
            DateUnit::Month => "months",
            DateUnit::Year => "years",
        };
        format!("{} + ({}) * INTERVAL '1 {}'", expr, amount, unit_name)
    }

    fn now(&self) -> &'static str {
        "NOW()"
    }

    fn today(&self) -> &'static str {
        "CURRENT_DATE"
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    fn supports_bulk_copy(&self) -> bool {
        true
    }

    fn upsert_clause(&self, conflict_cols: &[String], action: &ConflictAction) -> Result<String> {
        let mut sql = format!(" ON CONFLICT ({})", conflict_cols.join(", "));
        match action {
            ConflictAction::DoNothing => sql.push_str(" DO NOTHING"),
            ConflictAction::DoUpdate { assignments } => {
                sql.push_str(" DO UPDATE SET ");
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|c| format!("{} = {}", self.quote(c), self.excluded_ref(c)))
                    .collect();
                sql.push_str(&sets.join(", "));
            }
        }
        Ok(sql)
    }

    fn excluded_ref(&self, col: &str) -> String {
        format!("EXCLUDED.{}", self.quote(col))
    }

    fn returning_clause(&self, cols: &[String]) -> Result<String> {
        if cols.is_empty() {
            return Ok(" RETURNING *".to_string());
        }
        Ok(format!(" RETURNING {}", cols.join(", ")))
    }

    fn update_from_temp(
        &self,
        target: &str,
        temp: &str,
        key_cols: &[String],
        set_cols: &[String],
    ) -> String {
        let sets: Vec<String> = set_cols
            .iter()
            .map(|c| format!("{} = s.{}", self.quote(c), self.quote(c)))
            .collect();
        let on: Vec<String> = key_cols
            .iter()
            .map(|k| format!("{}.{} = s.{}", self.quote(target), self.quote(k), self.quote(k)))
            .collect();
        format!(
            "UPDATE {} SET {} FROM {} s WHERE {}",
            self.quote(target),
            sets.join(", "),
            self.quote(temp),
            on.join(" AND ")
        )
    }
}
