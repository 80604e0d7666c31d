use crate::dialect::{ConflictAction, DatePart, DateUnit, DbType, Dialect};
use crate::error::Result;

/// MySQL-family provider.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_always(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn bool_literal(&self, val: bool) -> &'static str {
        if val {
            "1"
        } else {
            "0"
        }
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn db_type_name(&self, ty: DbType) -> &'static str {
        match ty {
            DbType::Bool => "tinyint(1)",
            DbType::Int => "int",
            DbType::BigInt => "bigint",
            DbType::Float => "double",
            DbType::Decimal => "decimal(38,10)",
            DbType::Text => "text",
            DbType::Date => "date",
            DbType::Timestamp => "datetime",
            DbType::Uuid => "char(36)",
        }
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        match part {
            DatePart::Year => format!("YEAR({})", expr),
            DatePart::Month => format!("MONTH({})", expr),
            DatePart::Day => format!("DAY({})", expr),
            DatePart::DayOfYear => format!("DAYOFYEAR({})", expr),
        }
    }

    fn date_add(&self, unit: DateUnit, expr: &str, amount: &str) -> String {
        let unit_name = match unit {
            DateUnit::Day => "DAY",
            DateUnit::Month => "MONTH",
            DateUnit::Year => "YEAR",
        };
        format!("DATE_ADD({}, INTERVAL ({}) {})", expr, amount, unit_name)
    }

    fn now(&self) -> &'static str {
        "NOW()"
    }

    fn today(&self) -> &'static str {
        "CURDATE()"
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn length_fn(&self) -> &'static str {
        "CHAR_LENGTH"
    }

    fn substring(&self, expr: &str, start: &str, length: &str) -> String {
        format!("SUBSTRING({}, {}, {})", expr, start, length)
    }

    fn upsert_clause(&self, conflict_cols: &[String], action: &ConflictAction) -> Result<String> {
        // MySQL keys on any unique constraint; the conflict target is implied.
        match action {
            ConflictAction::DoNothing => {
                // `INSERT IGNORE` would need to prefix the statement; the
                // portable form is a no-op self-assignment of a conflict
                // column.
                let col = conflict_cols.first().ok_or_else(|| {
                    self.unsupported("upsert without conflict columns")
                })?;
                Ok(format!(" ON DUPLICATE KEY UPDATE {col} = {col}"))
            }
            ConflictAction::DoUpdate { assignments } => {
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|c| format!("{} = {}", self.quote(c), self.excluded_ref(c)))
                    .collect();
                Ok(format!(" ON DUPLICATE KEY UPDATE {}", sets.join(", ")))
            }
        }
    }

    fn excluded_ref(&self, col: &str) -> String {
        format!("VALUES({})", self.quote(col))
    }

    fn like_escape_clause(&self) -> &'static str {
        // Backslash is itself an escape inside MySQL string literals.
        " ESCAPE '\\\\'"
    }

    fn returning_clause(&self, _cols: &[String]) -> Result<String> {
        Err(self.unsupported("RETURNING"))
    }

    fn update_from_temp(
        &self,
        target: &str,
        temp: &str,
        key_cols: &[String],
        set_cols: &[String],
    ) -> String {
        let on: Vec<String> = key_cols
            .iter()
            .map(|k| format!("t.{} = s.{}", self.quote(k), self.quote(k)))
            .collect();
        let sets: Vec<String> = set_cols
            .iter()
            .map(|c| format!("t.{} = s.{}", self.quote(c), self.quote(c)))
            .collect();
        format!(
            "UPDATE {} t INNER JOIN {} s ON {} SET {}",
            self.quote(target),
            self.quote(temp),
            on.join(" AND "),
            sets.join(", ")
        )
    }
}
