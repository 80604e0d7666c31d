use crate::dialect::{ConflictAction, DatePart, DateUnit, DbType, Dialect};
use crate::error::Result;

/// SQL Server-family provider.
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_always(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn bool_literal(&self, val: bool) -> &'static str {
        if val {
            "1"
        } else {
            "0"
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn max_parameters(&self) -> usize {
        2100
    }

    fn db_type_name(&self, ty: DbType) -> &'static str {
        match ty {
            DbType::Bool => "bit",
            DbType::Int => "int",
            DbType::BigInt => "bigint",
            DbType::Float => "float",
            DbType::Decimal => "decimal(38,10)",
            DbType::Text => "nvarchar(max)",
            DbType::Date => "date",
            DbType::Timestamp => "datetime2",
            DbType::Uuid => "uniqueidentifier",
        }
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        let field = match part {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::DayOfYear => "dayofyear",
        };
        format!("DATEPART({}, {})", field, expr)
    }

    fn date_add(&self, unit: DateUnit, expr: &str, amount: &str) -> String {
        let unit_name = match unit {
            DateUnit::Day => "day",
            DateUnit::Month => "month",
            DateUnit::Year => "year",
        };
        format!("DATEADD({}, {}, {})", unit_name, amount, expr)
    }

    fn now(&self) -> &'static str {
        "GETDATE()"
    }

    fn today(&self) -> &'static str {
        "CAST(GETDATE() AS date)"
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn length_fn(&self) -> &'static str {
        "LEN"
    }

    fn substring(&self, expr: &str, start: &str, length: &str) -> String {
        format!("SUBSTRING({}, {}, {})", expr, start, length)
    }

    fn upsert_clause(&self, _conflict_cols: &[String], _action: &ConflictAction) -> Result<String> {
        // Upsert here is a whole MERGE statement, never an INSERT suffix.
        Err(self.unsupported("clause-shaped upsert (MERGE is statement-shaped)"))
    }

    fn upsert_is_statement(&self) -> bool {
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_statement(
        &self,
        target: &str,
        source_cols: &[String],
        tuples: &str,
        key_cols: &[String],
        insert_cols: &[String],
        action: &ConflictAction,
        output: &str,
    ) -> Result<String> {
        let on: Vec<String> = key_cols
            .iter()
            .map(|k| format!("t.{} = s.{}", k, k))
            .collect();
        let mut sql = format!(
            "MERGE {} AS t USING (VALUES {}) AS s ({}) ON {}",
            self.quote(target),
            tuples,
            source_cols.join(", "),
            on.join(" AND ")
        );
        if let ConflictAction::DoUpdate { assignments } = action {
            let sets: Vec<String> = assignments
                .iter()
                .map(|c| {
                    let col = self.quote(c);
                    format!("t.{} = s.{}", col, col)
                })
                .collect();
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(", ")));
        }
        let incoming: Vec<String> = insert_cols.iter().map(|c| format!("s.{}", c)).collect();
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            insert_cols.join(", "),
            incoming.join(", ")
        ));
        sql.push_str(output);
        // MERGE must be terminated.
        sql.push(';');
        Ok(sql)
    }

    fn excluded_ref(&self, col: &str) -> String {
        format!("s.{}", self.quote(col))
    }

    fn like_metacharacters(&self) -> &'static [char] {
        // Brackets open a character class in T-SQL LIKE patterns.
        &['%', '_', '[', '\\']
    }

    fn returning_clause(&self, cols: &[String]) -> Result<String> {
        if cols.is_empty() {
            return Ok(" OUTPUT INSERTED.*".to_string());
        }
        let outs: Vec<String> = cols.iter().map(|c| format!("INSERTED.{}", c)).collect();
        Ok(format!(" OUTPUT {}", outs.join(", ")))
    }

    fn create_temp_table(
        &self,
        name: &str,
        cols: &[(String, DbType, bool)],
        key_cols: &[String],
    ) -> String {
        // SQL Server temp tables live in tempdb under a # prefix.
        let mut defs: Vec<String> = cols
            .iter()
            .map(|(col, ty, not_null)| {
                let mut def = format!("{} {}", self.quote(col), self.db_type_name(*ty));
                if *not_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        if !key_cols.is_empty() {
            let keys: Vec<String> = key_cols.iter().map(|k| self.quote(k)).collect();
            defs.push(format!("PRIMARY KEY({})", keys.join(", ")));
        }
        format!("CREATE TABLE [#{}] ({})", name, defs.join(", "))
    }

    fn drop_temp_table(&self, name: &str) -> String {
        format!("DROP TABLE [#{}]", name)
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
            "UPDATE t SET {} FROM {} t INNER JOIN [#{}] s ON {}",
            sets.join(", "),
            self.quote(target),
            temp,
            on.join(" AND ")
        )
    }
}
