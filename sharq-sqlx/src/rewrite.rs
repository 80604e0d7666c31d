//! Placeholder rewriting.
//!
//! Compiled SQL carries `@`-named parameters so its text is stable across
//! drivers; at bind time the names are rewritten to Postgres positional
//! `$n` placeholders. Names are replaced longest-first so `@p1` never
//! clobbers the prefix of `@p10`.

use sharq_core::ast::Scalar;
use sharq_core::SqlParam;

/// Rewrite `@`-named placeholders to `$n` and return the values in bind
/// order. A parameter's position is its index in `params`; every occurrence
/// of a name maps to the same placeholder.
pub fn rewrite_placeholders(sql: &str, params: &[SqlParam]) -> (String, Vec<Scalar>) {
    let mut indexed: Vec<(usize, &SqlParam)> = params.iter().enumerate().collect();
    indexed.sort_by(|a, b| b.1.name.len().cmp(&a.1.name.len()));

    let mut out = sql.to_string();
    for (index, param) in indexed {
        out = out.replace(&param.name, &format!("${}", index + 1));
    }
    let values = params.iter().map(|p| p.value.clone()).collect();
    (out, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(name: &str, value: impl Into<Scalar>) -> SqlParam {
        SqlParam {
            name: name.to_string(),
            value: value.into(),
        }
    }

    #[test]
    fn rewrites_in_parameter_order() {
        let (sql, values) = rewrite_placeholders(
            "SELECT * FROM users WHERE Id=@p0 AND Name=@p1",
            &[p("@p0", 1i64), p("@p1", "kevin")],
        );
        assert_eq!(sql, "SELECT * FROM users WHERE Id=$1 AND Name=$2");
        assert_eq!(values, vec![Scalar::Int(1), Scalar::Str("kevin".into())]);
    }

    #[test]
    fn repeated_name_maps_to_one_placeholder() {
        let (sql, values) =
            rewrite_placeholders("A=@p0 AND B=@p0", &[p("@p0", 7i64)]);
        assert_eq!(sql, "A=$1 AND B=$1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn longer_names_do_not_collide_with_prefixes() {
        let params: Vec<SqlParam> = (0..11).map(|i| p(&format!("@Name{}", i), i as i64)).collect();
        let (sql, _) = rewrite_placeholders("@Name1 @Name10", &params);
        assert_eq!(sql, "$2 $11");
    }

    #[test]
    fn member_and_key_names_rewrite_independently() {
        let (sql, _) = rewrite_placeholders(
            "UPDATE t SET Age=@Age0 WHERE Id=@kId0",
            &[p("@Age0", 21i64), p("@kId0", 1i64)],
        );
        assert_eq!(sql, "UPDATE t SET Age=$1 WHERE Id=$2");
    }
}
