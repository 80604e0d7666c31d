//! Member/method translation registry.
//!
//! Formatters are pure functions from (visitor, target segment, argument
//! segments) to a result segment, keyed by `(TypeKind, name, arity)`. They
//! are derived lazily on first use and memoized for the process lifetime, so
//! they must be referentially transparent. An unknown signature is a hard
//! compile-time error, never a silent fallback.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::ast::{Scalar, TypeKind};
use crate::compile::{fold, Compiler, SegmentKind, SqlSegment};
use crate::dialect::{DatePart, DateUnit, DbType};
use crate::error::{Error, Result};

/// Registry key: declaring type kind, member-or-method name, argument count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatterKey {
    pub owner: TypeKind,
    pub name: String,
    pub arity: usize,
}

/// A cached translation function. `target` is `None` for static members.
pub type Formatter = Arc<
    dyn Fn(&mut Compiler<'_>, Option<SqlSegment>, Vec<SqlSegment>) -> Result<SqlSegment>
        + Send
        + Sync,
>;

/// Lazily-populated formatter cache. Safe for concurrent first use: a key is
/// derived at most once, or redundantly but convergently.
pub struct FormatterRegistry {
    map: DashMap<FormatterKey, Formatter>,
}

static SHARED: Lazy<FormatterRegistry> = Lazy::new(FormatterRegistry::new);

impl FormatterRegistry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// The shared process-wide registry.
    pub fn shared() -> &'static FormatterRegistry {
        &SHARED
    }

    /// Register a custom translation, replacing any derived one.
    pub fn register(&self, owner: TypeKind, name: &str, arity: usize, formatter: Formatter) {
        self.map.insert(
            FormatterKey {
                owner,
                name: name.to_string(),
                arity,
            },
            formatter,
        );
    }

    /// Look up a formatter, deriving and caching it on first use.
    pub fn resolve(&self, owner: TypeKind, name: &str, arity: usize) -> Option<Formatter> {
        let key = FormatterKey {
            owner,
            name: name.to_string(),
            arity,
        };
        if let Some(found) = self.map.get(&key) {
            return Some(found.clone());
        }
        let derived = derive(owner, name, arity)?;
        Some(self.map.entry(key).or_insert(derived).clone())
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_target(target: Option<SqlSegment>) -> Result<SqlSegment> {
    target.ok_or_else(|| Error::unsupported("instance member used without a target"))
}

fn folded(value: Scalar, operands: &[&SqlSegment]) -> SqlSegment {
    let kind = SqlSegment::folded_kind(operands);
    let mut seg = SqlSegment::constant(value);
    seg.kind = kind;
    seg
}

#[derive(Clone, Copy)]
enum LikeShape {
    Contains,
    StartsWith,
    EndsWith,
}

impl LikeShape {
    fn wrap(&self, needle: &str) -> String {
        match self {
            LikeShape::Contains => format!("%{}%", needle),
            LikeShape::StartsWith => format!("{}%", needle),
            LikeShape::EndsWith => format!("%{}", needle),
        }
    }

    fn matches(&self, hay: &str, needle: &str) -> bool {
        match self {
            LikeShape::Contains => hay.contains(needle),
            LikeShape::StartsWith => hay.starts_with(needle),
            LikeShape::EndsWith => hay.ends_with(needle),
        }
    }
}

fn expect_str(seg: &SqlSegment) -> Result<&str> {
    seg.scalar()
        .and_then(Scalar::as_str)
        .ok_or_else(|| Error::unsupported("expected a string operand"))
}

fn expect_int(seg: &SqlSegment) -> Result<i64> {
    seg.scalar()
        .and_then(Scalar::as_int)
        .ok_or_else(|| Error::unsupported("expected an integer operand"))
}

/// Backslash-escape LIKE metacharacters so a needle matches itself literally.
/// `None` when the needle has none (no ESCAPE clause needed).
fn escape_like(needle: &str, metacharacters: &[char]) -> Option<String> {
    if !needle.contains(metacharacters) {
        return None;
    }
    let mut out = String::with_capacity(needle.len() + 2);
    for ch in needle.chars() {
        if metacharacters.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    Some(out)
}

fn like_formatter(shape: LikeShape) -> Formatter {
    Arc::new(move |c, target, mut args| {
        let target = require_target(target)?;
        let needle = args.remove(0);
        if target.is_resolved() && needle.is_resolved() {
            let result = shape.matches(expect_str(&target)?, expect_str(&needle)?);
            return Ok(folded(Scalar::Bool(result), &[&target, &needle]));
        }
        let has_field = target.has_field || needle.has_field;
        let target_sql = c.render(target);
        let mut escape_clause = "";
        let pattern = if needle.is_resolved() {
            let raw = match needle.scalar() {
                Some(Scalar::Str(s)) => s.clone(),
                _ => return Err(Error::unsupported("LIKE pattern must be a string")),
            };
            let text = match escape_like(&raw, c.dialect().like_metacharacters()) {
                Some(escaped) => {
                    escape_clause = c.dialect().like_escape_clause();
                    escaped
                }
                None => raw,
            };
            let wrapped = Scalar::Str(shape.wrap(&text));
            if needle.kind == SegmentKind::Constant {
                c.dialect().literal(&wrapped)
            } else {
                c.params.anonymous(&wrapped)
            }
        } else {
            // Pattern built at runtime from another expression; wildcards in
            // the expression's value keep their pattern meaning.
            let percent = "'%'".to_string();
            let inner = c.render(needle);
            let parts = match shape {
                LikeShape::Contains => vec![percent.clone(), inner, percent],
                LikeShape::StartsWith => vec![inner, percent],
                LikeShape::EndsWith => vec![percent, inner],
            };
            c.dialect().concat(&parts)
        };
        Ok(SqlSegment::method_call(format!(
            "{} LIKE {}{}",
            target_sql, pattern, escape_clause
        ))
        .with_type(DbType::Bool)
        .with_field(has_field))
    })
}

fn string_fn_formatter(name: &'static str, native: fn(&str) -> String) -> Formatter {
    Arc::new(move |c, target, _args| {
        let target = require_target(target)?;
        if target.is_resolved() {
            let result = native(expect_str(&target)?);
            return Ok(folded(Scalar::Str(result), &[&target]));
        }
        let has_field = target.has_field;
        let body = format!("{}({})", name, c.render(target));
        Ok(SqlSegment::method_call(body)
            .with_type(DbType::Text)
            .with_field(has_field))
    })
}

fn date_part_formatter(part: DatePart) -> Formatter {
    Arc::new(move |c, target, _args| {
        let target = require_target(target)?;
        if target.is_resolved() {
            let value = fold::date_part(
                target.scalar().expect("resolved segment holds a value"),
                part,
            )?;
            return Ok(folded(value, &[&target]));
        }
        let has_field = target.has_field;
        let body = c.dialect().date_part(part, &target.body);
        Ok(SqlSegment::method_call(body)
            .with_type(DbType::Int)
            .with_field(has_field))
    })
}

fn date_add_formatter(unit: DateUnit) -> Formatter {
    Arc::new(move |c, target, mut args| {
        let target = require_target(target)?;
        let amount = args.remove(0);
        if target.is_resolved() && amount.is_resolved() {
            let n = expect_int(&amount)?;
            let value = target.scalar().expect("resolved segment holds a value");
            let result = match unit {
                DateUnit::Day => fold::add_days(value, n)?,
                DateUnit::Month => fold::add_months(value, n)?,
                DateUnit::Year => fold::add_years(value, n)?,
            };
            return Ok(folded(result, &[&target, &amount]));
        }
        let has_field = target.has_field || amount.has_field;
        let expect = target.expect_type;
        let target_sql = c.render(target);
        let amount_sql = c.render(amount);
        let mut seg =
            SqlSegment::method_call(c.dialect().date_add(unit, &target_sql, &amount_sql))
                .with_field(has_field);
        seg.expect_type = expect.or(Some(DbType::Timestamp));
        Ok(seg)
    })
}

fn compare_to_formatter() -> Formatter {
    Arc::new(|c, target, mut args| {
        let target = require_target(target)?;
        let other = args.remove(0);
        if target.is_resolved() && other.is_resolved() {
            let ordering = fold::compare(
                target.scalar().expect("resolved segment holds a value"),
                other.scalar().expect("resolved segment holds a value"),
            )?;
            let n = match ordering {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            return Ok(folded(Scalar::Int(n), &[&target, &other]));
        }
        let has_field = target.has_field || other.has_field;
        let a = c.render(target);
        let b = c.render(other);
        // Stable three-way sort contract, identical to native CompareTo.
        let body = format!(
            "CASE WHEN {a}={b} THEN 0 WHEN {a}>{b} THEN 1 ELSE -1 END",
            a = a,
            b = b
        );
        Ok(SqlSegment::method_call(body)
            .with_type(DbType::Int)
            .with_field(has_field))
    })
}

fn derive(owner: TypeKind, name: &str, arity: usize) -> Option<Formatter> {
    let formatter: Formatter = match (owner, name, arity) {
        (TypeKind::Str, "len", 0) => Arc::new(|c, target, _| {
            let target = require_target(target)?;
            if target.is_resolved() {
                let n = expect_str(&target)?.chars().count() as i64;
                return Ok(folded(Scalar::Int(n), &[&target]));
            }
            let has_field = target.has_field;
            let body = format!("{}({})", c.dialect().length_fn(), c.render(target));
            Ok(SqlSegment::method_call(body)
                .with_type(DbType::Int)
                .with_field(has_field))
        }),
        (TypeKind::Str, "contains", 1) => like_formatter(LikeShape::Contains),
        (TypeKind::Str, "starts_with", 1) => like_formatter(LikeShape::StartsWith),
        (TypeKind::Str, "ends_with", 1) => like_formatter(LikeShape::EndsWith),
        // The char-span overload carries a comparison-kind argument that has
        // no SQL equivalent; refusing beats mistranslating.
        (TypeKind::Str, "contains", 2) => Arc::new(|_, _, _| {
            Err(Error::unsupported(
                "String.contains with a span-of-characters argument is not translatable",
            ))
        }),
        (TypeKind::Str, "to_lower", 0) => {
            string_fn_formatter("LOWER", |s| s.to_lowercase())
        }
        (TypeKind::Str, "to_upper", 0) => {
            string_fn_formatter("UPPER", |s| s.to_uppercase())
        }
        (TypeKind::Str, "trim", 0) => string_fn_formatter("TRIM", |s| s.trim().to_string()),
        (TypeKind::Str, "substring", 2) => Arc::new(|c, target, mut args| {
            let target = require_target(target)?;
            let length = args.pop().expect("arity checked");
            let start = args.pop().expect("arity checked");
            if target.is_resolved() && start.is_resolved() && length.is_resolved() {
                let s = expect_str(&target)?;
                let from = usize::try_from(expect_int(&start)?)
                    .map_err(|_| Error::unsupported("negative substring start"))?;
                let len = usize::try_from(expect_int(&length)?)
                    .map_err(|_| Error::unsupported("negative substring length"))?;
                let result: String = s.chars().skip(from).take(len).collect();
                return Ok(folded(Scalar::Str(result), &[&target, &start, &length]));
            }
            let has_field = target.has_field || start.has_field || length.has_field;
            let target_sql = c.render(target);
            // SQL substrings are one-based; the DSL is zero-based.
            let start_sql = if let Some(n) = start.scalar().and_then(Scalar::as_int) {
                (n + 1).to_string()
            } else {
                format!("{}+1", c.render(start))
            };
            let length_sql = c.render(length);
            let body = c.dialect().substring(&target_sql, &start_sql, &length_sql);
            Ok(SqlSegment::method_call(body)
                .with_type(DbType::Text)
                .with_field(has_field))
        }),

        (TypeKind::Int, "abs", 0) => Arc::new(|c, target, _| {
            let target = require_target(target)?;
            if target.is_resolved() {
                let value = match target.scalar().expect("resolved segment holds a value") {
                    Scalar::Int(n) => Scalar::Int(n.abs()),
                    Scalar::Float(f) => Scalar::Float(f.abs()),
                    Scalar::Decimal(d) => Scalar::Decimal(d.abs()),
                    other => {
                        return Err(Error::unsupported(format!("cannot take abs of {:?}", other)))
                    }
                };
                return Ok(folded(value, &[&target]));
            }
            let has_field = target.has_field;
            let expect = target.expect_type;
            let body = format!("ABS({})", c.render(target));
            let mut seg = SqlSegment::method_call(body).with_field(has_field);
            seg.expect_type = expect;
            Ok(seg)
        }),
        (TypeKind::Int, "compare_to", 1) => compare_to_formatter(),
        (TypeKind::Int, "min_value", 0) => {
            Arc::new(|_, _, _| Ok(SqlSegment::constant(Scalar::Int(i64::MIN))))
        }
        (TypeKind::Int, "max_value", 0) => {
            Arc::new(|_, _, _| Ok(SqlSegment::constant(Scalar::Int(i64::MAX))))
        }

        (TypeKind::Float, "round", 1) => Arc::new(|c, target, mut args| {
            let target = require_target(target)?;
            let digits = args.remove(0);
            if target.is_resolved() && digits.is_resolved() {
                let d = expect_int(&digits)?;
                let value = match target.scalar().expect("resolved segment holds a value") {
                    Scalar::Float(f) => {
                        let factor = 10f64.powi(d as i32);
                        Scalar::Float((f * factor).round() / factor)
                    }
                    Scalar::Decimal(dec) => Scalar::Decimal(dec.round_dp(d as u32)),
                    other => {
                        return Err(Error::unsupported(format!("cannot round {:?}", other)))
                    }
                };
                return Ok(folded(value, &[&target, &digits]));
            }
            let has_field = target.has_field || digits.has_field;
            let target_sql = c.render(target);
            let digits_sql = c.render(digits);
            Ok(
                SqlSegment::method_call(format!("ROUND({}, {})", target_sql, digits_sql))
                    .with_type(DbType::Float)
                    .with_field(has_field),
            )
        }),

        (TypeKind::DateTime, "year", 0) => date_part_formatter(DatePart::Year),
        (TypeKind::DateTime, "month", 0) => date_part_formatter(DatePart::Month),
        (TypeKind::DateTime, "day", 0) => date_part_formatter(DatePart::Day),
        (TypeKind::DateTime, "day_of_year", 0) => date_part_formatter(DatePart::DayOfYear),
        (TypeKind::DateTime, "add_days", 1) => date_add_formatter(DateUnit::Day),
        (TypeKind::DateTime, "add_months", 1) => date_add_formatter(DateUnit::Month),
        (TypeKind::DateTime, "add_years", 1) => date_add_formatter(DateUnit::Year),
        (TypeKind::DateTime, "now", 0) => Arc::new(|c, _, _| {
            Ok(SqlSegment::expression(c.dialect().now()).with_type(DbType::Timestamp))
        }),

        (TypeKind::Date, "today", 0) => Arc::new(|c, _, _| {
            Ok(SqlSegment::expression(c.dialect().today()).with_type(DbType::Date))
        }),
        (TypeKind::Date, "min_value", 0) => Arc::new(|_, _, _| {
            Ok(SqlSegment::constant(Scalar::Date(NaiveDate::MIN)))
        }),
        (TypeKind::Date, "max_value", 0) => Arc::new(|_, _, _| {
            Ok(SqlSegment::constant(Scalar::Date(NaiveDate::MAX)))
        }),
        (TypeKind::DateTime, "min_value", 0) => Arc::new(|_, _, _| {
            Ok(SqlSegment::constant(Scalar::DateTime(NaiveDateTime::MIN)))
        }),
        (TypeKind::DateTime, "max_value", 0) => Arc::new(|_, _, _| {
            Ok(SqlSegment::constant(Scalar::DateTime(NaiveDateTime::MAX)))
        }),

        _ => return None,
    };
    Some(formatter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, var};
    use crate::dialect::DialectKind;
    use pretty_assertions::assert_eq;

    fn compiler<'a>() -> Compiler<'a> {
        Compiler::new(DialectKind::Postgres.provider(), FormatterRegistry::shared())
    }

    #[test]
    fn contains_with_literal_inlines_pattern() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("Name").contains(lit("kevin"))).unwrap();
        assert_eq!(sql, "Name LIKE '%kevin%'");
        assert!(c.params.is_empty());
    }

    #[test]
    fn contains_with_variable_binds_one_parameter() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("Name").contains(var("q", "kevin"))).unwrap();
        assert_eq!(sql, "Name LIKE @p0");
        let params = c.into_params();
        assert_eq!(params[0].value, Scalar::Str("%kevin%".into()));
    }

    #[test]
    fn contains_escapes_like_wildcards() {
        let mut c = compiler();
        let sql = c.compile_predicate(&col("Note").contains(lit("50%"))).unwrap();
        assert_eq!(sql, "Note LIKE '%50\\%%' ESCAPE '\\'");

        let mut c = compiler();
        let sql = c
            .compile_predicate(&col("Name").starts_with(var("q", "a_b")))
            .unwrap();
        assert_eq!(sql, "Name LIKE @p0 ESCAPE '\\'");
        assert_eq!(c.into_params()[0].value, Scalar::Str("a\\_b%".into()));
    }

    #[test]
    fn constant_contains_folds() {
        let mut c = compiler();
        let seg = c.visit(&lit("hello world").contains(lit("world"))).unwrap();
        assert_eq!(seg.scalar(), Some(&Scalar::Bool(true)));
        assert_eq!(seg.kind, SegmentKind::Constant);
    }

    #[test]
    fn char_span_contains_is_refused() {
        let registry = FormatterRegistry::shared();
        let formatter = registry.resolve(TypeKind::Str, "contains", 2).unwrap();
        let mut c = compiler();
        let err = formatter(
            &mut c,
            Some(SqlSegment::expression("Name")),
            vec![SqlSegment::constant(Scalar::Str("x".into())), SqlSegment::constant(Scalar::Int(0))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedExpression(_)));
    }

    #[test]
    fn day_of_year_emits_dialect_accessor() {
        let mut c = compiler();
        let sql = c.compile_value(&col("CreatedAt").day_of_year()).unwrap();
        assert_eq!(sql, "EXTRACT(DOY FROM CreatedAt)");
    }

    #[test]
    fn compare_to_emits_three_way_case() {
        let mut c = compiler();
        let sql = c.compile_value(&col("A").compare_to(col("B"))).unwrap();
        assert_eq!(sql, "CASE WHEN A=B THEN 0 WHEN A>B THEN 1 ELSE -1 END");
    }

    #[test]
    fn formatter_cache_returns_same_instance() {
        let registry = FormatterRegistry::new();
        let a = registry.resolve(TypeKind::Str, "len", 0).unwrap();
        let b = registry.resolve(TypeKind::Str, "len", 0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
