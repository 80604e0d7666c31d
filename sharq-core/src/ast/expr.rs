use serde::{Deserialize, Serialize};

use crate::ast::Scalar;
use crate::dialect::DbType;

/// Semantic type owning a member or method, used as the formatter registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    Decimal,
    Str,
    Date,
    DateTime,
    Uuid,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// String concatenation
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A typed expression node. The compiler walks this tree and produces
/// `SqlSegment`s; it never inspects host-language reflection data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal known at build time. Inlined into SQL when safe.
    Constant(Scalar),
    /// A closed-over runtime value: known at build time but bound as a
    /// parameter, never inlined.
    Var { name: String, value: Scalar },
    /// A table column reference.
    Column {
        table: Option<String>,
        name: String,
    },
    /// Instance member access (`target.year`, `target.len`).
    Member {
        target: Box<Expr>,
        owner: TypeKind,
        name: String,
    },
    /// Static member access (`DateTime::now`, `Int::max_value`).
    StaticMember { owner: TypeKind, name: String },
    /// Method call. `target` is `None` for static methods.
    Call {
        target: Option<Box<Expr>>,
        owner: TypeKind,
        name: String,
        args: Vec<Expr>,
    },
    /// Binary expression.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary expression.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Ternary conditional, compiled to `CASE WHEN cond THEN a ELSE b END`.
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Null coalescing, compiled to `COALESCE(a, b)`.
    Coalesce { left: Box<Expr>, right: Box<Expr> },
    /// Explicit type cast.
    Cast { target: Box<Expr>, ty: DbType },
}

/// A bare column reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column {
        table: None,
        name: name.into(),
    }
}

/// A table-qualified column reference.
pub fn qcol(table: impl Into<String>, name: impl Into<String>) -> Expr {
    Expr::Column {
        table: Some(table.into()),
        name: name.into(),
    }
}

/// A literal constant.
pub fn lit(value: impl Into<Scalar>) -> Expr {
    Expr::Constant(value.into())
}

/// A closed-over runtime value. Always parameterized.
pub fn var(name: impl Into<String>, value: impl Into<Scalar>) -> Expr {
    Expr::Var {
        name: name.into(),
        value: value.into(),
    }
}

/// `DateTime::now` static member (database clock).
pub fn now() -> Expr {
    Expr::StaticMember {
        owner: TypeKind::DateTime,
        name: "now".to_string(),
    }
}

/// `Date::today` static member (database clock, date precision).
pub fn today() -> Expr {
    Expr::StaticMember {
        owner: TypeKind::Date,
        name: "today".to_string(),
    }
}

/// Ternary conditional.
pub fn if_else(cond: Expr, then_expr: impl Into<Expr>, else_expr: impl Into<Expr>) -> Expr {
    Expr::Conditional {
        cond: Box::new(cond),
        then_expr: Box::new(then_expr.into()),
        else_expr: Box::new(else_expr.into()),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gte, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lte, other)
    }

    pub fn add(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    pub fn rem(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Rem, other)
    }

    pub fn concat(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Concat, other)
    }

    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    pub fn coalesce(self, other: impl Into<Expr>) -> Expr {
        Expr::Coalesce {
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    pub fn cast(self, ty: DbType) -> Expr {
        Expr::Cast {
            target: Box::new(self),
            ty,
        }
    }

    fn member(self, owner: TypeKind, name: &str) -> Expr {
        Expr::Member {
            target: Box::new(self),
            owner,
            name: name.to_string(),
        }
    }

    fn call(self, owner: TypeKind, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target: Some(Box::new(self)),
            owner,
            name: name.to_string(),
            args,
        }
    }

    // String members and methods.

    pub fn len(self) -> Expr {
        self.member(TypeKind::Str, "len")
    }

    pub fn contains(self, needle: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Str, "contains", vec![needle.into()])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Str, "starts_with", vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Str, "ends_with", vec![suffix.into()])
    }

    pub fn to_lower(self) -> Expr {
        self.call(TypeKind::Str, "to_lower", vec![])
    }

    pub fn to_upper(self) -> Expr {
        self.call(TypeKind::Str, "to_upper", vec![])
    }

    pub fn trim(self) -> Expr {
        self.call(TypeKind::Str, "trim", vec![])
    }

    /// `substring(start, length)` with a zero-based start.
    pub fn substring(self, start: impl Into<Expr>, length: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Str, "substring", vec![start.into(), length.into()])
    }

    // Date/time members and methods.

    pub fn year(self) -> Expr {
        self.member(TypeKind::DateTime, "year")
    }

    pub fn month(self) -> Expr {
        self.member(TypeKind::DateTime, "month")
    }

    pub fn day(self) -> Expr {
        self.member(TypeKind::DateTime, "day")
    }

    pub fn day_of_year(self) -> Expr {
        self.member(TypeKind::DateTime, "day_of_year")
    }

    pub fn add_days(self, n: impl Into<Expr>) -> Expr {
        self.call(TypeKind::DateTime, "add_days", vec![n.into()])
    }

    pub fn add_months(self, n: impl Into<Expr>) -> Expr {
        self.call(TypeKind::DateTime, "add_months", vec![n.into()])
    }

    pub fn add_years(self, n: impl Into<Expr>) -> Expr {
        self.call(TypeKind::DateTime, "add_years", vec![n.into()])
    }

    // Numeric methods.

    pub fn abs(self) -> Expr {
        self.call(TypeKind::Int, "abs", vec![])
    }

    pub fn round(self, digits: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Float, "round", vec![digits.into()])
    }

    /// Three-way comparison, `-1 | 0 | 1` with native sort semantics.
    pub fn compare_to(self, other: impl Into<Expr>) -> Expr {
        self.call(TypeKind::Int, "compare_to", vec![other.into()])
    }
}

impl From<Scalar> for Expr {
    fn from(v: Scalar) -> Self {
        Expr::Constant(v)
    }
}

macro_rules! expr_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Constant(v.into())
                }
            }
        )*
    };
}

expr_from_scalar!(
    bool,
    i32,
    i64,
    f64,
    &str,
    String,
    rust_decimal::Decimal,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    uuid::Uuid,
);
