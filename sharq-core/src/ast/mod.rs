//! Expression AST for the sharq compiler.
//!
//! Expressions are built with the fluent constructors in [`expr`]; the
//! compiler consumes the tree without any host-language reflection.

pub mod expr;
pub mod values;

pub use expr::{col, if_else, lit, now, qcol, today, var, BinaryOp, Expr, TypeKind, UnaryOp};
pub use values::Scalar;
