//! Row sources for insert/update builders.
//!
//! Rows arrive either as typed records implementing [`RowAccess`] or as
//! ordered name/value maps; the member mapper and bulk planner only ever see
//! the accessor.

use crate::ast::Scalar;

/// Uniform accessor over one row of input data.
pub trait RowAccess {
    /// Value for a logical member name, `None` when the row has no such field.
    fn value(&self, member: &str) -> Option<Scalar>;
}

/// An ordered field-name/value map row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapRow(pub Vec<(String, Scalar)>);

impl MapRow {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn set(mut self, member: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.0.push((member.into(), value.into()));
        self
    }
}

impl RowAccess for MapRow {
    fn value(&self, member: &str) -> Option<Scalar> {
        self.0
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, v)| v.clone())
    }
}

impl RowAccess for Vec<(String, Scalar)> {
    fn value(&self, member: &str) -> Option<Scalar> {
        self.iter()
            .find(|(name, _)| name == member)
            .map(|(_, v)| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_row_lookup() {
        let row = MapRow::new().set("Id", 7i64).set("Name", "kevin");
        assert_eq!(row.value("Id"), Some(Scalar::Int(7)));
        assert_eq!(row.value("Name"), Some(Scalar::Str("kevin".into())));
        assert_eq!(row.value("Missing"), None);
    }
}
