pub mod ast;
pub mod builders;
pub mod bulk;
pub mod compile;
pub mod dialect;
pub mod error;
pub mod schema;
pub mod sharding;

pub use compile::{CompiledSql, SqlParam};
pub use error::{Error, Result};

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::builders::{Delete, Insert, Query, SortDir, Update};
    pub use crate::compile::{CompiledSql, SqlParam};
    pub use crate::dialect::{DbType, DialectKind};
    pub use crate::error::{Error, Result};
    pub use crate::schema::{EntityMapper, EntityRegistry, MapRow, RowAccess};
    pub use crate::sharding::{
        DatabaseRoute, MultipleCommand, Period, ShardRoute, ShardingTable,
    };
}
