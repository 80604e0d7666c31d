//! Entity metadata: table/column mapping and the process-wide registry.

pub mod row;

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dialect::{DbType, Dialect};

pub use row::{MapRow, RowAccess};

/// One mapped member: logical name plus its database column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberMapper {
    /// Logical member name used in expressions and parameter names.
    pub name: String,
    /// Database column name.
    pub column: String,
    pub db_type: DbType,
    /// Part of the primary key.
    pub is_key: bool,
    /// Database-generated; skipped on insert.
    pub is_identity: bool,
    pub nullable: bool,
}

/// Navigation relationship keyed by a foreign-key member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    OneToOne {
        member: String,
        foreign_table: String,
        local_key: String,
        foreign_key: String,
    },
    OneToMany {
        member: String,
        foreign_table: String,
        local_key: String,
        foreign_key: String,
    },
}

/// Static mapping from a logical entity to its table. Built once, immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapper {
    pub entity: String,
    pub table: String,
    pub schema: Option<String>,
    pub members: Vec<MemberMapper>,
    pub relations: Vec<Relation>,
}

impl EntityMapper {
    pub fn builder(entity: impl Into<String>, table: impl Into<String>) -> EntityMapperBuilder {
        EntityMapperBuilder {
            entity: entity.into(),
            table: table.into(),
            schema: None,
            members: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn member(&self, name: &str) -> Option<&MemberMapper> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MemberMapper> {
        self.members.iter().filter(|m| m.is_key)
    }

    /// Columns eligible for insert (identity columns are database-assigned).
    pub fn insertable(&self) -> impl Iterator<Item = &MemberMapper> {
        self.members.iter().filter(|m| !m.is_identity)
    }

    /// Schema-qualified, dialect-quoted table reference.
    pub fn qualified_table(&self, dialect: &dyn Dialect) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", dialect.quote(schema), dialect.quote(&self.table)),
            None => dialect.quote(&self.table),
        }
    }
}

/// Fluent builder for [`EntityMapper`].
pub struct EntityMapperBuilder {
    entity: String,
    table: String,
    schema: Option<String>,
    members: Vec<MemberMapper>,
    relations: Vec<Relation>,
}

impl EntityMapperBuilder {
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, name: impl Into<String>, db_type: DbType) -> Self {
        let name = name.into();
        self.members.push(MemberMapper {
            column: name.clone(),
            name,
            db_type,
            is_key: false,
            is_identity: false,
            nullable: false,
        });
        self
    }

    /// Column whose database name differs from the member name.
    pub fn column_as(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        db_type: DbType,
    ) -> Self {
        self.members.push(MemberMapper {
            name: name.into(),
            column: column.into(),
            db_type,
            is_key: false,
            is_identity: false,
            nullable: false,
        });
        self
    }

    pub fn key(mut self, name: impl Into<String>, db_type: DbType) -> Self {
        let name = name.into();
        self.members.push(MemberMapper {
            column: name.clone(),
            name,
            db_type,
            is_key: true,
            is_identity: false,
            nullable: false,
        });
        self
    }

    /// Key column that is also database-generated.
    pub fn identity_key(mut self, name: impl Into<String>, db_type: DbType) -> Self {
        let name = name.into();
        self.members.push(MemberMapper {
            column: name.clone(),
            name,
            db_type,
            is_key: true,
            is_identity: true,
            nullable: false,
        });
        self
    }

    pub fn nullable(mut self, name: impl Into<String>, db_type: DbType) -> Self {
        let name = name.into();
        self.members.push(MemberMapper {
            column: name.clone(),
            name,
            db_type,
            is_key: false,
            is_identity: false,
            nullable: true,
        });
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn build(self) -> EntityMapper {
        EntityMapper {
            entity: self.entity,
            table: self.table,
            schema: self.schema,
            members: self.members,
            relations: self.relations,
        }
    }
}

/// Process-wide entity registry. Lazily populated, read-mostly; each entity is
/// built at most once (or redundantly but convergently under races).
pub struct EntityRegistry {
    map: DashMap<String, Arc<EntityMapper>>,
}

static GLOBAL: Lazy<EntityRegistry> = Lazy::new(|| EntityRegistry {
    map: DashMap::new(),
});

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// The shared process-wide registry.
    pub fn global() -> &'static EntityRegistry {
        &GLOBAL
    }

    pub fn get(&self, entity: &str) -> Option<Arc<EntityMapper>> {
        self.map.get(entity).map(|e| Arc::clone(&e))
    }

    /// Look up or build-and-cache an entity mapping.
    pub fn get_or_register(
        &self,
        entity: &str,
        build: impl FnOnce() -> EntityMapper,
    ) -> Arc<EntityMapper> {
        if let Some(found) = self.map.get(entity) {
            return Arc::clone(&found);
        }
        let mapper = Arc::new(build());
        self.map
            .entry(entity.to_string())
            .or_insert(mapper)
            .clone()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;

    fn users() -> EntityMapper {
        EntityMapper::builder("User", "users")
            .identity_key("Id", DbType::BigInt)
            .column("Name", DbType::Text)
            .column("IsEnabled", DbType::Bool)
            .build()
    }

    #[test]
    fn keys_and_insertable() {
        let mapper = users();
        assert_eq!(mapper.keys().count(), 1);
        // Identity key is excluded from inserts.
        let cols: Vec<&str> = mapper.insertable().map(|m| m.name.as_str()).collect();
        assert_eq!(cols, vec!["Name", "IsEnabled"]);
    }

    #[test]
    fn registry_returns_same_instance() {
        let registry = EntityRegistry::new();
        let a = registry.get_or_register("User", users);
        let b = registry.get_or_register("User", || panic!("must not rebuild"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn qualified_table_with_schema() {
        let mapper = EntityMapper::builder("Audit", "events")
            .schema("audit")
            .key("Id", DbType::BigInt)
            .build();
        let pg = DialectKind::Postgres.provider();
        assert_eq!(mapper.qualified_table(pg), "audit.events");
    }
}
