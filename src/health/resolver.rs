use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::postgres;
use crate::error::{MaintError, Result};
use crate::models::{
    ConstraintInfo, DependentConstraint, ForeignKeyDependent, IndexDefinition, ObjectId,
};

/// Catalog lookups needed to rebuild an index. Nothing is cached: the index
/// may have changed between two attempts.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    /// Oid and definition of `schema.index_name`; `NotFound` when either is
    /// missing (e.g. dropped concurrently).
    async fn resolve(&self, schema: &str, index_name: &str) -> Result<IndexDefinition>;

    /// The constraint named like the index, if any. Absence means a
    /// free-standing index.
    async fn find_backing_constraint(
        &self,
        schema: &str,
        constraint_name: &str,
    ) -> Result<Option<ConstraintInfo>>;

    /// Every constraint enforced through the index, of any kind.
    async fn find_dependents(
        &self,
        index_oid: ObjectId,
        exclude_constraint: Option<ObjectId>,
    ) -> Result<Vec<DependentConstraint>>;

    /// Foreign keys relying on the index. Any other kind of dependent fails
    /// with `UnsupportedDependentKind`.
    async fn find_foreign_dependents(
        &self,
        index_name: &str,
        index_oid: ObjectId,
        exclude_constraint: Option<ObjectId>,
    ) -> Result<Vec<ForeignKeyDependent>> {
        self.find_dependents(index_oid, exclude_constraint)
            .await?
            .into_iter()
            .map(|dep| ForeignKeyDependent::from_dependent(dep, index_name))
            .collect()
    }
}

/// Catalog lookups through the shared read-only pool.
#[derive(Clone)]
pub struct PgIndexResolver {
    pool: PgPool,
}

impl PgIndexResolver {
    pub fn new(pool: PgPool) -> Self {
        PgIndexResolver { pool }
    }
}

#[async_trait]
impl IndexCatalog for PgIndexResolver {
    async fn resolve(&self, schema: &str, index_name: &str) -> Result<IndexDefinition> {
        let definition = postgres::get_index_definition(&self.pool, schema, index_name).await?;
        log::debug!("Index lookup {}.{}: {:?}", schema, index_name, definition);

        definition.ok_or_else(|| MaintError::NotFound(format!("\"{}\".\"{}\"", schema, index_name)))
    }

    async fn find_backing_constraint(
        &self,
        schema: &str,
        constraint_name: &str,
    ) -> Result<Option<ConstraintInfo>> {
        let constraint = postgres::get_constraint(&self.pool, schema, constraint_name).await?;
        log::debug!(
            "Constraint lookup {}.{}: {:?}",
            schema,
            constraint_name,
            constraint
        );
        Ok(constraint)
    }

    async fn find_dependents(
        &self,
        index_oid: ObjectId,
        exclude_constraint: Option<ObjectId>,
    ) -> Result<Vec<DependentConstraint>> {
        let dependents =
            postgres::get_index_dependents(&self.pool, index_oid, exclude_constraint).await?;
        log::debug!(
            "Found {} constraints depending on index oid {}",
            dependents.len(),
            index_oid
        );
        Ok(dependents)
    }
}
