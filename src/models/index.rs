use serde::{Deserialize, Serialize};

use crate::error::MaintError;

/// Catalog object id (`pg_class.oid` / `pg_constraint.oid`).
pub type ObjectId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub oid: ObjectId,
    /// Output of `pg_get_indexdef`, e.g.
    /// `CREATE UNIQUE INDEX idx ON public.obs USING btree (station, reftime)`.
    pub definition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Other(char),
}

impl ConstraintKind {
    /// Maps a `pg_constraint.contype` code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => ConstraintKind::ForeignKey,
            other => ConstraintKind::Other(other.chars().next().unwrap_or('?')),
        }
    }

    pub fn code(&self) -> char {
        match self {
            ConstraintKind::PrimaryKey => 'p',
            ConstraintKind::Unique => 'u',
            ConstraintKind::ForeignKey => 'f',
            ConstraintKind::Other(c) => *c,
        }
    }

    /// Keyword used by `ADD CONSTRAINT ... <kind> USING INDEX`, for the kinds
    /// that can adopt an existing index.
    pub fn using_index_keyword(&self) -> Option<&'static str> {
        match self {
            ConstraintKind::PrimaryKey => Some("PRIMARY KEY"),
            ConstraintKind::Unique => Some("UNIQUE"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintInfo {
    pub oid: ObjectId,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub deferrable: bool,
    #[serde(default)]
    pub initially_deferred: bool,
}

impl ConstraintInfo {
    /// A non-deferrable constraint.
    pub fn new(oid: ObjectId, kind: ConstraintKind) -> Self {
        ConstraintInfo {
            oid,
            kind,
            deferrable: false,
            initially_deferred: false,
        }
    }

    /// Clause to append when re-adding the constraint, empty for the default.
    pub fn deferral_clause(&self) -> &'static str {
        match (self.deferrable, self.initially_deferred) {
            (true, true) => " DEFERRABLE INITIALLY DEFERRED",
            (true, false) => " DEFERRABLE",
            (false, _) => "",
        }
    }
}

/// Any constraint whose `conindid` points at the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentConstraint {
    pub name: String,
    pub table_name: String,
    pub schema: String,
    pub kind: ConstraintKind,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDependent {
    pub name: String,
    pub table_name: String,
    pub schema: String,
    /// Output of `pg_get_constraintdef`, e.g.
    /// `FOREIGN KEY (station) REFERENCES obs_station(id)`.
    pub definition: String,
}

impl ForeignKeyDependent {
    /// Only foreign keys can be dropped and re-added without knowing more
    /// about them; anything else stops the rebuild.
    pub fn from_dependent(dep: DependentConstraint, index_name: &str) -> Result<Self, MaintError> {
        match dep.kind {
            ConstraintKind::ForeignKey => Ok(ForeignKeyDependent {
                name: dep.name,
                table_name: dep.table_name,
                schema: dep.schema,
                definition: dep.definition,
            }),
            kind => Err(MaintError::UnsupportedDependentKind {
                constraint: dep.name,
                index: index_name.to_string(),
                kind: kind.code(),
            }),
        }
    }
}
