//! Statement generation for an online index rebuild.
//!
//! Everything here is pure: given what the catalog said about the index, it
//! produces the statements to run and the transaction scope each group needs.
//! Nothing is executed.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{MaintError, Result};
use crate::models::{ConstraintInfo, ForeignKeyDependent, IndexBloatRecord, ReindexSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReindexStep {
    Resolve,
    ParseDefinition,
    ClearStaleTemp,
    ClassifyConstraint,
    DiscoverDependents,
    BuildConcurrently,
    SwapIn,
    RestoreForeignKeys,
    ValidateForeignKeys,
    Done,
}

impl fmt::Display for ReindexStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReindexStep::Resolve => "resolve",
            ReindexStep::ParseDefinition => "parse-definition",
            ReindexStep::ClearStaleTemp => "clear-stale-temp",
            ReindexStep::ClassifyConstraint => "classify-constraint",
            ReindexStep::DiscoverDependents => "discover-dependents",
            ReindexStep::BuildConcurrently => "build-concurrently",
            ReindexStep::SwapIn => "swap-in",
            ReindexStep::RestoreForeignKeys => "restore-foreign-keys",
            ReindexStep::ValidateForeignKeys => "validate-foreign-keys",
            ReindexStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Where a statement group runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxScope {
    /// Each statement auto-commits on its own; required for
    /// `CREATE INDEX CONCURRENTLY`.
    Standalone,
    /// All statements share one BEGIN/COMMIT.
    Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlStatement {
    pub step: ReindexStep,
    pub sql: String,
}

impl DdlStatement {
    pub fn new(step: ReindexStep, sql: impl Into<String>) -> Self {
        DdlStatement {
            step,
            sql: sql.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementGroup {
    pub step: ReindexStep,
    pub scope: TxScope,
    pub statements: Vec<DdlStatement>,
}

impl StatementGroup {
    pub fn standalone(statement: DdlStatement) -> Self {
        StatementGroup {
            step: statement.step,
            scope: TxScope::Standalone,
            statements: vec![statement],
        }
    }

    pub fn transaction(step: ReindexStep, statements: Vec<DdlStatement>) -> Self {
        StatementGroup {
            step,
            scope: TxScope::Transaction,
            statements,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Ordered groups; executed front to back, stopping at the first fault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexPlan {
    groups: Vec<StatementGroup>,
}

impl ReindexPlan {
    pub fn push(&mut self, group: StatementGroup) {
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    pub fn groups(&self) -> &[StatementGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<StatementGroup> {
        self.groups
    }

    pub fn statements(&self) -> impl Iterator<Item = &DdlStatement> {
        self.groups.iter().flat_map(|g| g.statements.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// The index being rebuilt, as named in its bloat record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexTarget {
    pub schema: String,
    pub table_name: String,
    pub index_name: String,
}

impl ReindexTarget {
    pub fn new(
        schema: impl Into<String>,
        table_name: impl Into<String>,
        index_name: impl Into<String>,
    ) -> Self {
        ReindexTarget {
            schema: schema.into(),
            table_name: table_name.into(),
            index_name: index_name.into(),
        }
    }

    pub fn qualified_index(&self) -> String {
        qualified(&self.schema, &self.index_name)
    }

    pub fn qualified_table(&self) -> String {
        qualified(&self.schema, &self.table_name)
    }
}

impl From<&IndexBloatRecord> for ReindexTarget {
    fn from(record: &IndexBloatRecord) -> Self {
        ReindexTarget::new(&record.schema, &record.table_name, &record.index_name)
    }
}

impl fmt::Display for ReindexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_index())
    }
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// `<prefix>INDEX <name> <suffix>` split of a `pg_get_indexdef` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDefinition {
    /// Everything before `INDEX`, e.g. `CREATE UNIQUE`.
    pub prefix: String,
    /// `ON <table> USING <method> (<columns>) ...`
    pub suffix: String,
}

fn definition_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"^(.+?) INDEX "?.+?"? (ON .+)$"#).ok())
        .as_ref()
}

pub fn parse_definition(definition: &str) -> Result<ParsedDefinition> {
    let captures = definition_pattern()
        .and_then(|pattern| pattern.captures(definition))
        .ok_or_else(|| MaintError::UnparsableDefinition(definition.to_string()))?;

    Ok(ParsedDefinition {
        prefix: captures[1].to_string(),
        suffix: captures[2].to_string(),
    })
}

/// `<prefix><index>`, cut to the identifier limit on a character boundary.
/// The server would silently truncate a longer name anyway, so the plan uses
/// the name the index will actually get.
pub fn temp_index_name(index_name: &str, settings: &ReindexSettings) -> String {
    let mut name = format!("{}{}", settings.temp_prefix, index_name);
    if name.len() > settings.identifier_max_len {
        let mut cut = settings.identifier_max_len;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Drop a replacement left behind by an earlier attempt. Refuses when
/// truncation made the temp name equal to the index itself.
pub fn clear_stale_temp(target: &ReindexTarget, temp_name: &str) -> Result<StatementGroup> {
    if temp_name == target.index_name {
        return Err(MaintError::TempNameCollision(qualified(
            &target.schema,
            temp_name,
        )));
    }

    Ok(StatementGroup::standalone(DdlStatement::new(
        ReindexStep::ClearStaleTemp,
        format!("DROP INDEX IF EXISTS {}", qualified(&target.schema, temp_name)),
    )))
}

pub fn build_concurrently(parsed: &ParsedDefinition, temp_name: &str) -> StatementGroup {
    StatementGroup::standalone(DdlStatement::new(
        ReindexStep::BuildConcurrently,
        format!(
            "{} INDEX CONCURRENTLY {} {}",
            parsed.prefix,
            quote_ident(temp_name),
            parsed.suffix
        ),
    ))
}

/// Keyword for re-adding the backing constraint, or the abort reason.
pub fn constraint_keyword(
    target: &ReindexTarget,
    constraint: &ConstraintInfo,
) -> Result<&'static str> {
    constraint
        .kind
        .using_index_keyword()
        .ok_or_else(|| MaintError::UnsupportedConstraintKind {
            index: target.index_name.clone(),
            kind: constraint.kind.code(),
        })
}

fn foreign_key_definition(fk: &ForeignKeyDependent) -> &str {
    // An already unvalidated key reports itself with the suffix.
    fk.definition
        .trim_end()
        .strip_suffix("NOT VALID")
        .map(str::trim_end)
        .unwrap_or(fk.definition.trim_end())
}

/// One transaction: detach the foreign keys that reference the index, swap
/// the rebuilt index in, then re-attach the keys unvalidated. The keys have
/// to go first because the server refuses to drop an index or constraint
/// that a foreign key still relies on.
pub fn swap_in(
    target: &ReindexTarget,
    temp_name: &str,
    constraint: Option<&ConstraintInfo>,
    dependents: &[ForeignKeyDependent],
) -> Result<StatementGroup> {
    let mut statements = Vec::with_capacity(dependents.len() * 2 + 2);

    for fk in dependents {
        statements.push(DdlStatement::new(
            ReindexStep::RestoreForeignKeys,
            format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                qualified(&fk.schema, &fk.table_name),
                quote_ident(&fk.name)
            ),
        ));
    }

    match constraint {
        Some(constraint) => {
            let keyword = constraint_keyword(target, constraint)?;
            let name = quote_ident(&target.index_name);
            statements.push(DdlStatement::new(
                ReindexStep::SwapIn,
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}, ADD CONSTRAINT {} {} USING INDEX {}{}",
                    target.qualified_table(),
                    name,
                    name,
                    keyword,
                    quote_ident(temp_name),
                    constraint.deferral_clause()
                ),
            ));
        }
        None => {
            statements.push(DdlStatement::new(
                ReindexStep::SwapIn,
                format!("DROP INDEX IF EXISTS {}", target.qualified_index()),
            ));
            statements.push(DdlStatement::new(
                ReindexStep::SwapIn,
                format!(
                    "ALTER INDEX {} RENAME TO {}",
                    qualified(&target.schema, temp_name),
                    quote_ident(&target.index_name)
                ),
            ));
        }
    }

    for fk in dependents {
        statements.push(DdlStatement::new(
            ReindexStep::RestoreForeignKeys,
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {} NOT VALID",
                qualified(&fk.schema, &fk.table_name),
                quote_ident(&fk.name),
                foreign_key_definition(fk)
            ),
        ));
    }

    Ok(StatementGroup::transaction(ReindexStep::SwapIn, statements))
}

pub fn validate_foreign_keys(dependents: &[ForeignKeyDependent]) -> StatementGroup {
    StatementGroup::transaction(
        ReindexStep::ValidateForeignKeys,
        dependents
            .iter()
            .map(|fk| {
                DdlStatement::new(
                    ReindexStep::ValidateForeignKeys,
                    format!(
                        "ALTER TABLE {} VALIDATE CONSTRAINT {}",
                        qualified(&fk.schema, &fk.table_name),
                        quote_ident(&fk.name)
                    ),
                )
            })
            .collect(),
    )
}

/// Everything after the stale temp index is cleared: build, swap, validate.
pub fn plan_rebuild(
    target: &ReindexTarget,
    parsed: &ParsedDefinition,
    temp_name: &str,
    constraint: Option<&ConstraintInfo>,
    dependents: &[ForeignKeyDependent],
) -> Result<ReindexPlan> {
    let mut plan = ReindexPlan::default();
    plan.push(build_concurrently(parsed, temp_name));
    plan.push(swap_in(target, temp_name, constraint, dependents)?);
    plan.push(validate_foreign_keys(dependents));
    Ok(plan)
}
