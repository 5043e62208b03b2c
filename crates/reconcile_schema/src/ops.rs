//! Reconciliation operations.
//!
//! One operation is one atomic schema change. Operations know how to render
//! themselves to SQL, whether they can run inside a transaction, and how to
//! identify themselves with a stable content hash (the acknowledgment token
//! the safety gate matches against).

use crate::model::{ColumnSpec, EnumSpec, IndexSpec, PolicySpec, SqlType, TableSpec};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a planned operation within one plan.
pub type OpId = usize;

/// Risk classification for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Cannot lose data or block access to existing rows
    Additive,

    /// Can lose data, narrow valid value ranges, or take an extended lock
    Destructive,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Additive => f.write_str("additive"),
            RiskLevel::Destructive => f.write_str("destructive"),
        }
    }
}

/// Where a new enum label lands relative to the live label list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum EnumPosition {
    /// Plain append at the end of the list (the only safe case)
    Last,

    /// Insert before an existing label
    Before(String),

    /// Insert after an existing label
    After(String),
}

/// A single atomic schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconciliationOperation {
    CreateExtension {
        name: String,
    },

    CreateEnum {
        spec: EnumSpec,
    },

    AddEnumValue {
        enum_name: String,
        value: String,
        position: EnumPosition,
    },

    CreateTable {
        spec: TableSpec,
    },

    AddColumn {
        table: String,
        column: ColumnSpec,
    },

    AlterColumnType {
        table: String,
        column: String,
        from: SqlType,
        to: SqlType,
        using_expr: Option<String>,
    },

    AlterColumnNullability {
        table: String,
        column: String,
        nullable: bool,
    },

    CreateIndex {
        spec: IndexSpec,
        concurrently: bool,
    },

    EnableRowLevelSecurity {
        table: String,
    },

    CreatePolicy {
        spec: PolicySpec,
    },
}

impl ReconciliationOperation {
    /// Render the DDL statements for this operation, in execution order.
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            Self::CreateExtension { name } => {
                vec![format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(name))]
            }

            Self::CreateEnum { spec } => {
                let labels = spec
                    .labels
                    .iter()
                    .map(|l| quote_literal(l))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "CREATE TYPE {} AS ENUM ({labels})",
                    quote_ident(&spec.name)
                )]
            }

            Self::AddEnumValue {
                enum_name,
                value,
                position,
            } => {
                let mut stmt = format!(
                    "ALTER TYPE {} ADD VALUE {}",
                    quote_ident(enum_name),
                    quote_literal(value)
                );
                match position {
                    EnumPosition::Last => {}
                    EnumPosition::Before(label) => {
                        stmt.push_str(&format!(" BEFORE {}", quote_literal(label)));
                    }
                    EnumPosition::After(label) => {
                        stmt.push_str(&format!(" AFTER {}", quote_literal(label)));
                    }
                }
                vec![stmt]
            }

            Self::CreateTable { spec } => {
                let columns = spec
                    .columns
                    .iter()
                    .map(|c| format!("    {}", column_ddl(c)))
                    .collect::<Vec<_>>()
                    .join(",\n");
                vec![format!(
                    "CREATE TABLE {} (\n{columns}\n)",
                    quote_ident(&spec.name)
                )]
            }

            Self::AddColumn { table, column } => {
                vec![format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    column_ddl(column)
                )]
            }

            Self::AlterColumnType {
                table,
                column,
                to,
                using_expr,
                ..
            } => {
                let mut stmt = format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {to}",
                    quote_ident(table),
                    quote_ident(column)
                );
                if let Some(using) = using_expr {
                    stmt.push_str(&format!(" USING {using}"));
                }
                vec![stmt]
            }

            Self::AlterColumnNullability {
                table,
                column,
                nullable,
            } => {
                let action = if *nullable { "DROP" } else { "SET" };
                vec![format!(
                    "ALTER TABLE {} ALTER COLUMN {} {action} NOT NULL",
                    quote_ident(table),
                    quote_ident(column)
                )]
            }

            Self::CreateIndex { spec, concurrently } => {
                let unique = if spec.unique { "UNIQUE " } else { "" };
                let concurrent = if *concurrently { "CONCURRENTLY " } else { "" };
                let columns = spec
                    .columns
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![format!(
                    "CREATE {unique}INDEX {concurrent}{} ON {} ({columns})",
                    quote_ident(&spec.name),
                    quote_ident(&spec.table)
                )]
            }

            Self::EnableRowLevelSecurity { table } => {
                vec![format!(
                    "ALTER TABLE {} ENABLE ROW LEVEL SECURITY",
                    quote_ident(table)
                )]
            }

            Self::CreatePolicy { spec } => {
                let mut stmt = format!(
                    "CREATE POLICY {} ON {} FOR {}",
                    quote_ident(&spec.name),
                    quote_ident(&spec.table),
                    spec.command.as_sql()
                );
                if let Some(using) = &spec.using_expr {
                    stmt.push_str(&format!(" USING ({using})"));
                }
                if let Some(check) = &spec.check_expr {
                    stmt.push_str(&format!(" WITH CHECK ({check})"));
                }
                vec![stmt]
            }
        }
    }

    /// Whether this operation may run inside a transaction.
    ///
    /// `ALTER TYPE ... ADD VALUE` and `CREATE INDEX CONCURRENTLY` must run
    /// autocommit on Postgres; the executor flushes them before any
    /// dependent operation so a half-committed type is never observed.
    pub fn is_transactional(&self) -> bool {
        match self {
            Self::AddEnumValue { .. } => false,
            Self::CreateIndex { concurrently, .. } => !concurrently,
            _ => true,
        }
    }

    /// Short machine-friendly kind name, used in report keys.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateExtension { .. } => "create_extension",
            Self::CreateEnum { .. } => "create_enum",
            Self::AddEnumValue { .. } => "add_enum_value",
            Self::CreateTable { .. } => "create_table",
            Self::AddColumn { .. } => "add_column",
            Self::AlterColumnType { .. } => "alter_column_type",
            Self::AlterColumnNullability { .. } => "alter_column_nullability",
            Self::CreateIndex { .. } => "create_index",
            Self::EnableRowLevelSecurity { .. } => "enable_row_level_security",
            Self::CreatePolicy { .. } => "create_policy",
        }
    }

    /// One-line human description naming the affected object.
    pub fn summary(&self) -> String {
        match self {
            Self::CreateExtension { name } => format!("create extension {name}"),
            Self::CreateEnum { spec } => {
                format!("create enum {} ({} labels)", spec.name, spec.labels.len())
            }
            Self::AddEnumValue {
                enum_name,
                value,
                position,
            } => match position {
                EnumPosition::Last => format!("add enum value {enum_name}.{value}"),
                EnumPosition::Before(l) => {
                    format!("add enum value {enum_name}.{value} before {l}")
                }
                EnumPosition::After(l) => {
                    format!("add enum value {enum_name}.{value} after {l}")
                }
            },
            Self::CreateTable { spec } => {
                format!("create table {} ({} columns)", spec.name, spec.columns.len())
            }
            Self::AddColumn { table, column } => {
                format!("add column {table}.{} ({})", column.name, column.sql_type)
            }
            Self::AlterColumnType {
                table,
                column,
                from,
                to,
                ..
            } => format!("alter column {table}.{column} type {from} -> {to}"),
            Self::AlterColumnNullability {
                table,
                column,
                nullable,
            } => format!(
                "alter column {table}.{column} {}",
                if *nullable { "drop not null" } else { "set not null" }
            ),
            Self::CreateIndex { spec, concurrently } => format!(
                "create index {} on {}{}",
                spec.name,
                spec.table,
                if *concurrently { " (concurrently)" } else { "" }
            ),
            Self::EnableRowLevelSecurity { table } => {
                format!("enable row level security on {table}")
            }
            Self::CreatePolicy { spec } => {
                format!("create policy {} on {}", spec.name, spec.table)
            }
        }
    }

    /// Stable content hash, shown as the acknowledgment token.
    ///
    /// Hashing the rendered SQL (not just the object name) ensures an
    /// acknowledgment only matches the exact change that was reviewed.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        for stmt in self.to_sql() {
            hasher.update(b"\n");
            hasher.update(stmt.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }
}

impl fmt::Display for ReconciliationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// A planned operation with its dependencies and risk classification.
///
/// Created by the planner, consumed in order by the executor. The planner
/// exclusively owns dependency computation; the executor exclusively owns
/// execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOperation {
    /// Stable id within this plan (emission order)
    pub id: OpId,

    pub op: ReconciliationOperation,

    /// Ids of operations that must precede this one
    pub depends_on: Vec<OpId>,

    pub risk: RiskLevel,
}

impl PlannedOperation {
    pub fn summary(&self) -> String {
        self.op.summary()
    }

    pub fn content_hash(&self) -> String {
        self.op.content_hash()
    }

    pub fn is_destructive(&self) -> bool {
        self.risk == RiskLevel::Destructive
    }
}

/// Render one column definition for CREATE TABLE / ADD COLUMN.
fn column_ddl(column: &ColumnSpec) -> String {
    let mut ddl = format!("{} {}", quote_ident(&column.name), column.sql_type);
    if !column.nullable {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_expr {
        ddl.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(check) = &column.check {
        ddl.push_str(&format!(" CHECK ({check})"));
    }
    ddl
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quote a string literal, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnSpec, PolicyCommand, SqlType};

    #[test]
    fn test_add_enum_value_sql() {
        let op = ReconciliationOperation::AddEnumValue {
            enum_name: "project_status".into(),
            value: "archived".into(),
            position: EnumPosition::Last,
        };
        assert_eq!(
            op.to_sql(),
            vec!["ALTER TYPE \"project_status\" ADD VALUE 'archived'"]
        );
        assert!(!op.is_transactional());

        let op = ReconciliationOperation::AddEnumValue {
            enum_name: "project_status".into(),
            value: "review".into(),
            position: EnumPosition::Before("active".into()),
        };
        assert_eq!(
            op.to_sql(),
            vec!["ALTER TYPE \"project_status\" ADD VALUE 'review' BEFORE 'active'"]
        );
    }

    #[test]
    fn test_add_column_sql() {
        let op = ReconciliationOperation::AddColumn {
            table: "projects".into(),
            column: ColumnSpec::optional("archived_at", SqlType::parse("timestamptz")),
        };
        assert_eq!(
            op.to_sql(),
            vec!["ALTER TABLE \"projects\" ADD COLUMN \"archived_at\" timestamptz"]
        );
        assert!(op.is_transactional());
    }

    #[test]
    fn test_add_column_with_default_and_check() {
        let column = ColumnSpec::required("status", SqlType::parse("project_status"))
            .with_default("'draft'")
            .with_check("status <> 'deleted'");
        let op = ReconciliationOperation::AddColumn {
            table: "projects".into(),
            column,
        };
        assert_eq!(
            op.to_sql(),
            vec![
                "ALTER TABLE \"projects\" ADD COLUMN \"status\" project_status \
                 NOT NULL DEFAULT 'draft' CHECK (status <> 'deleted')"
            ]
        );
    }

    #[test]
    fn test_create_table_sql() {
        let spec = TableSpec::new(
            "projects",
            vec![
                ColumnSpec::required("id", SqlType::parse("uuid")),
                ColumnSpec::optional("title", SqlType::parse("text")),
            ],
        );
        let op = ReconciliationOperation::CreateTable { spec };
        let sql = op.to_sql();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].starts_with("CREATE TABLE \"projects\""));
        assert!(sql[0].contains("\"id\" uuid NOT NULL"));
        assert!(sql[0].contains("\"title\" text"));
    }

    #[test]
    fn test_concurrent_index_is_not_transactional() {
        let spec = IndexSpec {
            name: "idx_projects_status".into(),
            table: "projects".into(),
            columns: vec!["status".into()],
            unique: false,
        };
        let concurrent = ReconciliationOperation::CreateIndex {
            spec: spec.clone(),
            concurrently: true,
        };
        let plain = ReconciliationOperation::CreateIndex {
            spec,
            concurrently: false,
        };

        assert!(!concurrent.is_transactional());
        assert!(plain.is_transactional());
        assert_eq!(
            concurrent.to_sql(),
            vec!["CREATE INDEX CONCURRENTLY \"idx_projects_status\" ON \"projects\" (\"status\")"]
        );
    }

    #[test]
    fn test_create_policy_sql() {
        let spec = PolicySpec {
            name: "projects_owner".into(),
            table: "projects".into(),
            command: PolicyCommand::Select,
            using_expr: Some("user_id = auth.uid()".into()),
            check_expr: None,
        };
        let op = ReconciliationOperation::CreatePolicy { spec };
        assert_eq!(
            op.to_sql(),
            vec![
                "CREATE POLICY \"projects_owner\" ON \"projects\" FOR SELECT \
                 USING (user_id = auth.uid())"
            ]
        );
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_content_hash_stable_and_distinct() {
        let a = ReconciliationOperation::AddEnumValue {
            enum_name: "project_status".into(),
            value: "archived".into(),
            position: EnumPosition::Last,
        };
        let b = ReconciliationOperation::AddEnumValue {
            enum_name: "project_status".into(),
            value: "deleted".into(),
            position: EnumPosition::Last,
        };

        assert_eq!(a.content_hash(), a.content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 12);
        assert!(a.content_hash().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
