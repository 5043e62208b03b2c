//! Schema model types.
//!
//! One model serves both sides of the diff: the introspector fills it from
//! the live catalog, the loader fills it from definition files. The planner
//! only ever compares two instances of this model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A normalized SQL type.
///
/// Postgres spells the same type several ways (`int4`, `integer`, `INT`);
/// the catalog spells `varchar(50)` as `character varying` plus a length
/// column. Normalizing at the edges means the planner can compare types with
/// plain equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlType {
    normalized: String,
}

impl SqlType {
    /// Parse and normalize a type name.
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let (base, args) = split_type_args(&lowered);

        let canonical = match base {
            "int" | "int4" | "integer" => "integer",
            "int2" | "smallint" => "smallint",
            "int8" | "bigint" => "bigint",
            "bool" | "boolean" => "boolean",
            "float4" | "real" => "real",
            "float8" | "double precision" => "double precision",
            "character varying" | "varchar" => "varchar",
            "character" | "char" | "bpchar" => "char",
            "timestamp with time zone" | "timestamptz" => "timestamptz",
            "timestamp without time zone" | "timestamp" => "timestamp",
            "decimal" | "numeric" => "numeric",
            other => other,
        };

        let normalized = match args {
            // The catalog always reports an explicit scale: numeric(p) and
            // numeric(p,0) are the same type and must compare equal.
            Some(args) if canonical == "numeric" => match parse_numeric_args(args) {
                Some((p, s)) => format!("numeric({p},{s})"),
                None => format!("numeric({args})"),
            },
            Some(args) if type_takes_args(canonical) => format!("{canonical}({args})"),
            _ => canonical.to_string(),
        };

        Self { normalized }
    }

    /// Construct a varchar type with an explicit length.
    pub fn varchar(len: u32) -> Self {
        Self {
            normalized: format!("varchar({len})"),
        }
    }

    /// The base type name without length/precision arguments.
    pub fn base(&self) -> &str {
        match self.normalized.find('(') {
            Some(idx) => &self.normalized[..idx],
            None => &self.normalized,
        }
    }

    /// Declared varchar/char length, if any.
    pub fn length(&self) -> Option<u32> {
        let open = self.normalized.find('(')?;
        let close = self.normalized.rfind(')')?;
        self.normalized[open + 1..close].trim().parse().ok()
    }

    /// Numeric precision and scale, if declared.
    pub fn numeric_args(&self) -> Option<(u32, u32)> {
        if self.base() != "numeric" {
            return None;
        }
        let open = self.normalized.find('(')?;
        let close = self.normalized.rfind(')')?;
        parse_numeric_args(&self.normalized[open + 1..close])
    }

    /// Whether changing a column from `self` to `target` cannot lose data.
    ///
    /// This is the documented widening table; anything not listed here is
    /// treated as a potentially-narrowing change and classified destructive.
    pub fn is_widening_to(&self, target: &SqlType) -> bool {
        if self == target {
            return true;
        }
        match (self.base(), target.base()) {
            ("smallint", "integer") | ("smallint", "bigint") | ("integer", "bigint") => true,
            ("real", "double precision") => true,
            ("varchar", "text") | ("char", "text") | ("char", "varchar") => true,
            ("varchar", "varchar") | ("char", "char") => match (self.length(), target.length()) {
                // No declared length means unlimited
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(from), Some(to)) => to >= from,
            },
            ("numeric", "numeric") => match (self.numeric_args(), target.numeric_args()) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some((fp, fs)), Some((tp, ts))) => ts == fs && tp >= fp,
            },
            _ => false,
        }
    }

    /// The normalized spelling, as rendered into DDL.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn split_type_args(lowered: &str) -> (&str, Option<&str>) {
    match (lowered.find('('), lowered.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            (lowered[..open].trim_end(), Some(lowered[open + 1..close].trim()))
        }
        _ => (lowered, None),
    }
}

fn type_takes_args(base: &str) -> bool {
    matches!(base, "varchar" | "char" | "numeric" | "bit")
}

/// Parse `p` or `p,s` from inside numeric parentheses; a missing scale is 0.
fn parse_numeric_args(args: &str) -> Option<(u32, u32)> {
    let mut parts = args.splitn(2, ',');
    let precision = parts.next()?.trim().parse().ok()?;
    let scale = parts.next().map_or(Some(0), |s| s.trim().parse().ok())?;
    Some((precision, scale))
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name (unique within its table; the loader enforces this)
    pub name: String,

    /// Normalized SQL type
    pub sql_type: SqlType,

    /// Whether NULL values are allowed
    pub nullable: bool,

    /// Default expression, verbatim SQL (e.g. `now()`, `'draft'`)
    pub default_expr: Option<String>,

    /// CHECK constraint body, without the surrounding `CHECK (...)`
    pub check: Option<String>,
}

impl ColumnSpec {
    /// Create a non-nullable column.
    pub fn required(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            default_expr: None,
            check: None,
        }
    }

    /// Create a nullable column.
    pub fn optional(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default_expr: None,
            check: None,
        }
    }

    /// Set the default expression.
    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }

    /// Set a CHECK constraint body.
    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }
}

/// A table and its ordered columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,

    /// Columns in declaration order
    pub columns: Vec<ColumnSpec>,

    /// Whether row-level security is (or should be) enabled
    pub rls_enabled: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
            rls_enabled: false,
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A named enum type with an ordered label list.
///
/// Label order is semantically meaningful: once a label exists on a live
/// enum it can never be removed or reordered without a full type rebuild.
/// That asymmetry is what drives the safety gate's classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumSpec {
    pub name: String,
    pub labels: Vec<String>,
}

impl EnumSpec {
    pub fn new(name: impl Into<String>, labels: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

/// An index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,

    /// Indexed columns, in order. Empty for indexes read back from the
    /// catalog; the planner diffs indexes by name presence only.
    pub columns: Vec<String>,

    pub unique: bool,
}

/// The command a row-level-security policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyCommand::All => "ALL",
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
        }
    }

    /// Parse the catalog spelling from `pg_policies.cmd`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALL" | "*" => Some(PolicyCommand::All),
            "SELECT" | "R" => Some(PolicyCommand::Select),
            "INSERT" | "A" => Some(PolicyCommand::Insert),
            "UPDATE" | "W" => Some(PolicyCommand::Update),
            "DELETE" | "D" => Some(PolicyCommand::Delete),
            _ => None,
        }
    }
}

/// A row-level-security policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub table: String,
    pub command: PolicyCommand,

    /// USING expression body
    pub using_expr: Option<String>,

    /// WITH CHECK expression body
    pub check_expr: Option<String>,
}

/// A point-in-time view of one schema namespace.
///
/// Maps are keyed by object name so lookups and iteration are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// The namespace (Postgres schema) this model describes
    pub namespace: String,

    pub tables: BTreeMap<String, TableSpec>,
    pub enums: BTreeMap<String, EnumSpec>,
    pub indexes: BTreeMap<String, IndexSpec>,
    pub policies: BTreeMap<String, PolicySpec>,
    pub extensions: BTreeSet<String>,
}

impl SchemaModel {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Whether a table currently has row-level security enabled.
    pub fn rls_enabled(&self, table: &str) -> bool {
        self.tables.get(table).is_some_and(|t| t.rls_enabled)
    }
}

/// The target schema, folded from versioned definition units.
///
/// Immutable once loaded for a given run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub model: SchemaModel,

    /// Versions that were folded in, in application order
    pub versions: Vec<String>,
}

impl DesiredState {
    pub fn new(model: SchemaModel) -> Self {
        Self {
            model,
            versions: Vec::new(),
        }
    }
}
