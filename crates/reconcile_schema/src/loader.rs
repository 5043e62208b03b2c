//! Desired-state loader.
//!
//! The desired schema is declared as an ordered set of versioned JSON units,
//! one file per logical schema version (`0001_init.json`, `0002_archive.json`,
//! ...). Units are applied in lexicographic filename order and folded into a
//! single [`DesiredState`]. The loader never reorders units and never lets a
//! later unit silently overwrite an earlier one: a type conflict is a hard
//! error, not a last-writer-wins merge.

use crate::model::{
    ColumnSpec, DesiredState, EnumSpec, IndexSpec, PolicyCommand, PolicySpec, SchemaModel,
    SqlType, TableSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading definition units.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read definition {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No definition files found in {0}")]
    Empty(PathBuf),

    #[error(transparent)]
    Conflict(#[from] ConflictingDefinition),
}

/// Two definition units disagree about the same object.
///
/// Every variant names the exact object and the version that introduced the
/// conflict, so the operator can fix the definition instead of guessing.
#[derive(Debug, Error)]
pub enum ConflictingDefinition {
    #[error(
        "column {table}.{column} declared as {existing} (version {existing_version}) \
         and {conflicting} (version {version})"
    )]
    ColumnType {
        table: String,
        column: String,
        existing: SqlType,
        existing_version: String,
        conflicting: SqlType,
        version: String,
    },

    #[error("duplicate column {table}.{column} in version {version}")]
    DuplicateColumn {
        table: String,
        column: String,
        version: String,
    },

    #[error("duplicate enum label {name}.{label} in version {version}")]
    DuplicateEnumLabel {
        name: String,
        label: String,
        version: String,
    },

    #[error(
        "enum {name} in version {version} drops or reorders labels declared earlier \
         (existing {existing:?}, proposed {proposed:?})"
    )]
    EnumRewrite {
        name: String,
        existing: Vec<String>,
        proposed: Vec<String>,
        version: String,
    },

    #[error("{kind} {name} redefined with a different shape in version {version}")]
    Redefined {
        kind: &'static str,
        name: String,
        version: String,
    },
}

/// One versioned definition unit, as parsed from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionUnit {
    /// Sortable version identifier (must match the filename prefix)
    pub version: String,

    #[serde(default)]
    pub enums: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub tables: BTreeMap<String, TableDef>,

    #[serde(default)]
    pub indexes: Vec<IndexDef>,

    #[serde(default)]
    pub policies: Vec<PolicyDef>,

    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Table declaration within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub columns: Vec<ColumnDef>,

    /// Enable row-level security on this table
    #[serde(default)]
    pub rls: bool,
}

/// Column declaration within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,

    #[serde(rename = "type")]
    pub sql_type: String,

    /// Columns are nullable unless declared otherwise, as in SQL
    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default)]
    pub default: Option<String>,

    #[serde(default)]
    pub check: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Index declaration within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,

    #[serde(default)]
    pub unique: bool,
}

/// Policy declaration within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDef {
    pub name: String,
    pub table: String,
    pub command: PolicyCommand,

    #[serde(default)]
    pub using: Option<String>,

    #[serde(default)]
    pub check: Option<String>,
}

/// Load all `*.json` definition units from a directory.
///
/// Files are applied in lexicographic filename order, which is the version
/// application order by convention.
pub fn load_dir(dir: &Path, namespace: &str) -> Result<DesiredState, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(LoadError::Empty(dir.to_path_buf()));
    }

    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let unit: DefinitionUnit =
            serde_json::from_str(&raw).map_err(|source| LoadError::Parse { path, source })?;
        units.push(unit);
    }

    load_units(units, namespace)
}

/// Fold an ordered sequence of definition units into a single desired state.
pub fn load_units(
    units: Vec<DefinitionUnit>,
    namespace: &str,
) -> Result<DesiredState, LoadError> {
    let mut model = SchemaModel::new(namespace);
    let mut versions = Vec::with_capacity(units.len());
    // Where each column's type was first declared, for conflict messages
    let mut column_origin: BTreeMap<(String, String), String> = BTreeMap::new();

    for unit in units {
        fold_unit(&mut model, &mut column_origin, &unit)?;
        versions.push(unit.version);
    }

    let mut desired = DesiredState::new(model);
    desired.versions = versions;
    Ok(desired)
}

fn fold_unit(
    model: &mut SchemaModel,
    column_origin: &mut BTreeMap<(String, String), String>,
    unit: &DefinitionUnit,
) -> Result<(), ConflictingDefinition> {
    let version = &unit.version;

    for ext in &unit.extensions {
        model.extensions.insert(ext.clone());
    }

    for (name, labels) in &unit.enums {
        // Postgres would reject the duplicate label at CREATE TYPE; catch it
        // here so the error names the unit instead of failing mid-apply.
        if let Some(label) = first_duplicate(labels) {
            return Err(ConflictingDefinition::DuplicateEnumLabel {
                name: name.clone(),
                label: label.clone(),
                version: version.clone(),
            });
        }
        match model.enums.get_mut(name) {
            None => {
                model
                    .enums
                    .insert(name.clone(), EnumSpec::new(name.clone(), labels.clone()));
            }
            Some(existing) => {
                // A later unit may add labels (anywhere in the list) but must
                // preserve earlier labels and their relative order.
                if !is_subsequence(&existing.labels, labels) {
                    return Err(ConflictingDefinition::EnumRewrite {
                        name: name.clone(),
                        existing: existing.labels.clone(),
                        proposed: labels.clone(),
                        version: version.clone(),
                    });
                }
                existing.labels = labels.clone();
            }
        }
    }

    for (name, def) in &unit.tables {
        let table = model
            .tables
            .entry(name.clone())
            .or_insert_with(|| TableSpec::new(name.clone(), Vec::new()));
        table.rls_enabled |= def.rls;

        let mut seen_in_unit: Vec<&str> = Vec::new();
        for col_def in &def.columns {
            if seen_in_unit.contains(&col_def.name.as_str()) {
                return Err(ConflictingDefinition::DuplicateColumn {
                    table: name.clone(),
                    column: col_def.name.clone(),
                    version: version.clone(),
                });
            }
            seen_in_unit.push(&col_def.name);

            let sql_type = SqlType::parse(&col_def.sql_type);
            let key = (name.clone(), col_def.name.clone());

            match table.columns.iter_mut().find(|c| c.name == col_def.name) {
                Some(existing) => {
                    if existing.sql_type != sql_type {
                        let existing_version = column_origin
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| "<unknown>".into());
                        return Err(ConflictingDefinition::ColumnType {
                            table: name.clone(),
                            column: col_def.name.clone(),
                            existing: existing.sql_type.clone(),
                            existing_version,
                            conflicting: sql_type,
                            version: version.clone(),
                        });
                    }
                    // Nullability, default and check may be amended later;
                    // those are reconcilable live, a type is not.
                    existing.nullable = col_def.nullable;
                    existing.default_expr = col_def.default.clone();
                    existing.check = col_def.check.clone();
                }
                None => {
                    column_origin.insert(key, version.clone());
                    table.columns.push(ColumnSpec {
                        name: col_def.name.clone(),
                        sql_type,
                        nullable: col_def.nullable,
                        default_expr: col_def.default.clone(),
                        check: col_def.check.clone(),
                    });
                }
            }
        }
    }

    for idx in &unit.indexes {
        let spec = IndexSpec {
            name: idx.name.clone(),
            table: idx.table.clone(),
            columns: idx.columns.clone(),
            unique: idx.unique,
        };
        match model.indexes.get(&idx.name) {
            Some(existing) if *existing != spec => {
                return Err(ConflictingDefinition::Redefined {
                    kind: "index",
                    name: idx.name.clone(),
                    version: version.clone(),
                });
            }
            _ => {
                model.indexes.insert(idx.name.clone(), spec);
            }
        }
    }

    for pol in &unit.policies {
        let spec = PolicySpec {
            name: pol.name.clone(),
            table: pol.table.clone(),
            command: pol.command,
            using_expr: pol.using.clone(),
            check_expr: pol.check.clone(),
        };
        match model.policies.get(&pol.name) {
            Some(existing) if *existing != spec => {
                return Err(ConflictingDefinition::Redefined {
                    kind: "policy",
                    name: pol.name.clone(),
                    version: version.clone(),
                });
            }
            _ => {
                model.policies.insert(pol.name.clone(), spec);
            }
        }
    }

    Ok(())
}

/// Whether `needle` appears within `haystack` in order (not necessarily
/// contiguously).
fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut it = haystack.iter();
    needle.iter().all(|n| it.any(|h| h == n))
}

fn first_duplicate(labels: &[String]) -> Option<&String> {
    labels
        .iter()
        .enumerate()
        .find(|(i, label)| labels[..*i].contains(label))
        .map(|(_, label)| label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(version: &str, json: serde_json::Value) -> DefinitionUnit {
        let mut obj = json;
        obj["version"] = serde_json::Value::String(version.to_string());
        serde_json::from_value(obj).unwrap()
    }

    #[test]
    fn test_fold_single_unit() {
        let u = unit(
            "0001",
            serde_json::json!({
                "enums": { "project_status": ["draft", "active"] },
                "tables": {
                    "projects": {
                        "columns": [
                            { "name": "id", "type": "uuid", "nullable": false },
                            { "name": "title", "type": "text" },
                            { "name": "status", "type": "project_status",
                              "nullable": false, "default": "'draft'" }
                        ],
                        "rls": true
                    }
                },
                "extensions": ["pgcrypto"]
            }),
        );

        let desired = load_units(vec![u], "public").unwrap();
        let model = &desired.model;

        assert_eq!(desired.versions, vec!["0001"]);
        assert_eq!(model.enums["project_status"].labels, vec!["draft", "active"]);

        let projects = &model.tables["projects"];
        assert_eq!(projects.columns.len(), 3);
        assert!(!projects.column("id").unwrap().nullable);
        assert!(projects.column("title").unwrap().nullable);
        assert!(projects.rls_enabled);
        assert!(model.extensions.contains("pgcrypto"));
    }

    #[test]
    fn test_later_unit_adds_columns_and_labels() {
        let u1 = unit(
            "0001",
            serde_json::json!({
                "enums": { "project_status": ["draft", "active"] },
                "tables": { "projects": { "columns": [
                    { "name": "id", "type": "uuid", "nullable": false }
                ]}}
            }),
        );
        let u2 = unit(
            "0002",
            serde_json::json!({
                "enums": { "project_status": ["draft", "active", "archived"] },
                "tables": { "projects": { "columns": [
                    { "name": "archived_at", "type": "timestamptz" }
                ]}}
            }),
        );

        let desired = load_units(vec![u1, u2], "public").unwrap();
        let model = &desired.model;

        assert_eq!(
            model.enums["project_status"].labels,
            vec!["draft", "active", "archived"]
        );
        assert_eq!(model.tables["projects"].columns.len(), 2);
        assert_eq!(desired.versions, vec!["0001", "0002"]);
    }

    #[test]
    fn test_conflicting_column_type_rejected() {
        let u1 = unit(
            "0001",
            serde_json::json!({
                "tables": { "projects": { "columns": [
                    { "name": "title", "type": "text" }
                ]}}
            }),
        );
        let u2 = unit(
            "0002",
            serde_json::json!({
                "tables": { "projects": { "columns": [
                    { "name": "title", "type": "varchar(50)" }
                ]}}
            }),
        );

        let err = load_units(vec![u1, u2], "public").unwrap_err();
        match err {
            LoadError::Conflict(ConflictingDefinition::ColumnType {
                table,
                column,
                existing_version,
                version,
                ..
            }) => {
                assert_eq!(table, "projects");
                assert_eq!(column, "title");
                assert_eq!(existing_version, "0001");
                assert_eq!(version, "0002");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_type_different_spelling_is_not_conflict() {
        let u1 = unit(
            "0001",
            serde_json::json!({
                "tables": { "t": { "columns": [ { "name": "n", "type": "int4" } ]}}
            }),
        );
        let u2 = unit(
            "0002",
            serde_json::json!({
                "tables": { "t": { "columns": [
                    { "name": "n", "type": "integer", "nullable": false }
                ]}}
            }),
        );

        let desired = load_units(vec![u1, u2], "public").unwrap();
        // Later unit may tighten nullability in the desired state
        assert!(!desired.model.tables["t"].column("n").unwrap().nullable);
    }

    #[test]
    fn test_enum_label_removal_rejected() {
        let u1 = unit(
            "0001",
            serde_json::json!({ "enums": { "s": ["a", "b", "c"] } }),
        );
        let u2 = unit("0002", serde_json::json!({ "enums": { "s": ["a", "c"] } }));

        let err = load_units(vec![u1, u2], "public").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Conflict(ConflictingDefinition::EnumRewrite { .. })
        ));
    }

    #[test]
    fn test_enum_midlist_insertion_allowed_at_load() {
        let u1 = unit("0001", serde_json::json!({ "enums": { "s": ["a", "c"] } }));
        let u2 = unit(
            "0002",
            serde_json::json!({ "enums": { "s": ["a", "b", "c"] } }),
        );

        let desired = load_units(vec![u1, u2], "public").unwrap();
        assert_eq!(desired.model.enums["s"].labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_enum_label_rejected() {
        let u = unit("0001", serde_json::json!({ "enums": { "s": ["a", "b", "a"] } }));

        let err = load_units(vec![u], "public").unwrap_err();
        match err {
            LoadError::Conflict(ConflictingDefinition::DuplicateEnumLabel {
                name,
                label,
                version,
            }) => {
                assert_eq!(name, "s");
                assert_eq!(label, "a");
                assert_eq!(version, "0001");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_column_in_one_unit_rejected() {
        let u = unit(
            "0001",
            serde_json::json!({
                "tables": { "t": { "columns": [
                    { "name": "x", "type": "text" },
                    { "name": "x", "type": "text" }
                ]}}
            }),
        );

        let err = load_units(vec![u], "public").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Conflict(ConflictingDefinition::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_index_redefinition_rejected() {
        let u1 = unit(
            "0001",
            serde_json::json!({
                "indexes": [ { "name": "i", "table": "t", "columns": ["a"] } ]
            }),
        );
        let u2 = unit(
            "0002",
            serde_json::json!({
                "indexes": [ { "name": "i", "table": "t", "columns": ["b"] } ]
            }),
        );

        let err = load_units(vec![u1, u2], "public").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Conflict(ConflictingDefinition::Redefined { kind: "index", .. })
        ));
    }

    #[test]
    fn test_load_dir_applies_lexicographic_order() {
        let tmp = tempfile::tempdir().unwrap();
        // Written out of order on purpose
        std::fs::write(
            tmp.path().join("0002_more.json"),
            serde_json::json!({
                "version": "0002",
                "enums": { "s": ["a", "b"] }
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("0001_init.json"),
            serde_json::json!({
                "version": "0001",
                "enums": { "s": ["a"] }
            })
            .to_string(),
        )
        .unwrap();

        let desired = load_dir(tmp.path(), "public").unwrap();
        assert_eq!(desired.versions, vec!["0001", "0002"]);
        assert_eq!(desired.model.enums["s"].labels, vec!["a", "b"]);
    }

    #[test]
    fn test_load_dir_empty_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_dir(tmp.path(), "public"),
            Err(LoadError::Empty(_))
        ));
    }
}
