//! Live-schema introspection.
//!
//! Reads one namespace's tables, columns, enum types, indexes and
//! row-level-security state into a [`SchemaModel`]. All queries run inside a
//! single `REPEATABLE READ, READ ONLY` transaction so concurrent DDL
//! elsewhere cannot produce an inconsistent partial view.
//!
//! Any catalog query failure (most commonly insufficient privilege on the
//! system catalogs) is fatal and surfaces as [`DbError::Introspection`]
//! before any planning happens.

use crate::error::{DbError, Result};
use reconcile_schema::{
    ColumnSpec, EnumSpec, IndexSpec, PolicyCommand, PolicySpec, SchemaModel, SqlType, TableSpec,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

/// Introspect the live schema of one namespace.
pub async fn introspect(pool: &PgPool, namespace: &str) -> Result<SchemaModel> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await?;

    let mut model = SchemaModel::new(namespace);

    load_tables(&mut tx, namespace, &mut model).await?;
    load_columns(&mut tx, namespace, &mut model).await?;
    load_enums(&mut tx, namespace, &mut model).await?;
    load_indexes(&mut tx, namespace, &mut model).await?;
    load_policies(&mut tx, namespace, &mut model).await?;
    load_extensions(&mut tx, &mut model).await?;

    // Read-only snapshot; nothing to commit.
    tx.rollback().await?;

    debug!(
        namespace,
        tables = model.tables.len(),
        enums = model.enums.len(),
        "Introspection complete"
    );
    Ok(model)
}

type PgTx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

async fn load_tables(tx: &mut PgTx<'_>, namespace: &str, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT c.relname AS table_name, c.relrowsecurity AS rls
           FROM pg_class c
           JOIN pg_namespace n ON n.oid = c.relnamespace
           WHERE n.nspname = $1 AND c.relkind = 'r'
           ORDER BY c.relname"#,
    )
    .bind(namespace)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DbError::introspection(format!("cannot enumerate tables: {e}")))?;

    for row in rows {
        let name: String = row.try_get("table_name")?;
        let rls: bool = row.try_get("rls")?;
        let mut table = TableSpec::new(name.clone(), Vec::new());
        table.rls_enabled = rls;
        model.tables.insert(name, table);
    }
    Ok(())
}

async fn load_columns(tx: &mut PgTx<'_>, namespace: &str, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT c.table_name, c.column_name, c.data_type, c.udt_name,
                  c.is_nullable, c.column_default,
                  c.character_maximum_length, c.numeric_precision, c.numeric_scale
           FROM information_schema.columns c
           WHERE c.table_schema = $1
           ORDER BY c.table_name, c.ordinal_position"#,
    )
    .bind(namespace)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DbError::introspection(format!("cannot enumerate columns: {e}")))?;

    for row in rows {
        let table_name: String = row.try_get("table_name")?;
        let Some(table) = model.tables.get_mut(&table_name) else {
            // Column of a view or foreign table; not reconciled.
            continue;
        };

        let name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        let udt_name: String = row.try_get("udt_name")?;
        let is_nullable: String = row.try_get("is_nullable")?;
        let default_expr: Option<String> = row.try_get("column_default")?;
        let char_len: Option<i32> = row.try_get("character_maximum_length")?;
        let num_precision: Option<i32> = row.try_get("numeric_precision")?;
        let num_scale: Option<i32> = row.try_get("numeric_scale")?;

        let sql_type = catalog_type(&data_type, &udt_name, char_len, num_precision, num_scale);

        table.columns.push(ColumnSpec {
            name,
            sql_type,
            nullable: is_nullable == "YES",
            default_expr,
            check: None,
        });
    }
    Ok(())
}

/// Map the information_schema type spelling back to a normalized [`SqlType`].
fn catalog_type(
    data_type: &str,
    udt_name: &str,
    char_len: Option<i32>,
    num_precision: Option<i32>,
    num_scale: Option<i32>,
) -> SqlType {
    match data_type {
        // Enums and other user types surface by their udt name
        "USER-DEFINED" => SqlType::parse(udt_name),
        "character varying" | "character" => match char_len {
            Some(len) => SqlType::parse(&format!("{data_type}({len})")),
            None => SqlType::parse(data_type),
        },
        "numeric" => match (num_precision, num_scale) {
            (Some(p), Some(s)) => SqlType::parse(&format!("numeric({p},{s})")),
            _ => SqlType::parse("numeric"),
        },
        "ARRAY" => SqlType::parse(&format!("{}[]", udt_name.trim_start_matches('_'))),
        other => SqlType::parse(other),
    }
}

async fn load_enums(tx: &mut PgTx<'_>, namespace: &str, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT t.typname AS enum_name, e.enumlabel AS label
           FROM pg_type t
           JOIN pg_enum e ON e.enumtypid = t.oid
           JOIN pg_namespace n ON n.oid = t.typnamespace
           WHERE n.nspname = $1
           ORDER BY t.typname, e.enumsortorder"#,
    )
    .bind(namespace)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DbError::introspection(format!("cannot enumerate enum types: {e}")))?;

    for row in rows {
        let enum_name: String = row.try_get("enum_name")?;
        let label: String = row.try_get("label")?;
        model
            .enums
            .entry(enum_name.clone())
            .or_insert_with(|| EnumSpec {
                name: enum_name,
                labels: Vec::new(),
            })
            .labels
            .push(label);
    }
    Ok(())
}

async fn load_indexes(tx: &mut PgTx<'_>, namespace: &str, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT indexname, tablename
           FROM pg_indexes
           WHERE schemaname = $1
           ORDER BY indexname"#,
    )
    .bind(namespace)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DbError::introspection(format!("cannot enumerate indexes: {e}")))?;

    for row in rows {
        let name: String = row.try_get("indexname")?;
        let table: String = row.try_get("tablename")?;
        // The planner diffs indexes by name presence; column details of live
        // indexes are not needed.
        model.indexes.insert(
            name.clone(),
            IndexSpec {
                name,
                table,
                columns: Vec::new(),
                unique: false,
            },
        );
    }
    Ok(())
}

async fn load_policies(tx: &mut PgTx<'_>, namespace: &str, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query(
        r#"SELECT policyname, tablename, cmd, qual, with_check
           FROM pg_policies
           WHERE schemaname = $1
           ORDER BY policyname"#,
    )
    .bind(namespace)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| DbError::introspection(format!("cannot enumerate policies: {e}")))?;

    for row in rows {
        let name: String = row.try_get("policyname")?;
        let table: String = row.try_get("tablename")?;
        let cmd: Option<String> = row.try_get("cmd")?;
        let using_expr: Option<String> = row.try_get("qual")?;
        let check_expr: Option<String> = row.try_get("with_check")?;

        let command = cmd
            .as_deref()
            .and_then(PolicyCommand::parse)
            .unwrap_or(PolicyCommand::All);

        model.policies.insert(
            name.clone(),
            PolicySpec {
                name,
                table,
                command,
                using_expr,
                check_expr,
            },
        );
    }
    Ok(())
}

async fn load_extensions(tx: &mut PgTx<'_>, model: &mut SchemaModel) -> Result<()> {
    let rows = sqlx::query("SELECT extname FROM pg_extension ORDER BY extname")
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DbError::introspection(format!("cannot enumerate extensions: {e}")))?;

    for row in rows {
        let name: String = row.try_get("extname")?;
        model.extensions.insert(name);
    }
    Ok(())
}
