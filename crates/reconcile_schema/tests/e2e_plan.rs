//! End-to-end pure pipeline: definition files -> desired state -> plan -> gate.

use reconcile_schema::{
    check_acknowledgments, classify, load_dir, plan, ColumnSpec, DesiredState,
    ReconciliationOperation, SchemaModel, SqlType, TableSpec,
};

fn write_definitions(dir: &std::path::Path) {
    std::fs::write(
        dir.join("0001_init.json"),
        serde_json::json!({
            "version": "0001",
            "extensions": ["pgcrypto"],
            "enums": { "project_status": ["draft", "active"] },
            "tables": {
                "projects": {
                    "columns": [
                        { "name": "id", "type": "uuid", "nullable": false,
                          "default": "gen_random_uuid()" },
                        { "name": "title", "type": "text" },
                        { "name": "status", "type": "project_status",
                          "nullable": false, "default": "'draft'" }
                    ],
                    "rls": true
                }
            },
            "policies": [
                { "name": "projects_owner", "table": "projects",
                  "command": "select", "using": "owner_id = current_user_id()" }
            ]
        })
        .to_string(),
    )
    .unwrap();

    std::fs::write(
        dir.join("0002_archive.json"),
        serde_json::json!({
            "version": "0002",
            "enums": { "project_status": ["draft", "active", "archived"] },
            "tables": {
                "projects": {
                    "columns": [
                        { "name": "archived_at", "type": "timestamptz" }
                    ]
                }
            },
            "indexes": [
                { "name": "idx_projects_status", "table": "projects",
                  "columns": ["status"] }
            ]
        })
        .to_string(),
    )
    .unwrap();
}

#[test]
fn fresh_database_plans_everything_additive() {
    let tmp = tempfile::tempdir().unwrap();
    write_definitions(tmp.path());

    let desired = load_dir(tmp.path(), "public").unwrap();
    let current = SchemaModel::new("public");

    let plan = plan(&current, &desired).unwrap();
    assert!(!plan.is_reconciled());
    assert!(plan.unplannable.is_empty());

    // extension, enum, table, index, rls, policy
    let kinds: Vec<&str> = plan.operations.iter().map(|o| o.op.kind()).collect();
    assert!(kinds.contains(&"create_extension"));
    assert!(kinds.contains(&"create_enum"));
    assert!(kinds.contains(&"create_table"));
    assert!(kinds.contains(&"create_index"));
    assert!(kinds.contains(&"enable_row_level_security"));
    assert!(kinds.contains(&"create_policy"));

    // Everything is additive on a fresh database, so no acks are needed
    let classification = classify(&plan.operations);
    assert!(!classification.has_destructive());
    assert!(check_acknowledgments(&classification, &[]).is_ok());

    // The enum must precede the table that uses it
    let enum_pos = kinds.iter().position(|k| *k == "create_enum").unwrap();
    let table_pos = kinds.iter().position(|k| *k == "create_table").unwrap();
    assert!(enum_pos < table_pos);
}

#[test]
fn partially_migrated_database_plans_only_the_remainder() {
    let tmp = tempfile::tempdir().unwrap();
    write_definitions(tmp.path());
    let desired = load_dir(tmp.path(), "public").unwrap();

    // Live schema matches version 0001 plus its policy/index state, but not
    // the 0002 additions.
    let mut current = SchemaModel::new("public");
    current.extensions.insert("pgcrypto".into());
    current.enums.insert(
        "project_status".into(),
        reconcile_schema::EnumSpec::new("project_status", vec!["draft", "active"]),
    );
    let mut projects = TableSpec::new(
        "projects",
        vec![
            ColumnSpec::required("id", SqlType::parse("uuid"))
                .with_default("gen_random_uuid()"),
            ColumnSpec::optional("title", SqlType::parse("text")),
            ColumnSpec::required("status", SqlType::parse("project_status"))
                .with_default("'draft'"),
        ],
    );
    projects.rls_enabled = true;
    current.tables.insert("projects".into(), projects);
    current.policies.insert(
        "projects_owner".into(),
        desired.model.policies["projects_owner"].clone(),
    );

    let plan = plan(&current, &desired).unwrap();
    let kinds: Vec<&str> = plan.operations.iter().map(|o| o.op.kind()).collect();
    assert_eq!(kinds, vec!["add_enum_value", "add_column", "create_index"]);

    // Index on the pre-existing table is built concurrently
    assert!(matches!(
        plan.operations[2].op,
        ReconciliationOperation::CreateIndex { concurrently: true, .. }
    ));
}

#[test]
fn reconciled_database_plans_empty() {
    let tmp = tempfile::tempdir().unwrap();
    write_definitions(tmp.path());
    let desired = load_dir(tmp.path(), "public").unwrap();

    // A live schema identical to the desired model plans to nothing; this is
    // exactly what the verifier checks after an apply.
    let current = desired.model.clone();
    let plan = plan(&current, &DesiredState::new(current.clone())).unwrap();
    assert!(plan.is_reconciled());

    let plan2 = plan_against(&current, &desired);
    assert!(plan2.is_reconciled());
}

fn plan_against(
    current: &SchemaModel,
    desired: &reconcile_schema::DesiredState,
) -> reconcile_schema::Plan {
    plan(current, desired).unwrap()
}
