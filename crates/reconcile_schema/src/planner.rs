//! Diff planner.
//!
//! Computes the ordered operation list that moves a live schema to the
//! desired state. The planner only ever adds: drops of tables, columns or
//! enum labels are never planned automatically. Differences it cannot
//! express (a live enum whose labels would have to be removed or reordered)
//! are reported as `unplannable` instead of being guessed at.

use crate::model::{ColumnSpec, DesiredState, SchemaModel};
use crate::ops::{EnumPosition, OpId, PlannedOperation, ReconciliationOperation, RiskLevel};
use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use thiserror::Error;

/// Planner failures.
///
/// A dependency cycle should not occur given the emission rules, but it is
/// detected rather than silently ignored: a cycle means the definitions (or
/// the planner itself) are wrong, and executing a partial order would be
/// worse than stopping.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("dependency cycle between planned operations: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

/// The planner's output: dependency-ordered operations plus the differences
/// it refuses to plan.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Operations in execution order (topologically sorted)
    pub operations: Vec<PlannedOperation>,

    /// Live-vs-desired differences with no safe automatic expression,
    /// described for the operator verbatim
    pub unplannable: Vec<String>,
}

impl Plan {
    /// True when the live schema already matches the desired state.
    pub fn is_reconciled(&self) -> bool {
        self.operations.is_empty() && self.unplannable.is_empty()
    }
}

/// Compute the reconciliation plan from `current` to `desired`.
pub fn plan(current: &SchemaModel, desired: &DesiredState) -> Result<Plan, PlanError> {
    let mut builder = PlanBuilder::default();
    let target = &desired.model;

    plan_extensions(&mut builder, current, target);
    plan_enums(&mut builder, current, target);
    plan_tables(&mut builder, current, target);
    plan_indexes(&mut builder, current, target);
    plan_policies(&mut builder, current, target);

    let operations = order_operations(builder.operations)?;
    Ok(Plan {
        operations,
        unplannable: builder.unplannable,
    })
}

#[derive(Default)]
struct PlanBuilder {
    operations: Vec<PlannedOperation>,
    unplannable: Vec<String>,

    /// CreateEnum op per enum name
    enum_ops: HashMap<String, OpId>,
    /// AddEnumValue op per (enum, label)
    enum_value_ops: HashMap<(String, String), OpId>,
    /// CreateTable op per table name
    table_ops: HashMap<String, OpId>,
    /// EnableRowLevelSecurity op per table name
    rls_ops: HashMap<String, OpId>,
}

impl PlanBuilder {
    fn push(
        &mut self,
        op: ReconciliationOperation,
        depends_on: Vec<OpId>,
        risk: RiskLevel,
    ) -> OpId {
        let id = self.operations.len();
        self.operations.push(PlannedOperation {
            id,
            op,
            depends_on,
            risk,
        });
        id
    }

    /// Dependencies a column brings in: the enum type it uses and the enum
    /// label its default references, when either is created in this plan.
    fn column_deps(&self, column: &ColumnSpec, target: &SchemaModel) -> Vec<OpId> {
        let mut deps = Vec::new();
        let type_name = column.sql_type.base();

        if target.enums.contains_key(type_name) {
            if let Some(&id) = self.enum_ops.get(type_name) {
                deps.push(id);
            }
            if let Some(label) = default_enum_label(column) {
                if let Some(&id) = self
                    .enum_value_ops
                    .get(&(type_name.to_string(), label.to_string()))
                {
                    deps.push(id);
                }
            }
        }
        deps
    }
}

fn plan_extensions(builder: &mut PlanBuilder, current: &SchemaModel, target: &SchemaModel) {
    for ext in &target.extensions {
        if !current.extensions.contains(ext) {
            builder.push(
                ReconciliationOperation::CreateExtension { name: ext.clone() },
                Vec::new(),
                RiskLevel::Additive,
            );
        }
    }
}

fn plan_enums(builder: &mut PlanBuilder, current: &SchemaModel, target: &SchemaModel) {
    for (name, desired_enum) in &target.enums {
        let Some(live) = current.enums.get(name) else {
            let id = builder.push(
                ReconciliationOperation::CreateEnum {
                    spec: desired_enum.clone(),
                },
                Vec::new(),
                RiskLevel::Additive,
            );
            builder.enum_ops.insert(name.clone(), id);
            continue;
        };

        // The live labels must appear in the desired list, in order. If they
        // do not, reconciling would require removing or reordering labels,
        // which means a full type rebuild; that is never planned.
        if !is_subsequence(&live.labels, &desired_enum.labels) {
            builder.unplannable.push(format!(
                "enum {name}: live labels {:?} cannot be reconciled to {:?} without a type \
                 rebuild (labels can only be added, never removed or reordered)",
                live.labels, desired_enum.labels
            ));
            continue;
        }

        // Walk desired labels in order, emitting one AddEnumValue per label
        // missing live. A label is an append (additive) only if no live
        // label comes after it in the desired order.
        let last_live_pos = desired_enum
            .labels
            .iter()
            .rposition(|l| live.labels.contains(l));

        let mut prev_label: Option<&String> = None;
        let mut prev_added_op: Option<OpId> = None;
        for (pos, label) in desired_enum.labels.iter().enumerate() {
            if live.labels.contains(label) {
                prev_label = Some(label);
                prev_added_op = None;
                continue;
            }

            let appends_at_end = last_live_pos.map_or(true, |last| pos > last);
            let position = if appends_at_end {
                EnumPosition::Last
            } else if let Some(prev) = prev_label {
                EnumPosition::After(prev.clone())
            } else {
                // Inserting before the first live label. The subsequence
                // check above guarantees a live label follows, but fall back
                // to appending rather than panic.
                match desired_enum.labels[pos + 1..]
                    .iter()
                    .find(|l| live.labels.contains(*l))
                {
                    Some(next_live) => EnumPosition::Before(next_live.clone()),
                    None => EnumPosition::Last,
                }
            };

            let risk = if appends_at_end {
                RiskLevel::Additive
            } else {
                RiskLevel::Destructive
            };

            // Values added in this plan must land in desired order, so each
            // depends on the previously added one.
            let deps = prev_added_op.into_iter().collect();
            let id = builder.push(
                ReconciliationOperation::AddEnumValue {
                    enum_name: name.clone(),
                    value: label.clone(),
                    position,
                },
                deps,
                risk,
            );
            builder
                .enum_value_ops
                .insert((name.clone(), label.clone()), id);
            prev_label = Some(label);
            prev_added_op = Some(id);
        }
    }
}

fn plan_tables(builder: &mut PlanBuilder, current: &SchemaModel, target: &SchemaModel) {
    for (name, desired_table) in &target.tables {
        let Some(live) = current.tables.get(name) else {
            let mut deps = Vec::new();
            for column in &desired_table.columns {
                deps.extend(builder.column_deps(column, target));
            }
            deps.sort_unstable();
            deps.dedup();

            let id = builder.push(
                ReconciliationOperation::CreateTable {
                    spec: desired_table.clone(),
                },
                deps,
                RiskLevel::Additive,
            );
            builder.table_ops.insert(name.clone(), id);
            continue;
        };

        for desired_column in &desired_table.columns {
            match live.column(&desired_column.name) {
                None => {
                    let deps = builder.column_deps(desired_column, target);
                    // A NOT NULL add without a default fails on populated
                    // tables, so it needs explicit review.
                    let risk = if desired_column.nullable
                        || desired_column.default_expr.is_some()
                    {
                        RiskLevel::Additive
                    } else {
                        RiskLevel::Destructive
                    };
                    builder.push(
                        ReconciliationOperation::AddColumn {
                            table: name.clone(),
                            column: desired_column.clone(),
                        },
                        deps,
                        risk,
                    );
                }
                Some(live_column) => {
                    if live_column.sql_type != desired_column.sql_type {
                        let risk = if live_column
                            .sql_type
                            .is_widening_to(&desired_column.sql_type)
                        {
                            RiskLevel::Additive
                        } else {
                            RiskLevel::Destructive
                        };
                        builder.push(
                            ReconciliationOperation::AlterColumnType {
                                table: name.clone(),
                                column: desired_column.name.clone(),
                                from: live_column.sql_type.clone(),
                                to: desired_column.sql_type.clone(),
                                using_expr: None,
                            },
                            Vec::new(),
                            risk,
                        );
                    }

                    if live_column.nullable != desired_column.nullable {
                        // Loosening is safe; tightening can fail on existing
                        // NULLs and blocks writes while validating.
                        let risk = if desired_column.nullable {
                            RiskLevel::Additive
                        } else {
                            RiskLevel::Destructive
                        };
                        builder.push(
                            ReconciliationOperation::AlterColumnNullability {
                                table: name.clone(),
                                column: desired_column.name.clone(),
                                nullable: desired_column.nullable,
                            },
                            Vec::new(),
                            risk,
                        );
                    }
                }
            }
        }
    }
}

fn plan_indexes(builder: &mut PlanBuilder, current: &SchemaModel, target: &SchemaModel) {
    for (name, desired_index) in &target.indexes {
        if current.indexes.contains_key(name) {
            continue;
        }

        let table_exists = current.tables.contains_key(&desired_index.table);
        let deps: Vec<OpId> = builder
            .table_ops
            .get(&desired_index.table)
            .copied()
            .into_iter()
            .collect();

        // On an existing (possibly large, populated) table a plain CREATE
        // INDEX takes a blocking lock; build concurrently instead. A table
        // created in this same plan is empty, so plain is fine.
        builder.push(
            ReconciliationOperation::CreateIndex {
                spec: desired_index.clone(),
                concurrently: table_exists,
            },
            deps,
            RiskLevel::Additive,
        );
    }
}

fn plan_policies(builder: &mut PlanBuilder, current: &SchemaModel, target: &SchemaModel) {
    // Enable RLS where desired but not live
    for (name, desired_table) in &target.tables {
        if desired_table.rls_enabled && !current.rls_enabled(name) {
            let deps: Vec<OpId> = builder.table_ops.get(name).copied().into_iter().collect();
            let id = builder.push(
                ReconciliationOperation::EnableRowLevelSecurity { table: name.clone() },
                deps,
                RiskLevel::Additive,
            );
            builder.rls_ops.insert(name.clone(), id);
        }
    }

    for (name, desired_policy) in &target.policies {
        if current.policies.contains_key(name) {
            continue;
        }

        let mut deps = Vec::new();
        if let Some(&id) = builder.table_ops.get(&desired_policy.table) {
            deps.push(id);
        }
        if let Some(&id) = builder.rls_ops.get(&desired_policy.table) {
            deps.push(id);
        }

        builder.push(
            ReconciliationOperation::CreatePolicy {
                spec: desired_policy.clone(),
            },
            deps,
            RiskLevel::Additive,
        );
    }
}

/// Stable topological sort (Kahn's algorithm).
///
/// Ties are broken by emission order, so independent operations keep the
/// order the planner emitted them in and plans are deterministic.
fn order_operations(
    operations: Vec<PlannedOperation>,
) -> Result<Vec<PlannedOperation>, PlanError> {
    let n = operations.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<OpId>> = vec![Vec::new(); n];

    for op in &operations {
        for &dep in &op.depends_on {
            indegree[op.id] += 1;
            dependents[dep].push(op.id);
        }
    }

    let mut ready: BinaryHeap<Reverse<OpId>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| Reverse(id))
        .collect();

    let mut ordered = Vec::with_capacity(n);
    while let Some(Reverse(id)) = ready.pop() {
        ordered.push(operations[id].clone());
        for &next in &dependents[id] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if ordered.len() != n {
        let stuck = operations
            .iter()
            .filter(|op| indegree[op.id] > 0)
            .map(|op| op.summary())
            .collect();
        return Err(PlanError::DependencyCycle(stuck));
    }

    Ok(ordered)
}

/// Extract the enum label a column default references, if any.
///
/// Handles the spellings `'label'` and `'label'::type_name`.
fn default_enum_label(column: &ColumnSpec) -> Option<&str> {
    let expr = column.default_expr.as_deref()?.trim();
    let rest = expr.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    let after = rest[end + 1..].trim();
    if after.is_empty() || after.starts_with("::") {
        Some(&rest[..end])
    } else {
        None
    }
}

fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut it = haystack.iter();
    needle.iter().all(|n| it.any(|h| h == n))
}
