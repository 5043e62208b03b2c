//! Operator-facing run reports.
//!
//! Each subcommand prints exactly one report to stdout, either as aligned
//! text or as pretty JSON with `--json`. Destructive operations always show
//! their acknowledgment token so the operator can copy it straight into
//! `apply --ack`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reconcile_db::{ExecutionOutcome, OperationOutcome};
use reconcile_schema::{Plan, PlannedOperation, RiskLevel};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

/// One planned operation, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedLine {
    pub id: usize,
    pub risk: RiskLevel,
    /// Acknowledgment token (content hash of the rendered DDL)
    pub token: String,
    pub summary: String,
    pub depends_on: Vec<usize>,
}

impl PlannedLine {
    fn from_op(op: &PlannedOperation) -> Self {
        Self {
            id: op.id,
            risk: op.risk,
            token: op.content_hash(),
            summary: op.summary(),
            depends_on: op.depends_on.clone(),
        }
    }
}

fn planned_lines(plan: &Plan) -> Vec<PlannedLine> {
    plan.operations.iter().map(PlannedLine::from_op).collect()
}

/// Report for `reconcile plan`.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub namespace: String,
    pub generated_at: DateTime<Utc>,
    pub reconciled: bool,
    pub operations: Vec<PlannedLine>,
    pub unplannable: Vec<String>,
}

impl PlanReport {
    pub fn from_plan(namespace: &str, plan: &Plan) -> Self {
        Self {
            namespace: namespace.to_string(),
            generated_at: Utc::now(),
            reconciled: plan.is_reconciled(),
            operations: planned_lines(plan),
            unplannable: plan.unplannable.clone(),
        }
    }

    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            print!("{}", self.render_text());
        }
        Ok(())
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        if self.reconciled {
            let _ = writeln!(out, "schema '{}' is reconciled, nothing to do", self.namespace);
            return out;
        }

        let destructive = self
            .operations
            .iter()
            .filter(|op| op.risk == RiskLevel::Destructive)
            .count();
        let _ = writeln!(
            out,
            "plan for schema '{}': {} operation(s), {} destructive",
            self.namespace,
            self.operations.len(),
            destructive
        );
        for op in &self.operations {
            let risk = op.risk.to_string();
            let _ = writeln!(out, "  [{:>3}] {:<11}  {}  {}", op.id, risk, op.token, op.summary);
        }
        render_unplannable(&mut out, &self.unplannable);
        out
    }
}

/// Report for `reconcile verify`.
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub namespace: String,
    pub checked_at: DateTime<Utc>,
    pub reconciled: bool,
    pub pending: Vec<PlannedLine>,
    pub unplannable: Vec<String>,
}

impl VerifyReport {
    pub fn from_plan(namespace: &str, plan: &Plan) -> Self {
        Self {
            namespace: namespace.to_string(),
            checked_at: Utc::now(),
            reconciled: plan.is_reconciled(),
            pending: planned_lines(plan),
            unplannable: plan.unplannable.clone(),
        }
    }

    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            print!("{}", self.render_text());
        }
        Ok(())
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        if self.reconciled {
            let _ = writeln!(out, "verification passed: schema '{}' matches the desired state", self.namespace);
            return out;
        }
        let _ = writeln!(
            out,
            "verification failed: schema '{}' has {} pending operation(s)",
            self.namespace,
            self.pending.len()
        );
        for op in &self.pending {
            let risk = op.risk.to_string();
            let _ = writeln!(out, "  [{:>3}] {:<11}  {}", op.id, risk, op.summary);
        }
        render_unplannable(&mut out, &self.unplannable);
        out
    }
}

/// Report for `reconcile apply`.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub namespace: String,
    pub finished_at: DateTime<Utc>,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    /// None when execution stopped early and verification never ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    pub operations: Vec<OperationOutcome>,
    pub unplannable: Vec<String>,
}

impl ApplyReport {
    pub fn new(
        namespace: &str,
        plan: &Plan,
        outcome: ExecutionOutcome,
        verified: Option<bool>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            finished_at: Utc::now(),
            applied: outcome.applied(),
            failed: outcome.failed(),
            skipped: outcome.skipped(),
            verified,
            operations: outcome.outcomes,
            unplannable: plan.unplannable.clone(),
        }
    }

    pub fn already_reconciled(namespace: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            finished_at: Utc::now(),
            applied: 0,
            failed: 0,
            skipped: 0,
            verified: Some(true),
            operations: Vec::new(),
            unplannable: Vec::new(),
        }
    }

    pub fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
        } else {
            print!("{}", self.render_text());
        }
        Ok(())
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {}: applied={} failed={} skipped={} verified={}",
            self.run_id,
            self.applied,
            self.failed,
            self.skipped,
            match self.verified {
                Some(true) => "yes",
                Some(false) => "no",
                None => "not-run",
            }
        );
        for op in &self.operations {
            let status = format!("{:?}", op.status).to_lowercase();
            let _ = writeln!(out, "  [{:>3}] {:<8}  {}", op.id, status, op.summary);
            if let Some(message) = &op.message {
                let _ = writeln!(out, "        {message}");
            }
        }
        render_unplannable(&mut out, &self.unplannable);
        out
    }
}

fn render_unplannable(out: &mut String, unplannable: &[String]) {
    if unplannable.is_empty() {
        return;
    }
    let _ = writeln!(out, "unplannable differences (manual intervention required):");
    for diff in unplannable {
        let _ = writeln!(out, "  - {diff}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_schema::{
        ColumnSpec, DesiredState, SchemaModel, SqlType, TableSpec,
    };

    fn sample_plan() -> Plan {
        let current = SchemaModel::new("public");
        let mut target = SchemaModel::new("public");
        target.tables.insert(
            "projects".into(),
            TableSpec::new(
                "projects",
                vec![
                    ColumnSpec::required("id", SqlType::parse("uuid")),
                    ColumnSpec::optional("title", SqlType::parse("text")),
                ],
            ),
        );
        reconcile_schema::plan(&current, &DesiredState::new(target)).unwrap()
    }

    #[test]
    fn test_plan_report_lists_tokens_and_summaries() {
        let plan = sample_plan();
        let report = PlanReport::from_plan("public", &plan);
        assert!(!report.reconciled);

        let text = report.render_text();
        assert!(text.contains("1 operation(s), 0 destructive"));
        assert!(text.contains("projects"));
        // Every line carries the 12-char acknowledgment token
        for op in &report.operations {
            assert_eq!(op.token.len(), 12);
            assert!(text.contains(&op.token));
        }
    }

    #[test]
    fn test_plan_report_shows_safe_ops_alongside_destructive() {
        // When apply withholds a plan over missing acknowledgments, this
        // report is what the operator sees: every operation, safe ones
        // included, with the destructive token to re-run with.
        let mut current = SchemaModel::new("public");
        current.tables.insert(
            "projects".into(),
            TableSpec::new(
                "projects",
                vec![ColumnSpec::optional("title", SqlType::parse("text"))],
            ),
        );
        let mut target = current.clone();
        let projects = target.tables.get_mut("projects").unwrap();
        projects.columns[0].sql_type = SqlType::varchar(50);
        projects
            .columns
            .push(ColumnSpec::optional("notes", SqlType::parse("text")));
        let plan =
            reconcile_schema::plan(&current, &DesiredState::new(target)).unwrap();

        let report = PlanReport::from_plan("public", &plan);
        let text = report.render_text();
        assert!(text.contains("2 operation(s), 1 destructive"));
        assert!(text.contains("add column projects.notes"));
        assert!(text.contains("alter column projects.title"));

        let destructive = report
            .operations
            .iter()
            .find(|o| o.risk == RiskLevel::Destructive)
            .unwrap();
        assert!(text.contains(&destructive.token));
    }

    #[test]
    fn test_plan_report_reconciled_text() {
        let report = PlanReport::from_plan("public", &Plan::default());
        assert!(report.reconciled);
        assert!(report.render_text().contains("nothing to do"));
    }

    #[test]
    fn test_plan_report_serializes_to_json() {
        let plan = sample_plan();
        let report = PlanReport::from_plan("public", &plan);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["namespace"], "public");
        assert_eq!(json["operations"].as_array().unwrap().len(), 1);
        assert_eq!(json["operations"][0]["risk"], "additive");
    }

    #[test]
    fn test_verify_report_failure_lists_pending() {
        let plan = sample_plan();
        let report = VerifyReport::from_plan("public", &plan);
        let text = report.render_text();
        assert!(text.contains("verification failed"));
        assert!(text.contains("1 pending operation(s)"));
    }

    #[test]
    fn test_apply_report_already_reconciled() {
        let report = ApplyReport::already_reconciled("public");
        assert_eq!(report.verified, Some(true));
        let text = report.render_text();
        assert!(text.contains("applied=0"));
        assert!(text.contains("verified=yes"));
    }

    #[test]
    fn test_unplannable_rendered_in_all_reports() {
        let mut plan = sample_plan();
        plan.unplannable
            .push("enum 'status': live labels [a, b] are not a prefix of desired [b, a]".into());

        let text = PlanReport::from_plan("public", &plan).render_text();
        assert!(text.contains("manual intervention required"));
        assert!(text.contains("enum 'status'"));
    }
}
