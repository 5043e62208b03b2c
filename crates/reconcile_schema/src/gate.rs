//! Safety gate.
//!
//! Planned operations pass through here before anything touches the
//! database. Additive operations go straight through; destructive ones are
//! withheld unless the caller supplies an acknowledgment token matching the
//! operation's content hash. Matching on the hash, not an index or a name,
//! means an acknowledgment can never approve a different operation than the
//! one that was reviewed.

use crate::ops::PlannedOperation;
use std::fmt;

/// The gate's partition of a plan. Order within each partition is the plan
/// order; the gate never reorders.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub safe: Vec<PlannedOperation>,
    pub destructive: Vec<PlannedOperation>,
}

impl Classification {
    pub fn has_destructive(&self) -> bool {
        !self.destructive.is_empty()
    }
}

/// Partition operations by risk.
pub fn classify(operations: &[PlannedOperation]) -> Classification {
    let mut classification = Classification::default();
    for op in operations {
        if op.is_destructive() {
            classification.destructive.push(op.clone());
        } else {
            classification.safe.push(op.clone());
        }
    }
    classification
}

/// A destructive operation was planned without a matching acknowledgment.
///
/// The run stops with zero operations executed; the error lists exactly
/// which operations need review and the token to acknowledge each one with.
#[derive(Debug, Clone)]
pub struct UnacknowledgedDestructiveChange {
    /// (token, summary) per unacknowledged operation, in plan order
    pub missing: Vec<(String, String)>,
}

impl fmt::Display for UnacknowledgedDestructiveChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} destructive operation(s) require acknowledgment; re-run with --ack <token>:",
            self.missing.len()
        )?;
        for (token, summary) in &self.missing {
            writeln!(f, "  {token}  {summary}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UnacknowledgedDestructiveChange {}

/// Check that every destructive operation carries an acknowledgment.
pub fn check_acknowledgments(
    classification: &Classification,
    acks: &[String],
) -> Result<(), UnacknowledgedDestructiveChange> {
    let missing: Vec<(String, String)> = classification
        .destructive
        .iter()
        .filter_map(|op| {
            let token = op.content_hash();
            if acks.iter().any(|a| a == &token) {
                None
            } else {
                Some((token, op.summary()))
            }
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(UnacknowledgedDestructiveChange { missing })
    }
}
