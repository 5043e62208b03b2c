//! Schema Reconciliation Core
//!
//! # Philosophy: Declare, Diff, Gate
//!
//! The schema lifecycle for a Searchmatic database:
//!
//! 1. **Declare**: versioned definition files describe the desired schema
//! 2. **Introspect**: the live catalog is read into the same model
//! 3. **Plan**: the diff planner computes the minimal ordered operation set
//! 4. **Gate**: destructive operations are withheld until acknowledged
//! 5. **Execute**: approved operations run in dependency order
//! 6. **Verify**: a fresh introspection must plan to an empty set
//!
//! There are NO silent drops and NO last-writer-wins merges. A definition
//! conflict is a failure, not a guess. A destructive change without an
//! explicit acknowledgment token stops the whole run.
//!
//! This crate is the pure half of the engine: no database connection, no IO
//! beyond reading definition files. The `reconcile_db` crate owns the live
//! side (introspection, advisory lock, execution).
//!
//! # Modules
//!
//! - [`model`]: schema model shared by loader and introspector
//! - [`loader`]: desired-state loader for versioned definition units
//! - [`ops`]: reconciliation operations and their SQL rendering
//! - [`planner`]: diff planner with dependency-ordered output
//! - [`gate`]: safety gate classifying additive vs destructive operations

pub mod gate;
pub mod loader;
pub mod model;
pub mod ops;
pub mod planner;

pub use gate::{check_acknowledgments, classify, Classification, UnacknowledgedDestructiveChange};
pub use loader::{load_dir, load_units, ConflictingDefinition, DefinitionUnit, LoadError};
pub use model::{
    ColumnSpec, DesiredState, EnumSpec, IndexSpec, PolicyCommand, PolicySpec, SchemaModel,
    SqlType, TableSpec,
};
pub use ops::{EnumPosition, OpId, PlannedOperation, ReconciliationOperation, RiskLevel};
pub use planner::{plan, Plan, PlanError};
