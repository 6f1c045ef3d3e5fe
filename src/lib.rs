//! Concolic-execution constraint solving core.
//!
//! `symsolve` cooperates with a coverage-guided fuzzer: a tracer child
//! shadow-executes the current queue entry and streams every symbolic
//! branch it hits as nodes of a dataflow expression graph in shared
//! memory. For each branch whose negation would reach new coverage, the
//! driver lifts the relevant slice of the graph into a simplified DNF
//! formula, splits it into independent search tasks, and feeds those to a
//! sequence of solver back-ends; successful mutations flow back to the
//! fuzzer for validation.
//!
//! The host integrates through three callbacks on [`Driver`]:
//! [`Driver::fuzz_count`] (trace a queue entry, bound the mutation
//! count), [`Driver::fuzz`] (one solver step, maybe a mutation) and
//! [`Driver::queue_new_entry`] (confirm a surviving mutation).
//!
//! Everything here is single-threaded by design; run one driver per
//! fuzzer instance.

pub mod ast;
pub mod constraint;
pub mod cov;
pub mod driver;
pub mod formula;
pub mod label;
pub mod lifter;
pub mod pipe;
pub mod simplify;
pub mod solver;
pub mod stats;
pub mod tasks;

pub use ast::{AstKind, AstNode};
pub use constraint::{AtoiInfo, ConsMeta, Constraint, ConstraintRef, SearchTask, TaskRef};
pub use cov::{BranchContext, CovManager, EdgeCovManager};
pub use driver::{Driver, DriverOptions};
pub use label::{Label, LabelInfo, LabelTable};
pub use solver::{I2sSolver, Solver, SolverResult};
pub use stats::SolveStats;
pub use tasks::{FifoTaskManager, TaskManager};

/// Fatal setup and child-management failures. Per-branch problems (bad
/// labels, unknown opcodes, truncated streams) never surface here; they
/// are logged and the affected branch is dropped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SYMSOLVE_TARGET is not set")]
    MissingTarget,
    #[error("shared memory setup failed: {0}")]
    ShmSetup(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn tracer: {0}")]
    Spawn(#[from] nix::Error),
    #[error("tracer command contains a NUL byte")]
    BadTracerCommand,
}
