//! Orchestration layer for budget execution.
//!
//! Services here wire the pure domain logic from `budgex-core` to the
//! repositories in `budgex-db`: drafting and submitting stage records,
//! driving approval circuits, numbering documents, rolling up execution
//! chains and running coherence sweeps.

pub mod coherence;
pub mod numbers;
pub mod recorder;
pub mod tracker;
pub mod workflow;

pub use coherence::CoherenceChecker;
pub use numbers::DocumentNumberService;
pub use recorder::{NewStageRecord, StageRecorder};
pub use tracker::DossierChainTracker;
pub use workflow::ValidationWorkflowEngine;
