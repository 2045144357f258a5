pub mod audit;
pub mod coherence;
pub mod config;
pub mod domain;
pub mod errors;
pub mod numbering;
pub mod workflow;

pub use audit::{ActionEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use coherence::{
    Anomaly, AnomalyCode, CoherenceReport, FiscalSnapshot, Severity,
};
pub use domain::activity::{Activity, ActivityId};
pub use domain::budget_line::{AvailabilityCheck, BudgetLine, BudgetLineId, WaterfallRow};
pub use domain::dossier::{Dossier, DossierId};
pub use domain::stage::{DeferralInfo, StageKind, StageRecord, StageRecordId, StageStatus};
pub use domain::step::{ApprovalRole, StepStatus, ValidationStep, ValidationStepId};
pub use errors::CoreError;
pub use numbering::{DocumentType, NumberTemplate, ResetPolicy, SequenceKey};
pub use workflow::{WorkflowEvent, WorkflowState, WorkflowTransitionError};
