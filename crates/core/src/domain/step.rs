use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::stage::{StageKind, StageRecordId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationStepId(pub String);

/// Roles that can sign a validation step. Role assignment itself is the
/// identity collaborator's problem; the core only compares role values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRole {
    FinancialOfficer,
    BudgetController,
    AdministrativeDirector,
    DirectorGeneral,
}

impl ApprovalRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalRole::FinancialOfficer => "financial_officer",
            ApprovalRole::BudgetController => "budget_controller",
            ApprovalRole::AdministrativeDirector => "administrative_director",
            ApprovalRole::DirectorGeneral => "director_general",
        }
    }

    pub fn parse(value: &str) -> Option<ApprovalRole> {
        match value {
            "financial_officer" => Some(ApprovalRole::FinancialOfficer),
            "budget_controller" => Some(ApprovalRole::BudgetController),
            "administrative_director" => Some(ApprovalRole::AdministrativeDirector),
            "director_general" => Some(ApprovalRole::DirectorGeneral),
            _ => None,
        }
    }
}

/// Ordered role circuit a stage record must clear. Engagements carry the
/// full chain; the later stages shorten it since the budget decision was
/// already taken upstream.
pub fn approval_circuit(kind: StageKind) -> &'static [ApprovalRole] {
    match kind {
        StageKind::Engagement => &[
            ApprovalRole::FinancialOfficer,
            ApprovalRole::BudgetController,
            ApprovalRole::AdministrativeDirector,
            ApprovalRole::DirectorGeneral,
        ],
        StageKind::Liquidation => &[
            ApprovalRole::FinancialOfficer,
            ApprovalRole::BudgetController,
            ApprovalRole::AdministrativeDirector,
        ],
        StageKind::Ordonnancement => &[
            ApprovalRole::FinancialOfficer,
            ApprovalRole::AdministrativeDirector,
            ApprovalRole::DirectorGeneral,
        ],
        StageKind::Reglement => {
            &[ApprovalRole::FinancialOfficer, ApprovalRole::BudgetController]
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Validated,
    Rejected,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Validated => "validated",
            StepStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<StepStatus> {
        match value {
            "pending" => Some(StepStatus::Pending),
            "validated" => Some(StepStatus::Validated),
            "rejected" => Some(StepStatus::Rejected),
            _ => None,
        }
    }
}

/// One approval step for a stage record. Steps for a record form a total
/// order 1..N and are created in bulk at submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStep {
    pub id: ValidationStepId,
    pub record_id: StageRecordId,
    pub position: usize,
    pub required_role: ApprovalRole,
    pub status: StepStatus,
    pub validated_by: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

impl ValidationStep {
    pub fn pending(
        id: ValidationStepId,
        record_id: StageRecordId,
        position: usize,
        required_role: ApprovalRole,
    ) -> Self {
        Self {
            id,
            record_id,
            position,
            required_role,
            status: StepStatus::Pending,
            validated_by: None,
            validated_at: None,
            comments: None,
        }
    }
}

/// Build the full pending step set for a freshly submitted record.
pub fn materialize_steps(
    record_id: &StageRecordId,
    kind: StageKind,
    mut next_id: impl FnMut() -> ValidationStepId,
) -> Vec<ValidationStep> {
    approval_circuit(kind)
        .iter()
        .enumerate()
        .map(|(index, role)| {
            ValidationStep::pending(next_id(), record_id.clone(), index + 1, *role)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{approval_circuit, materialize_steps, ApprovalRole, StepStatus, ValidationStepId};
    use crate::domain::stage::{StageKind, StageRecordId};

    #[test]
    fn engagement_circuit_ends_with_director_general() {
        let circuit = approval_circuit(StageKind::Engagement);
        assert_eq!(circuit.len(), 4);
        assert_eq!(circuit[0], ApprovalRole::FinancialOfficer);
        assert_eq!(circuit[3], ApprovalRole::DirectorGeneral);
    }

    #[test]
    fn materialized_steps_are_a_total_order_from_one() {
        let record_id = StageRecordId("ENG-1".to_owned());
        let mut counter = 0;
        let steps = materialize_steps(&record_id, StageKind::Liquidation, || {
            counter += 1;
            ValidationStepId(format!("VS-{counter}"))
        });

        assert_eq!(steps.len(), 3);
        for (index, step) in steps.iter().enumerate() {
            assert_eq!(step.position, index + 1);
            assert_eq!(step.status, StepStatus::Pending);
            assert_eq!(step.record_id, record_id);
        }
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            ApprovalRole::FinancialOfficer,
            ApprovalRole::BudgetController,
            ApprovalRole::AdministrativeDirector,
            ApprovalRole::DirectorGeneral,
        ] {
            assert_eq!(ApprovalRole::parse(role.as_str()), Some(role));
        }
    }
}
