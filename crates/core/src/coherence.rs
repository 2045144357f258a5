//! Cross-entity coherence rules.
//!
//! A fixed battery of read-only rules runs over a fiscal-year snapshot and
//! surfaces anomalies: broken links, ledger overruns, duplicate business
//! codes, negative amounts. Rules are independently callable and never
//! mutate the snapshot; a report is an immutable result of one run.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::activity::Activity;
use crate::domain::budget_line::BudgetLine;
use crate::domain::stage::{StageKind, StageRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyCode {
    ActiviteSansProgramme,
    ReferenceOrpheline,
    DepassementBudget,
    DoublonCode,
    MontantNegatif,
}

impl AnomalyCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyCode::ActiviteSansProgramme => "ACTIVITE_SANS_PROGRAMME",
            AnomalyCode::ReferenceOrpheline => "REFERENCE_ORPHELINE",
            AnomalyCode::DepassementBudget => "DEPASSEMENT_BUDGET",
            AnomalyCode::DoublonCode => "DOUBLON_CODE",
            AnomalyCode::MontantNegatif => "MONTANT_NEGATIF",
        }
    }
}

/// One finding: a typed, severity-tagged reference to an entity with an
/// explanatory message and numeric details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub code: AnomalyCode,
    pub severity: Severity,
    pub entity_kind: String,
    pub entity_id: String,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl Anomaly {
    fn new(
        code: AnomalyCode,
        severity: Severity,
        entity_kind: &str,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity,
            entity_kind: entity_kind.to_owned(),
            entity_id: entity_id.into(),
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_owned(), value.to_string());
        self
    }
}

/// Read-only view of one fiscal year's data, assembled by the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalSnapshot {
    pub fiscal_year: i32,
    pub activities: Vec<Activity>,
    pub lines: Vec<BudgetLine>,
    pub records: Vec<StageRecord>,
}

/// Immutable result of one full run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoherenceReport {
    pub fiscal_year: i32,
    pub generated_at: DateTime<Utc>,
    pub anomalies: Vec<Anomaly>,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl CoherenceReport {
    fn from_anomalies(fiscal_year: i32, anomalies: Vec<Anomaly>) -> Self {
        let errors = anomalies.iter().filter(|a| a.severity == Severity::Error).count();
        let warnings = anomalies.iter().filter(|a| a.severity == Severity::Warning).count();
        let infos = anomalies.iter().filter(|a| a.severity == Severity::Info).count();
        Self { fiscal_year, generated_at: Utc::now(), anomalies, errors, warnings, infos }
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Rule 1: activities missing their program attachment.
pub fn unlinked_activities(snapshot: &FiscalSnapshot) -> Vec<Anomaly> {
    snapshot
        .activities
        .iter()
        .filter(|activity| {
            activity.program_code.as_deref().map(str::trim).unwrap_or("").is_empty()
        })
        .map(|activity| {
            Anomaly::new(
                AnomalyCode::ActiviteSansProgramme,
                Severity::Warning,
                "activity",
                activity.id.0.clone(),
                format!("activity {} has no program attachment", activity.code),
            )
        })
        .collect()
}

/// Rule 2: stage records pointing at a missing predecessor or budget line.
pub fn orphan_references(snapshot: &FiscalSnapshot) -> Vec<Anomaly> {
    let line_ids: HashSet<&str> =
        snapshot.lines.iter().map(|line| line.id.0.as_str()).collect();
    let record_ids: HashSet<&str> =
        snapshot.records.iter().map(|record| record.id.0.as_str()).collect();

    let mut anomalies = Vec::new();
    for record in &snapshot.records {
        if !line_ids.contains(record.budget_line_id.0.as_str()) {
            anomalies.push(
                Anomaly::new(
                    AnomalyCode::ReferenceOrpheline,
                    Severity::Error,
                    "stage_record",
                    record.id.0.clone(),
                    format!(
                        "{} references missing budget line {}",
                        record.kind.as_str(),
                        record.budget_line_id.0
                    ),
                )
                .with_detail("budget_line_id", &record.budget_line_id.0),
            );
        }
        if let Some(predecessor) = &record.predecessor_id {
            if !record_ids.contains(predecessor.0.as_str()) {
                anomalies.push(
                    Anomaly::new(
                        AnomalyCode::ReferenceOrpheline,
                        Severity::Error,
                        "stage_record",
                        record.id.0.clone(),
                        format!(
                            "{} references missing predecessor {}",
                            record.kind.as_str(),
                            predecessor.0
                        ),
                    )
                    .with_detail("predecessor_id", &predecessor.0),
                );
            }
        }
    }
    anomalies
}

/// Rule 3: running engagement or liquidation totals above the dotation.
pub fn budget_overruns(snapshot: &FiscalSnapshot) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for line in &snapshot.lines {
        for (kind, total) in [
            (StageKind::Engagement, line.total_engage),
            (StageKind::Liquidation, line.total_liquide),
        ] {
            let depassement = total - line.dotation();
            if depassement > Decimal::ZERO {
                anomalies.push(
                    Anomaly::new(
                        AnomalyCode::DepassementBudget,
                        Severity::Error,
                        "budget_line",
                        line.id.0.clone(),
                        format!(
                            "line {}: {} total {} exceeds dotation {}",
                            line.code,
                            kind.as_str(),
                            total,
                            line.dotation()
                        ),
                    )
                    .with_detail("stage", kind.as_str())
                    .with_detail("depassement", depassement),
                );
            }
        }
    }
    anomalies
}

/// Rule 4: duplicate business codes within one fiscal year, across lines
/// and activities separately.
pub fn duplicate_codes(snapshot: &FiscalSnapshot) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    let mut line_codes: HashMap<(&str, i32), Vec<&str>> = HashMap::new();
    for line in &snapshot.lines {
        line_codes.entry((line.code.as_str(), line.fiscal_year)).or_default().push(&line.id.0);
    }
    let mut activity_codes: HashMap<(&str, i32), Vec<&str>> = HashMap::new();
    for activity in &snapshot.activities {
        activity_codes
            .entry((activity.code.as_str(), activity.fiscal_year))
            .or_default()
            .push(&activity.id.0);
    }

    for (entity_kind, codes) in [("budget_line", line_codes), ("activity", activity_codes)] {
        let mut groups: Vec<_> = codes.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
        groups.sort_by_key(|((code, year), _)| (code.to_owned(), *year));
        for ((code, year), ids) in groups {
            anomalies.push(
                Anomaly::new(
                    AnomalyCode::DoublonCode,
                    Severity::Warning,
                    entity_kind,
                    ids.join(","),
                    format!("code {code} appears {} times in fiscal year {year}", ids.len()),
                )
                .with_detail("code", code)
                .with_detail("count", ids.len()),
            );
        }
    }
    anomalies
}

/// Rule 5: negative monetary fields on budget lines. A negative opening
/// allotment is an error; a negative-adjusted dotation or total is only a
/// warning since transfers may legitimately pull a line down pending
/// regularization.
pub fn negative_amounts(snapshot: &FiscalSnapshot) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for line in &snapshot.lines {
        if line.dotation_initiale < Decimal::ZERO {
            anomalies.push(
                Anomaly::new(
                    AnomalyCode::MontantNegatif,
                    Severity::Error,
                    "budget_line",
                    line.id.0.clone(),
                    format!("line {}: negative opening allotment", line.code),
                )
                .with_detail("field", "dotation_initiale")
                .with_detail("value", line.dotation_initiale),
            );
        }
        for (field, value) in [
            ("dotation_modifiee", line.dotation_modifiee),
            ("total_engage", line.total_engage),
            ("total_liquide", line.total_liquide),
            ("total_ordonnance", line.total_ordonnance),
            ("total_paye", line.total_paye),
        ] {
            if value < Decimal::ZERO {
                anomalies.push(
                    Anomaly::new(
                        AnomalyCode::MontantNegatif,
                        Severity::Warning,
                        "budget_line",
                        line.id.0.clone(),
                        format!("line {}: negative {field}", line.code),
                    )
                    .with_detail("field", field)
                    .with_detail("value", value),
                );
            }
        }
    }
    anomalies
}

/// Run the full battery and bundle the findings.
pub fn generate_report(snapshot: &FiscalSnapshot) -> CoherenceReport {
    let mut anomalies = Vec::new();
    anomalies.extend(unlinked_activities(snapshot));
    anomalies.extend(orphan_references(snapshot));
    anomalies.extend(budget_overruns(snapshot));
    anomalies.extend(duplicate_codes(snapshot));
    anomalies.extend(negative_amounts(snapshot));
    CoherenceReport::from_anomalies(snapshot.fiscal_year, anomalies)
}

/// Fast pre-import gate: overrun rule only.
pub fn quick_check(snapshot: &FiscalSnapshot) -> CoherenceReport {
    CoherenceReport::from_anomalies(snapshot.fiscal_year, budget_overruns(snapshot))
}
