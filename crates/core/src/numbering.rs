use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::stage::StageKind;

/// Document families that draw numbers from the generator. One per stage
/// kind plus the dossier reference itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Engagement,
    Liquidation,
    Ordonnancement,
    Reglement,
    Dossier,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Engagement => "engagement",
            DocumentType::Liquidation => "liquidation",
            DocumentType::Ordonnancement => "ordonnancement",
            DocumentType::Reglement => "reglement",
            DocumentType::Dossier => "dossier",
        }
    }

    pub fn parse(value: &str) -> Option<DocumentType> {
        match value {
            "engagement" => Some(DocumentType::Engagement),
            "liquidation" => Some(DocumentType::Liquidation),
            "ordonnancement" => Some(DocumentType::Ordonnancement),
            "reglement" => Some(DocumentType::Reglement),
            "dossier" => Some(DocumentType::Dossier),
            _ => None,
        }
    }
}

impl From<StageKind> for DocumentType {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Engagement => DocumentType::Engagement,
            StageKind::Liquidation => DocumentType::Liquidation,
            StageKind::Ordonnancement => DocumentType::Ordonnancement,
            StageKind::Reglement => DocumentType::Reglement,
        }
    }
}

/// When the ordinal counter starts over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    #[default]
    PerFiscalYear,
    PerCalendarYear,
    Never,
}

/// Formatting template for one document family. Supplied by configuration;
/// formatting is pure so it can be tested apart from the atomic counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberTemplate {
    pub prefix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_sequence_width")]
    pub sequence_width: usize,
    #[serde(default)]
    pub reset_policy: ResetPolicy,
}

fn default_separator() -> String {
    "-".to_owned()
}

fn default_sequence_width() -> usize {
    4
}

impl NumberTemplate {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: default_separator(),
            sequence_width: default_sequence_width(),
            reset_policy: ResetPolicy::default(),
        }
    }

    pub fn default_for(doc_type: DocumentType) -> Self {
        let prefix = match doc_type {
            DocumentType::Engagement => "ENG",
            DocumentType::Liquidation => "LIQ",
            DocumentType::Ordonnancement => "ORD",
            DocumentType::Reglement => "REG",
            DocumentType::Dossier => "DOS",
        };
        Self::new(prefix)
    }

    /// The counter partition for a draw: the fiscal year, the calendar year,
    /// or a constant bucket when the counter never resets.
    pub fn period_for(&self, fiscal_year: i32) -> i32 {
        match self.reset_policy {
            ResetPolicy::PerFiscalYear => fiscal_year,
            ResetPolicy::PerCalendarYear => Utc::now().year(),
            ResetPolicy::Never => 0,
        }
    }

    /// Render the full code for an ordinal already drawn from the counter.
    pub fn format_code(&self, fiscal_year: i32, scope: Option<&str>, ordinal: i64) -> String {
        let sep = &self.separator;
        let mut code = self.prefix.clone();
        if self.reset_policy != ResetPolicy::Never {
            code.push_str(sep);
            code.push_str(&self.period_for(fiscal_year).to_string());
        }
        if let Some(scope) = scope {
            code.push_str(sep);
            code.push_str(scope);
        }
        code.push_str(sep);
        code.push_str(&format!("{:0width$}", ordinal, width = self.sequence_width));
        code
    }
}

/// Identity of one counter row: the tuple under which ordinals must be
/// dense and collision-free.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceKey {
    pub doc_type: DocumentType,
    pub period: i32,
    pub scope: Option<String>,
}

impl SequenceKey {
    pub fn new(doc_type: DocumentType, period: i32, scope: Option<String>) -> Self {
        Self { doc_type, period, scope }
    }

    /// Scope column value; counters without a scope share one bucket.
    pub fn scope_column(&self) -> &str {
        self.scope.as_deref().unwrap_or("")
    }
}
