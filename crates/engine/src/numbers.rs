use std::sync::Arc;

use budgex_core::config::NumberingConfig;
use budgex_core::numbering::{DocumentType, SequenceKey};
use budgex_core::CoreError;
use budgex_db::repositories::SequenceRepository;

/// Hands out official document numbers.
///
/// The counter draw and the formatting are separate concerns: the
/// repository guarantees dense, duplicate-free ordinals per
/// (type, period, scope) tuple; the template turns an ordinal into the
/// printable code.
pub struct DocumentNumberService {
    sequences: Arc<dyn SequenceRepository>,
    numbering: NumberingConfig,
}

impl DocumentNumberService {
    pub fn new(sequences: Arc<dyn SequenceRepository>, numbering: NumberingConfig) -> Self {
        Self { sequences, numbering }
    }

    /// Draw the next ordinal for this document type and render the code,
    /// e.g. `ENG-2026-0042` or `ORD-2026-DAF-0007` when scoped.
    pub async fn assign(
        &self,
        doc_type: DocumentType,
        fiscal_year: i32,
        scope: Option<&str>,
    ) -> Result<String, CoreError> {
        let template = self.numbering.template_for(doc_type);
        let key = SequenceKey::new(
            doc_type,
            template.period_for(fiscal_year),
            scope.map(str::to_owned),
        );
        let ordinal = self.sequences.next_ordinal(&key).await?;
        let code = template.format_code(fiscal_year, scope, ordinal);
        tracing::debug!(doc_type = doc_type.as_str(), fiscal_year, ordinal, code, "assigned number");
        Ok(code)
    }
}
