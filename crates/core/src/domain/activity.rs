use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

/// Planning-side activity. Carried here only for the coherence battery:
/// rule 1 flags activities that lost their program attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub fiscal_year: i32,
    pub code: String,
    pub label: String,
    pub program_code: Option<String>,
}
