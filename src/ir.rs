use crate::pipeline::Rejection;

/// One data row after column extraction. Disabled columns are empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based row number in the sheet.
    pub row_number: usize,
    pub source_doc_id: String,
    pub source_text: String,
    pub target_doc_id: String,
    pub target_text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanedPair {
    pub row_number: usize,
    pub source_doc_id: String,
    pub target_doc_id: String,
    pub source_sentence: String,
    pub target_sentence: String,
}

/// A pair that passed every validation rule.
pub type ValidPair = CleanedPair;

#[derive(Clone, Debug, PartialEq)]
pub struct InvalidPair {
    pub pair: CleanedPair,
    pub reason: Rejection,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub valid: Vec<ValidPair>,
    pub invalid: Vec<InvalidPair>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.valid.is_empty() && self.invalid.is_empty()
    }
}

pub const NOT_AVAILABLE: &str = "N/A";
pub const NO_RESULT_MARKER: &str = "AI_NO_RESULT_OR_ERROR";

/// One nominalization reported by the analysis model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub structure: String,
    pub structure_type: String,
    pub technique: String,
}

impl Finding {
    /// Row emitted for a pair that produced no findings or whose analysis failed.
    pub fn placeholder() -> Self {
        Self {
            structure: NO_RESULT_MARKER.to_string(),
            structure_type: NOT_AVAILABLE.to_string(),
            technique: NOT_AVAILABLE.to_string(),
        }
    }
}
