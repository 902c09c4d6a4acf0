//! Per-pair nominalization analysis: prompt rendering, the chat client, and response
//! normalization.

mod client;
mod findings;
pub mod prompts;
mod trace;

use crate::ir::{Finding, ValidPair};

pub use client::{chat_url, with_retries, ChatAnalyzer, RETRY_BACKOFF};
pub use findings::{extract_json_array, parse_findings};
pub use prompts::PromptTemplate;
pub use trace::TraceWriter;

/// Analyzes one valid pair. An empty result means the model reported nothing.
pub trait Analyzer {
    fn analyze(&self, pair: &ValidPair) -> anyhow::Result<Vec<Finding>>;
}

impl<A: Analyzer + ?Sized> Analyzer for &A {
    fn analyze(&self, pair: &ValidPair) -> anyhow::Result<Vec<Finding>> {
        (**self).analyze(pair)
    }
}
