mod batch;
mod validate;

pub use batch::{BatchPipeline, Batches};
pub use validate::{Rejection, ValidationRules, Validator};

#[cfg(test)]
pub(crate) use validate::tests::ScriptDetector;
