use crate::config::AppConfig;
use crate::ir::{Batch, CleanedPair, InvalidPair, RawRow, ValidPair};
use crate::lang::LanguageDetector;
use crate::textutil::clean_sentence;

use super::validate::{ValidationRules, Validator};

/// Cleans, validates and batches rows. Holds no per-file state; every call to
/// [`BatchPipeline::batches`] starts a fresh single pass.
#[derive(Clone)]
pub struct BatchPipeline<'d> {
    validator: Validator<'d>,
    batch_size: usize,
}

impl<'d> BatchPipeline<'d> {
    /// `batch_size` is the number of valid pairs per batch; zero is treated as one.
    pub fn new(
        rules: ValidationRules,
        detector: &'d dyn LanguageDetector,
        batch_size: usize,
    ) -> Self {
        Self {
            validator: Validator::new(rules, detector),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(cfg: &AppConfig, detector: &'d dyn LanguageDetector) -> Self {
        Self::new(
            ValidationRules::from_config(cfg),
            detector,
            cfg.processing.batch_size,
        )
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn validator(&self) -> &Validator<'d> {
        &self.validator
    }

    pub fn classify(&self, raw: RawRow) -> Result<ValidPair, InvalidPair> {
        let pair = CleanedPair {
            row_number: raw.row_number,
            source_doc_id: raw.source_doc_id.trim().to_string(),
            target_doc_id: raw.target_doc_id.trim().to_string(),
            source_sentence: clean_sentence(&raw.source_text),
            target_sentence: clean_sentence(&raw.target_text),
        };
        match self
            .validator
            .validate(&pair.source_sentence, &pair.target_sentence)
        {
            Ok(()) => Ok(pair),
            Err(reason) => {
                tracing::debug!(row = pair.row_number, %reason, "pair rejected");
                Err(InvalidPair { pair, reason })
            }
        }
    }

    /// Lazily groups `rows` into batches of `batch_size` valid pairs, carrying along the invalid
    /// pairs seen since the previous batch.
    pub fn batches<I>(&self, rows: I) -> Batches<'d, I>
    where
        I: Iterator<Item = anyhow::Result<RawRow>>,
    {
        Batches {
            pipeline: self.clone(),
            rows,
            valid: Vec::new(),
            invalid: Vec::new(),
            finished: false,
        }
    }
}

/// Single-pass batch stream over one input.
///
/// A read error is yielded once and ends the stream; rows buffered before it are discarded.
pub struct Batches<'d, I> {
    pipeline: BatchPipeline<'d>,
    rows: I,
    valid: Vec<ValidPair>,
    invalid: Vec<InvalidPair>,
    finished: bool,
}

impl<I> Batches<'_, I> {
    /// The underlying row source, e.g. to read its statistics after the stream ends.
    pub fn rows(&self) -> &I {
        &self.rows
    }

    fn take_batch(&mut self) -> Batch {
        Batch {
            valid: std::mem::take(&mut self.valid),
            invalid: std::mem::take(&mut self.invalid),
        }
    }
}

impl<I> Iterator for Batches<'_, I>
where
    I: Iterator<Item = anyhow::Result<RawRow>>,
{
    type Item = anyhow::Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.rows.next() {
                Some(Ok(raw)) => {
                    match self.pipeline.classify(raw) {
                        Ok(valid) => self.valid.push(valid),
                        Err(invalid) => self.invalid.push(invalid),
                    }
                    if self.valid.len() >= self.pipeline.batch_size {
                        return Some(Ok(self.take_batch()));
                    }
                }
                Some(Err(err)) => {
                    self.finished = true;
                    self.valid.clear();
                    self.invalid.clear();
                    return Some(Err(err));
                }
                None => {
                    self.finished = true;
                    if self.valid.is_empty() && self.invalid.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.take_batch()));
                }
            }
        }
    }
}

impl<I> std::iter::FusedIterator for Batches<'_, I> where I: Iterator<Item = anyhow::Result<RawRow>> {}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::pipeline::validate::tests::ScriptDetector;
    use crate::pipeline::Rejection;

    fn row(n: usize, source: &str, target: &str) -> anyhow::Result<RawRow> {
        Ok(RawRow {
            row_number: n,
            source_doc_id: format!("doc{n}"),
            source_text: source.to_string(),
            target_doc_id: String::new(),
            target_text: target.to_string(),
        })
    }

    fn valid(n: usize) -> anyhow::Result<RawRow> {
        row(n, &format!("Sentence number {n} is valid."), "这是一个有效的句子。")
    }

    fn invalid(n: usize) -> anyhow::Result<RawRow> {
        row(n, "short", "短")
    }

    fn pipeline(batch_size: usize) -> BatchPipeline<'static> {
        let rules = ValidationRules {
            filter_incomplete_sentences: false,
            ..ValidationRules::default()
        };
        BatchPipeline::new(rules, &ScriptDetector, batch_size)
    }

    #[test]
    fn scenario_single_batch_with_valid_and_short_rows() {
        // "你好世界。" is five characters, so the scenario needs a minimum of at most 5.
        let rules = ValidationRules {
            filter_incomplete_sentences: false,
            min_sentence_length: 5,
            ..ValidationRules::default()
        };
        let p = BatchPipeline::new(rules, &ScriptDetector, 50);
        let batches: Vec<Batch> = p
            .batches(vec![row(3, "Hello world.", "你好世界。"), row(4, "short", "短")].into_iter())
            .collect::<anyhow::Result<_>>()
            .expect("batches");
        assert_eq!(batches.len(), 1);
        let b = &batches[0];
        assert_eq!(b.valid.len(), 1);
        assert_eq!(b.valid[0].source_sentence, "Hello world.");
        assert_eq!(b.invalid.len(), 1);
        assert!(matches!(b.invalid[0].reason, Rejection::TooShort { .. }));
        assert!(b.invalid[0].reason.to_string().contains("minimum length"));
    }

    #[test]
    fn batch_size_one_yields_one_batch_per_valid_row() {
        let p = pipeline(1);
        let batches: Vec<Batch> = p
            .batches(vec![valid(1), valid(2), valid(3)].into_iter())
            .collect::<anyhow::Result<_>>()
            .expect("batches");
        assert_eq!(batches.len(), 3);
        for (i, b) in batches.iter().enumerate() {
            assert_eq!(b.valid.len(), 1);
            assert_eq!(b.valid[0].row_number, i + 1);
            assert!(b.invalid.is_empty());
        }
    }

    #[test]
    fn invalid_rows_ride_along_with_the_next_flush() {
        let p = pipeline(2);
        let rows = vec![invalid(1), valid(2), invalid(3), valid(4), invalid(5)];
        let batches: Vec<Batch> = p
            .batches(rows.into_iter())
            .collect::<anyhow::Result<_>>()
            .expect("batches");
        assert_eq!(batches.len(), 2);
        let nums = |b: &Batch| -> (Vec<usize>, Vec<usize>) {
            (
                b.valid.iter().map(|v| v.row_number).collect(),
                b.invalid.iter().map(|v| v.pair.row_number).collect(),
            )
        };
        assert_eq!(nums(&batches[0]), (vec![2, 4], vec![1, 3]));
        assert_eq!(nums(&batches[1]), (vec![], vec![5]));
    }

    #[test]
    fn only_invalid_rows_still_yield_one_batch() {
        let p = pipeline(50);
        let batches: Vec<Batch> = p
            .batches(vec![invalid(1), invalid(2)].into_iter())
            .collect::<anyhow::Result<_>>()
            .expect("batches");
        assert_eq!(batches.len(), 1);
        assert!(batches[0].valid.is_empty());
        assert_eq!(batches[0].invalid.len(), 2);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let p = pipeline(50);
        assert_eq!(p.batches(Vec::<anyhow::Result<RawRow>>::new().into_iter()).count(), 0);
    }

    #[test]
    fn batches_preserve_order_and_sizes() {
        for batch_size in [1, 2, 3, 7, 50] {
            let p = pipeline(batch_size);
            let rows: Vec<anyhow::Result<RawRow>> = (1..=23)
                .map(|n| if n % 4 == 0 { invalid(n) } else { valid(n) })
                .collect();
            let expected_valid: Vec<usize> = (1..=23).filter(|n| n % 4 != 0).collect();
            let expected_invalid: Vec<usize> = (1..=23).filter(|n| n % 4 == 0).collect();

            let batches: Vec<Batch> = p
                .batches(rows.into_iter())
                .collect::<anyhow::Result<_>>()
                .expect("batches");
            let got_valid: Vec<usize> = batches
                .iter()
                .flat_map(|b| b.valid.iter().map(|v| v.row_number))
                .collect();
            let got_invalid: Vec<usize> = batches
                .iter()
                .flat_map(|b| b.invalid.iter().map(|v| v.pair.row_number))
                .collect();
            assert_eq!(got_valid, expected_valid, "batch_size={batch_size}");
            assert_eq!(got_invalid, expected_invalid, "batch_size={batch_size}");

            let (last, rest) = batches.split_last().expect("non-empty");
            for b in rest {
                assert_eq!(b.valid.len(), batch_size);
            }
            assert!(last.valid.len() <= batch_size);
            if expected_valid.len() < batch_size {
                assert_eq!(batches.len(), 1);
            }
        }
    }

    #[test]
    fn read_error_is_yielded_once_then_stream_ends() {
        let p = pipeline(50);
        let rows = vec![valid(1), Err(anyhow!("corrupt sheet")), valid(3)];
        let mut it = p.batches(rows.into_iter());
        assert!(it.next().expect("item").is_err());
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn classify_cleans_before_validating() {
        let p = pipeline(50);
        let raw = RawRow {
            row_number: 9,
            source_doc_id: " A/RES/1 ".to_string(),
            source_text: "<s>doc#A1 The   Council decided.</s>".to_string(),
            target_doc_id: String::new(),
            target_text: "12 . 安理会 作出了 这项 决定。".to_string(),
        };
        let pair = p.classify(raw).expect("valid");
        assert_eq!(pair.source_doc_id, "A/RES/1");
        assert_eq!(pair.source_sentence, "The Council decided.");
        assert_eq!(pair.target_sentence, "安理会作出了这项决定。");
    }
}
