use std::fmt;

use crate::config::AppConfig;
use crate::lang::{language_matches, LanguageDetector};
use crate::textutil::ends_with_terminal_punct;

/// Acceptance thresholds for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_sentence_length: usize,
    pub max_sentence_length: usize,
    pub filter_incomplete_sentences: bool,
    pub source_lang: String,
    pub target_lang: String,
    pub verify_target_language: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ValidationRules {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            min_sentence_length: cfg.processing.min_sentence_length,
            max_sentence_length: cfg.processing.max_sentence_length,
            filter_incomplete_sentences: cfg.processing.filter_incomplete_sentences,
            source_lang: cfg.file_structure.language.source.clone(),
            target_lang: cfg.file_structure.language.target.clone(),
            verify_target_language: cfg.processing.verify_target_language,
        }
    }
}

/// Why a pair was rejected. Only the first failing rule is reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    IncompleteSentence,
    TooShort {
        source_len: usize,
        target_len: usize,
        min: usize,
    },
    TooLong {
        source_len: usize,
        target_len: usize,
        max: usize,
    },
    SourceLanguage {
        expected: String,
        detected: Option<String>,
    },
    TargetLanguage {
        expected: String,
        detected: Option<String>,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteSentence => {
                write!(f, "source sentence does not end with terminal punctuation")
            }
            Self::TooShort {
                source_len,
                target_len,
                min,
            } => write!(
                f,
                "sentence shorter than minimum length {min} (source: {source_len}, target: {target_len})"
            ),
            Self::TooLong {
                source_len,
                target_len,
                max,
            } => write!(
                f,
                "sentence longer than maximum length {max} (source: {source_len}, target: {target_len})"
            ),
            Self::SourceLanguage { expected, detected } => {
                write_lang_failure(f, "source", expected, detected.as_deref())
            }
            Self::TargetLanguage { expected, detected } => {
                write_lang_failure(f, "target", expected, detected.as_deref())
            }
        }
    }
}

fn write_lang_failure(
    f: &mut fmt::Formatter<'_>,
    side: &str,
    expected: &str,
    detected: Option<&str>,
) -> fmt::Result {
    match detected {
        Some(d) => write!(
            f,
            "{side} language check failed (expected {expected}, detected {d})"
        ),
        None => write!(
            f,
            "{side} language check failed (expected {expected}, undetectable)"
        ),
    }
}

/// Applies the ordered acceptance rules to cleaned sentence pairs.
#[derive(Clone)]
pub struct Validator<'d> {
    rules: ValidationRules,
    detector: &'d dyn LanguageDetector,
}

impl<'d> Validator<'d> {
    pub fn new(rules: ValidationRules, detector: &'d dyn LanguageDetector) -> Self {
        Self { rules, detector }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Rules run in a fixed order (completeness, minimum length, maximum length, source
    /// language, optional target language) and stop at the first failure.
    pub fn validate(&self, source: &str, target: &str) -> Result<(), Rejection> {
        let r = &self.rules;
        if r.filter_incomplete_sentences && !ends_with_terminal_punct(source) {
            return Err(Rejection::IncompleteSentence);
        }

        let source_len = source.chars().count();
        let target_len = target.chars().count();
        if source_len < r.min_sentence_length || target_len < r.min_sentence_length {
            return Err(Rejection::TooShort {
                source_len,
                target_len,
                min: r.min_sentence_length,
            });
        }
        if source_len > r.max_sentence_length || target_len > r.max_sentence_length {
            return Err(Rejection::TooLong {
                source_len,
                target_len,
                max: r.max_sentence_length,
            });
        }

        if let Err(detected) = self.check_language(source, &r.source_lang) {
            return Err(Rejection::SourceLanguage {
                expected: r.source_lang.clone(),
                detected,
            });
        }
        if r.verify_target_language {
            if let Err(detected) = self.check_language(target, &r.target_lang) {
                return Err(Rejection::TargetLanguage {
                    expected: r.target_lang.clone(),
                    detected,
                });
            }
        }
        Ok(())
    }

    /// `Err` carries the detected code, or `None` when detection itself failed.
    fn check_language(&self, text: &str, expected: &str) -> Result<(), Option<String>> {
        match self.detector.detect(text) {
            Ok(code) if language_matches(expected, &code) => Ok(()),
            Ok(code) => Err(Some(code)),
            Err(err) => {
                tracing::debug!(error = %err, "language detection failed");
                Err(None)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::textutil::contains_cjk;

    /// Classifies by script: CJK text is `zh`, text containing `fr:` is `fr`, text containing
    /// `???` is undetectable, anything else is `en`.
    pub(crate) struct ScriptDetector;

    impl LanguageDetector for ScriptDetector {
        fn detect(&self, text: &str) -> anyhow::Result<String> {
            if text.contains("???") {
                return Err(anyhow!("undetectable"));
            }
            if contains_cjk(text) {
                Ok("zh".to_string())
            } else if text.contains("fr:") {
                Ok("fr".to_string())
            } else {
                Ok("en".to_string())
            }
        }
    }

    fn validator(rules: ValidationRules) -> Validator<'static> {
        Validator::new(rules, &ScriptDetector)
    }

    #[test]
    fn accepts_well_formed_pair() {
        let v = validator(ValidationRules::default());
        assert_eq!(v.validate("Hello world.", "安全理事会通过了这项决议。"), Ok(()));
    }

    #[test]
    fn incomplete_sentence_is_rejected_regardless_of_length() {
        let v = validator(ValidationRules::default());
        assert_eq!(
            v.validate("Summary", "摘要。"),
            Err(Rejection::IncompleteSentence)
        );
        let long = "Summary of the discussions held during the session";
        assert_eq!(
            v.validate(long, "会议期间讨论情况摘要。"),
            Err(Rejection::IncompleteSentence)
        );
    }

    #[test]
    fn completeness_check_can_be_disabled() {
        let rules = ValidationRules {
            filter_incomplete_sentences: false,
            ..ValidationRules::default()
        };
        let v = validator(rules);
        assert_eq!(v.validate("Summary of the session", "会议期间讨论情况摘要"), Ok(()));
    }

    #[test]
    fn length_bounds_apply_to_both_sides() {
        let rules = ValidationRules {
            min_sentence_length: 10,
            max_sentence_length: 20,
            ..ValidationRules::default()
        };
        let v = validator(rules);
        assert_eq!(
            v.validate("short.", "这是一个足够长的句子。"),
            Err(Rejection::TooShort {
                source_len: 6,
                target_len: 11,
                min: 10
            })
        );
        assert!(matches!(
            v.validate("This one is long enough.", "短。"),
            Err(Rejection::TooShort { .. })
        ));
        assert!(matches!(
            v.validate("Fine length here.", "这是一个非常非常非常非常非常非常长的中文句子。"),
            Err(Rejection::TooLong { .. })
        ));
    }

    #[test]
    fn lengths_count_characters_not_bytes_or_columns() {
        let v = validator(ValidationRules::default());

        let mut long_zh = "议".repeat(300);
        long_zh.push('。');
        assert_eq!(long_zh.chars().count(), 301);
        assert_eq!(
            v.validate("The Council adopted the resolution without a vote.", &long_zh),
            Ok(())
        );

        assert_eq!(
            v.validate("The resolution was adopted.", "决议通过。"),
            Err(Rejection::TooShort {
                source_len: 27,
                target_len: 5,
                min: 10
            })
        );
    }

    #[test]
    fn length_rule_wins_over_language_rule() {
        let v = validator(ValidationRules::default());
        let err = v.validate("fr: court.", "短。").expect_err("rejected");
        assert!(matches!(err, Rejection::TooShort { .. }), "{err:?}");
    }

    #[test]
    fn wrong_or_undetectable_source_language() {
        let v = validator(ValidationRules::default());
        assert_eq!(
            v.validate("fr: Le Conseil a décidé.", "安理会作出了这项决定。"),
            Err(Rejection::SourceLanguage {
                expected: "en".to_string(),
                detected: Some("fr".to_string())
            })
        );
        let err = v
            .validate("??? The Council decided.", "安理会作出了这项决定。")
            .expect_err("rejected");
        assert_eq!(
            err,
            Rejection::SourceLanguage {
                expected: "en".to_string(),
                detected: None
            }
        );
        assert!(err.to_string().contains("undetectable"));
    }

    #[test]
    fn target_language_is_only_checked_when_enabled() {
        let pair = ("The Council decided.", "The Council decided too.");
        let v = validator(ValidationRules::default());
        assert_eq!(v.validate(pair.0, pair.1), Ok(()));

        let rules = ValidationRules {
            verify_target_language: true,
            ..ValidationRules::default()
        };
        let v = validator(rules);
        assert!(matches!(
            v.validate(pair.0, pair.1),
            Err(Rejection::TargetLanguage { .. })
        ));
    }

    #[test]
    fn validation_is_deterministic() {
        let v = validator(ValidationRules::default());
        for (s, t) in [
            ("Hello world.", "安全理事会通过了这项决议。"),
            ("Summary", "摘要"),
            ("fr: Le Conseil a décidé.", "安理会作出了这项决定。"),
        ] {
            assert_eq!(v.validate(s, t), v.validate(s, t));
        }
    }

    #[test]
    fn reasons_are_human_readable() {
        let r = Rejection::TooShort {
            source_len: 5,
            target_len: 2,
            min: 10,
        };
        assert_eq!(
            r.to_string(),
            "sentence shorter than minimum length 10 (source: 5, target: 2)"
        );
    }
}
