use anyhow::anyhow;

/// Texts shorter than this are too ambiguous to classify.
pub const MIN_DETECT_CHARS: usize = 10;

/// Language identification used by the validator.
///
/// `detect` returns a language code (ISO 639-1 where one exists) or an error when the text
/// cannot be classified. Callers treat every error as "not the expected language".
pub trait LanguageDetector {
    fn detect(&self, text: &str) -> anyhow::Result<String>;
}

/// Trigram-based detection backed by `whatlang`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> anyhow::Result<String> {
        let text = text.trim();
        if text.chars().count() < MIN_DETECT_CHARS {
            return Err(anyhow!("text_too_short_for_detection"));
        }
        let info = whatlang::detect(text).ok_or_else(|| anyhow!("language_undetectable"))?;
        Ok(normalize_lang_code(info.lang().code()))
    }
}

const ISO_639_3_TO_1: &[(&str, &str)] = &[
    ("ara", "ar"),
    ("cmn", "zh"),
    ("zho", "zh"),
    ("chi", "zh"),
    ("deu", "de"),
    ("ger", "de"),
    ("eng", "en"),
    ("spa", "es"),
    ("fra", "fr"),
    ("fre", "fr"),
    ("ita", "it"),
    ("jpn", "ja"),
    ("kor", "ko"),
    ("nld", "nl"),
    ("por", "pt"),
    ("rus", "ru"),
    ("ukr", "uk"),
    ("pol", "pl"),
    ("tur", "tr"),
    ("vie", "vi"),
    ("tha", "th"),
    ("hin", "hi"),
];

/// Lower-cases, drops the region subtag and folds ISO 639-3 codes onto ISO 639-1.
///
/// `zh-CN`, `zh_tw`, `cmn` and `zh` all normalize to `zh`.
pub fn normalize_lang_code(code: &str) -> String {
    let lower = code.trim().to_ascii_lowercase();
    let primary = lower
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_string();
    ISO_639_3_TO_1
        .iter()
        .find(|(long, _)| *long == primary)
        .map(|(_, short)| (*short).to_string())
        .unwrap_or(primary)
}

pub fn language_matches(expected: &str, detected: &str) -> bool {
    let expected = normalize_lang_code(expected);
    !expected.is_empty() && expected == normalize_lang_code(detected)
}
