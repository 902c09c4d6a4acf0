use once_cell::sync::Lazy;
use regex::Regex;

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<s>|</s>|doc#\w+\s*").expect("marker regex"));
static NUMBERING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+\s*\.\s*)+").expect("numbering regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));
static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u4e00-\u9fff]").expect("cjk"));

/// Characters skipped at the end of a sentence before looking for its terminal mark.
const TRAILING_IGNORABLE: &[char] = &[
    ' ', '\u{3000}', '\'', '"', '‘', '’', '“', '”', '«', '»', '(', ')', '（', '）', '[', ']',
    '［', '］', '【', '】', '{', '}', '｛', '｝', '「', '」', '『', '』',
];

const TERMINAL_PUNCT: &[char] = &[
    '.', '!', '?', ';', ':', '。', '！', '？', '；', '：', '…', '—',
];

pub fn contains_cjk(text: &str) -> bool {
    CJK_RE.is_match(text)
}

/// Normalizes one raw cell into a sentence.
///
/// Markers and `doc#` tags are removed, leading `12 . ` numbering is dropped, and whitespace
/// is removed entirely for CJK text or collapsed to single spaces otherwise. The passes repeat
/// until nothing changes, so the result is a fixpoint of `clean_sentence`.
pub fn clean_sentence(text: &str) -> String {
    let mut cur = clean_once(text);
    loop {
        let next = clean_once(&cur);
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

fn clean_once(text: &str) -> String {
    let stripped = MARKER_RE.replace_all(text, "");
    let stripped = NUMBERING_RE.replace(stripped.trim(), "");
    let stripped = stripped.trim();
    if contains_cjk(stripped) {
        WS_RE.replace_all(stripped, "").into_owned()
    } else {
        WS_RE.replace_all(stripped, " ").trim().to_string()
    }
}

pub fn ends_with_terminal_punct(text: &str) -> bool {
    let trimmed =
        text.trim_end_matches(|c: char| c.is_whitespace() || TRAILING_IGNORABLE.contains(&c));
    trimmed
        .chars()
        .next_back()
        .is_some_and(|c| TERMINAL_PUNCT.contains(&c))
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
