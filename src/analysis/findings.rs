use serde::Deserialize;
use serde_json::Value;

use crate::ir::{Finding, NOT_AVAILABLE};

const STRUCTURE_KEYS: &[&str] = &[
    "identified_nominalization_en",
    "identified_nominalization",
    "identified_structure",
    "structure",
];
const TYPE_KEYS: &[&str] = &["nominalization_type", "structure_type", "type"];
const TECHNIQUE_KEYS: &[&str] = &["translation_technique", "technique"];

/// Finds the first JSON array in free-form model output (fenced or surrounded by prose).
pub fn extract_json_array(text: &str) -> anyhow::Result<Vec<Value>> {
    let mut from = 0;
    while let Some(off) = text[from..].find('[') {
        let start = from + off;
        let mut de = serde_json::Deserializer::from_str(&text[start..]);
        if let Ok(Value::Array(items)) = Value::deserialize(&mut de) {
            return Ok(items);
        }
        from = start + 1;
    }
    anyhow::bail!("no_json_array")
}

/// Parses model content into findings. Non-object items are skipped.
pub fn parse_findings(content: &str) -> anyhow::Result<Vec<Finding>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items = extract_json_array(content)?;
    Ok(items.iter().filter_map(normalize_item).collect())
}

fn normalize_item(item: &Value) -> Option<Finding> {
    let obj = item.as_object()?;
    let field = |keys: &[&str]| -> String {
        obj.iter()
            .find(|(k, _)| keys.iter().any(|want| k.eq_ignore_ascii_case(want)))
            .map(|(_, v)| value_text(v))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };
    Some(Finding {
        structure: field(STRUCTURE_KEYS),
        structure_type: field(TYPE_KEYS),
        technique: field(TECHNIQUE_KEYS),
    })
}

fn value_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
