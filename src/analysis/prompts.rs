use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::PromptsSection;
use crate::ir::ValidPair;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const DEFAULT_ANALYSIS_PROMPT_FILE: &str = "analysis.txt";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex"));

/// Prompt template for one sentence pair.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_ANALYSIS_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Reads `[prompts].analysis` relative to the config directory.
    ///
    /// An unset path means the built-in template; a configured path that does not exist is an
    /// error unless it is the default location, which `--init-config` may not have written yet.
    pub fn load(config_dir: &Path, section: &PromptsSection) -> anyhow::Result<Self> {
        let default_rel = format!("{DEFAULT_PROMPTS_DIR}/{DEFAULT_ANALYSIS_PROMPT_FILE}");
        let Some(rel) = section.analysis.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            return Ok(Self::default());
        };
        let mut path = PathBuf::from(rel);
        if path.is_relative() {
            path = config_dir.join(&path);
        }
        if !path.exists() {
            if rel == default_rel {
                return Ok(Self::default());
            }
            return Err(anyhow!(
                "prompt file not found: {} (run: nominal-miner --init-config)",
                path.display()
            ));
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read prompt: {}", path.display()))?;
        Ok(Self { text })
    }

    pub fn render(&self, pair: &ValidPair, source_lang: &str, target_lang: &str) -> String {
        render_template(
            &self.text,
            &[
                ("source_sentence", pair.source_sentence.as_str()),
                ("target_sentence", pair.target_sentence.as_str()),
                ("source_lang", source_lang),
                ("target_lang", target_lang),
            ],
        )
    }
}

/// Substitutes `{{name}}` tokens in one pass over the template, so substituted text is never
/// scanned again. Unknown names are left as written.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match vars.iter().find(|(k, _)| *k == name) {
                Some((_, v)) => (*v).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"Analyze the following {{source_lang}} sentence taken from United Nations documents together with its {{target_lang}} translation.

Source sentence:
{{source_sentence}}

Translation:
{{target_sentence}}

Nominalization turns an action, state or quality into a noun or noun phrase. Types:
1. Derivational: a nominalizing affix on a verb or adjective (-ment, -tion, -sion, -cy, -ty, -ance), e.g. "development", "protection".
2. Conversional: a verb or adjective used as a noun without change of form, e.g. "a request", "use".
3. Phrasal: the "V-ing of NP" construction, e.g. "the killing of members", "the setting up of a committee".

Translation techniques:
1. Maintain_Noun: rendered as a noun.
2. Shift_Word_Class: rendered as a verb, adjective or other word class.
3. Omit_Structure: omitted in the translation.
4. Reconstruct_Sentence: the sentence structure was rebuilt around it.
5. Difficult_To_Determine: no clear correspondence.

Tasks:
1. Identify every core nominalization in the source sentence.
2. For each one give:
   a. Identified_Nominalization_EN: the nominalization as it appears in the source
   b. Nominalization_Type: Derivational, Conversional or Phrasal
   c. Translation_Technique: one of the techniques above

Return ONLY a JSON list, one object per nominalization:
[
  {
    "Identified_Nominalization_EN": "the killing of members",
    "Nominalization_Type": "Phrasal",
    "Translation_Technique": "Maintain_Noun"
  }
]
If there are none, return an empty list: []
"#;
