use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;

use crate::analysis::prompts::{DEFAULT_ANALYSIS_PROMPT, DEFAULT_ANALYSIS_PROMPT_FILE, DEFAULT_PROMPTS_DIR};

pub const CONFIG_FILENAME: &str = "nominal-miner.toml";
pub const CONFIG_ENV: &str = "NOMINAL_MINER_CONFIG";
pub const API_KEY_ENV: &str = "NOMINAL_MINER_API_KEY";

pub const BATCH_SIZE_MIN: usize = 50;
pub const BATCH_SIZE_MAX: usize = 2000;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSection,
    pub model: ModelSection,
    pub processing: ProcessingSection,
    pub file_structure: FileStructureSection,
    pub prompts: PromptsSection,
    pub trace: TraceSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Bearer token. Falls back to `NOMINAL_MINER_API_KEY` when empty.
    pub key: String,
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    pub endpoint: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            key: String::new(),
            endpoint: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl ApiSection {
    pub fn resolved_key(&self) -> Option<String> {
        let key = self.key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProcessingSection {
    pub min_sentence_length: usize,
    pub max_sentence_length: usize,
    pub filter_incomplete_sentences: bool,
    /// Also require the target sentence to be detected as `language.target`.
    pub verify_target_language: bool,
    pub batch_size: usize,
    /// Seconds to wait between batches.
    pub delay_between_batches: u64,
    /// Pause one second after every N analysis requests (0 disables).
    pub requests_per_pause: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        Self {
            min_sentence_length: 10,
            max_sentence_length: 500,
            filter_incomplete_sentences: true,
            verify_target_language: false,
            batch_size: 100,
            delay_between_batches: 1,
            requests_per_pause: 5,
            max_retries: 3,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FileStructureSection {
    /// Leading metadata/header rows to discard.
    pub skip_rows: usize,
    /// Worksheet name; the first sheet of the workbook when unset.
    pub sheet: Option<String>,
    pub columns: ColumnsSection,
    pub language: LanguageSection,
}

impl Default for FileStructureSection {
    fn default() -> Self {
        Self {
            skip_rows: 6,
            sheet: None,
            columns: ColumnsSection::default(),
            language: LanguageSection::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub index: usize,
}

impl ColumnSpec {
    pub fn at(index: usize) -> Self {
        Self {
            enabled: true,
            index,
        }
    }

    pub fn disabled(index: usize) -> Self {
        Self {
            enabled: false,
            index,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ColumnsSection {
    pub source_doc_id: ColumnSpec,
    pub source_text: ColumnSpec,
    pub target_doc_id: ColumnSpec,
    pub target_text: ColumnSpec,
}

impl Default for ColumnsSection {
    fn default() -> Self {
        Self {
            source_doc_id: ColumnSpec::at(0),
            source_text: ColumnSpec::at(1),
            target_doc_id: ColumnSpec::disabled(2),
            target_text: ColumnSpec::at(3),
        }
    }
}

impl ColumnsSection {
    pub fn enabled(&self) -> impl Iterator<Item = ColumnSpec> {
        [
            self.source_doc_id,
            self.source_text,
            self.target_doc_id,
            self.target_text,
        ]
        .into_iter()
        .filter(|c| c.enabled)
    }

    /// Minimum number of cells a row needs to be considered well-formed.
    pub fn required_width(&self) -> usize {
        self.enabled().map(|c| c.index + 1).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LanguageSection {
    pub source: String,
    pub target: String,
}

impl Default for LanguageSection {
    fn default() -> Self {
        Self {
            source: "en".to_string(),
            target: "zh-cn".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct PromptsSection {
    /// Prompt template path, relative to the config file.
    pub analysis: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    pub enabled: bool,
    /// Relative paths resolve against the output file's directory.
    pub dir: String,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "_trace".to_string(),
        }
    }
}

impl AppConfig {
    /// Checks the numeric bounds and required fields once, at load time.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.processing;
        if p.max_sentence_length <= p.min_sentence_length {
            bail!(
                "processing.max_sentence_length ({}) must be greater than min_sentence_length ({})",
                p.max_sentence_length,
                p.min_sentence_length
            );
        }
        if !(BATCH_SIZE_MIN..=BATCH_SIZE_MAX).contains(&p.batch_size) {
            bail!(
                "processing.batch_size must be within [{BATCH_SIZE_MIN}, {BATCH_SIZE_MAX}], got {}",
                p.batch_size
            );
        }
        if p.max_retries == 0 {
            bail!("processing.max_retries must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            bail!(
                "model.temperature must be within [0, 2], got {}",
                self.model.temperature
            );
        }
        let cols = &self.file_structure.columns;
        if !cols.source_text.enabled || !cols.target_text.enabled {
            bail!("file_structure.columns.source_text and target_text must be enabled");
        }
        let lang = &self.file_structure.language;
        if lang.source.trim().is_empty() || lang.target.trim().is_empty() {
            bail!("file_structure.language.source and target must be set");
        }
        Ok(())
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILENAME, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, CONFIG_FILENAME, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILENAME, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text)
        .with_context(|| format!("parse config toml: {}", path.display()))?;
    Ok(cfg)
}

/// A parsed config together with the path it was read from (or would live at).
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub app: AppConfig,
}

impl LoadedConfig {
    /// Resolves the config from `--config`, then `NOMINAL_MINER_CONFIG`, then an upwards
    /// search. A missing file yields the built-in defaults.
    pub fn discover(input: &Path, explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(p) = explicit.as_ref() {
            if !p.exists() {
                return Err(anyhow!("config not found: {}", p.display()));
            }
        }
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir));

        match cfg_file {
            Some(path) if path.exists() => {
                let app = load_config(&path)?;
                Ok(Self { path, app })
            }
            Some(path) => Ok(Self {
                path,
                app: AppConfig::default(),
            }),
            None => Ok(Self {
                path: workdir.join(CONFIG_FILENAME),
                app: AppConfig::default(),
            }),
        }
    }

    pub fn config_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Writes a commented default config and the default prompt template into `dir`.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    let prompt_path = prompts_dir.join(DEFAULT_ANALYSIS_PROMPT_FILE);
    if !prompt_path.exists() || force {
        std::fs::write(&prompt_path, DEFAULT_ANALYSIS_PROMPT)
            .with_context(|| format!("write prompt: {}", prompt_path.display()))?;
    }

    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[api]
# Leave empty to read NOMINAL_MINER_API_KEY from the environment.
key = ""
endpoint = "https://api.openai.com/v1"

[model]
name = "gpt-4o-mini"
temperature = 0.3
max_tokens = 1000

[processing]
min_sentence_length = 10
max_sentence_length = 500
filter_incomplete_sentences = true
verify_target_language = false
# Valid pairs per batch, within [50, 2000].
batch_size = 100
delay_between_batches = 1
requests_per_pause = 5
max_retries = 3
request_timeout_secs = 60

[file_structure]
skip_rows = 6
# sheet = "Sheet1"

[file_structure.columns]
source_doc_id = { enabled = true, index = 0 }
source_text = { enabled = true, index = 1 }
target_doc_id = { enabled = false, index = 2 }
target_text = { enabled = true, index = 3 }

[file_structure.language]
source = "en"
target = "zh-cn"

[prompts]
analysis = "prompts/analysis.txt"

[trace]
enabled = false
dir = "_trace"
"#;
