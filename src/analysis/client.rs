use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::ir::{Finding, ValidPair};
use crate::textutil::truncate_chars;

use super::findings::parse_findings;
use super::prompts::PromptTemplate;
use super::trace::TraceWriter;
use super::Analyzer;

/// Linear backoff step: attempt `n` waits `n * RETRY_BACKOFF` before the next try.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct ChatAnalyzer {
    http: reqwest::blocking::Client,
    url: String,
    key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    backoff: Duration,
    prompt: PromptTemplate,
    source_lang: String,
    target_lang: String,
    trace: TraceWriter,
}

impl ChatAnalyzer {
    pub fn from_config(cfg: &AppConfig, prompt: PromptTemplate, trace: TraceWriter) -> anyhow::Result<Self> {
        let key = cfg.api.resolved_key().with_context(|| {
            format!(
                "missing API key: set [api].key or {}",
                crate::config::API_KEY_ENV
            )
        })?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.processing.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            url: chat_url(&cfg.api.endpoint),
            key,
            model: cfg.model.name.clone(),
            temperature: cfg.model.temperature,
            max_tokens: cfg.model.max_tokens,
            max_retries: cfg.processing.max_retries.max(1),
            backoff: RETRY_BACKOFF,
            prompt,
            source_lang: cfg.file_structure.language.source.clone(),
            target_lang: cfg.file_structure.language.target.clone(),
            trace,
        })
    }

    /// Sends one request and returns the raw body. Only transport and HTTP status failures
    /// end up here, so only they are retried.
    fn request(&self, prompt: &str) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        self.http
            .post(&self.url)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .context("send chat request")?
            .error_for_status()
            .context("chat request rejected")?
            .text()
            .context("read chat response")
    }
}

/// First choice's message content; a response without one is empty.
fn decode_content(body: &str) -> anyhow::Result<String> {
    let resp: ChatResponse = serde_json::from_str(body).context("decode chat response")?;
    Ok(resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

impl Analyzer for ChatAnalyzer {
    fn analyze(&self, pair: &ValidPair) -> anyhow::Result<Vec<Finding>> {
        let prompt = self
            .prompt
            .render(pair, &self.source_lang, &self.target_lang);
        self.trace.write_row_text(pair.row_number, "prompt", &prompt)?;

        let raw = with_retries(self.max_retries, self.backoff, |attempt| {
            let out = self.request(&prompt);
            if let Err(err) = &out {
                tracing::warn!(row = pair.row_number, attempt, error = %format!("{err:#}"), "analysis request failed");
            }
            out
        })?;
        let content = match decode_content(&raw) {
            Ok(content) => content,
            Err(err) => {
                self.trace.write_row_text(pair.row_number, "response", &raw)?;
                return Err(err);
            }
        };
        self.trace
            .write_row_text(pair.row_number, "response", &content)?;

        match parse_findings(&content) {
            Ok(findings) => Ok(findings),
            Err(err) => {
                tracing::warn!(
                    row = pair.row_number,
                    error = %err,
                    preview = %truncate_chars(&content, 200),
                    "unparsable analysis response"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// `https://host/v1` -> `https://host/v1/chat/completions`; a full URL is kept as is.
pub fn chat_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

/// Runs `op` up to `max_attempts` times (1-based attempt number), sleeping `attempt * backoff`
/// after each failure except the last.
pub fn with_retries<T>(
    max_attempts: u32,
    backoff: Duration,
    mut op: impl FnMut(u32) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) if attempt >= max_attempts => {
                return Err(err).with_context(|| format!("giving up after {attempt} attempts"));
            }
            Err(_) => {
                std::thread::sleep(backoff * attempt);
                attempt += 1;
            }
        }
    }
}
