use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;

const SYSTEM_PROMPT: &str = "\
You are a professional nutritionist and chef. \
You design practical meal plans and always answer with valid JSON only.";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("meal plan generation is not configured")]
    NotConfigured,

    #[error("the generation service is over capacity, please try again later")]
    RateLimited,

    #[error("the generation service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("could not reach the generation service: {0}")]
    Transport(String),

    #[error("meal plan generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("the generation service returned an empty response")]
    EmptyResponse,
}

/// External text generation: prompt in, raw text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

impl HttpTextGenerator {
    pub fn new(config: GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;
        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.7,
        };

        info!(model = %self.config.model, prompt_len = prompt.len(), "calling generation service");
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.config.timeout())
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("generation service rate limited");
            return Err(GenerationError::RateLimited);
        }
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let text = first_content(parsed)?;
        debug!(response_len = text.len(), "generation service responded");
        Ok(text)
    }
}

fn first_content(res: ChatResponse) -> Result<String, GenerationError> {
    res.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Generator that replays canned responses, for local runs and tests.
///
/// Each call pops the next scripted outcome; once exhausted, the last one is
/// repeated. Prompts are recorded for inspection.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(vec![Ok(text.into())])
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![Err(message.into())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().await.push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().await.pop_front();
        let outcome = match next {
            Some(o) => {
                *self.last.lock().await = Some(o.clone());
                o
            }
            None => self
                .last
                .lock()
                .await
                .clone()
                .ok_or(GenerationError::EmptyResponse)?,
        };
        outcome.map_err(|message| GenerationError::Http { status: 500, message })
    }
}
