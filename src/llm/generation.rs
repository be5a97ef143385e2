//! Chat-completion client for the OpenAI HTTP API (or any compatible
//! endpoint), with a streaming variant over server-sent events.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmError;

/// Default generation model.
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";

/// System instruction fixed for this deployment: scope answers to the
/// supported tools and keep responses short.
const SYSTEM_MESSAGE: &str = "You are a helpful assistant that provides information about \
    test automation tools (Selenium, Playwright, Testim, and Mabl). Answer questions based \
    on the provided context. Keep answers concise.";

/// Produces answer text from a fully-built prompt.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate the complete answer in one call.
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Stream answer fragments as the service produces them.
    fn generate_stream(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> BoxStream<'static, Result<String, LlmError>>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP generation collaborator.
pub struct OpenAiGeneration {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGeneration {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn completion_request<'a>(
        &'a self,
        prompt: &'a str,
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
            max_tokens,
            stream,
        }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.completion_request(prompt, temperature, max_tokens, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Service {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: CompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                LlmError::MalformedResponse("completion response carried no choices".to_string())
            })?;

        Ok(content.trim().to_string())
    }

    /// The stream ends on the service's `[DONE]` sentinel or when the
    /// connection closes.
    fn generate_stream(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> BoxStream<'static, Result<String, LlmError>> {
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.completion_request(prompt, temperature, max_tokens, true));

        let fragments = stream! {
            let mut source = match EventSource::new(builder) {
                Ok(source) => source,
                Err(e) => {
                    yield Err(LlmError::Stream(e.to_string()));
                    return;
                }
            };

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<StreamChunk>(&message.data) {
                            Ok(chunk) => {
                                let delta = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content);
                                if let Some(content) = delta {
                                    if !content.is_empty() {
                                        yield Ok(content);
                                    }
                                }
                            }
                            Err(e) => {
                                yield Err(LlmError::Stream(format!("bad stream chunk: {}", e)));
                                break;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        fragments.boxed()
    }
}
