use crate::config::ChatConfig;
use crate::error::{RagError, RemoteErrorKind, Result, Service};
use log::debug;
use serde::{Deserialize, Serialize};

/// Client for an OpenAI-compatible chat completion endpoint
#[derive(Clone)]
pub struct ChatClient {
    config: ChatConfig,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(ChatClient { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send `prompt` as the only user message and return the reply text
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let url = self.completions_url();
        debug!("Requesting completion from {} ({})", url, self.config.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::from_reqwest(Service::Chat, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::from_reqwest(Service::Chat, e))?;

        if !status.is_success() {
            return Err(RagError::remote(
                Service::Chat,
                RemoteErrorKind::Status(status.as_u16()),
                body,
            ));
        }

        let response_data: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::remote(Service::Chat, RemoteErrorKind::MalformedResponse, e.to_string())
        })?;

        // Extract the generated text from the response
        response_data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                RagError::remote(
                    Service::Chat,
                    RemoteErrorKind::MalformedResponse,
                    "No response generated",
                )
            })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}
