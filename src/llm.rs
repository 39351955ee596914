use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Settings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
}

/// A text-in, text-out inference service.
pub trait ChatModel {
    fn complete(
        &self,
        prompt: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<String>> + Send;
}

impl<T: ChatModel> ChatModel for &T {
    fn complete(
        &self,
        prompt: &str,
        options: &ChatOptions,
    ) -> impl Future<Output = Result<String>> + Send {
        (**self).complete(prompt, options)
    }
}

/// Client for an OpenAI-compatible chat completions endpoint (Ollama,
/// LM Studio, vLLM, ...).
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_timeout(
            &settings.llm_base_url,
            &settings.model,
            settings.llm_api_key.clone().filter(|k| !k.is_empty()),
            settings.inference_timeout(),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        anyhow::ensure!(
            status.is_success(),
            "LLM returned HTTP {}: {}",
            status,
            text.chars().take(200).collect::<String>()
        );
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // choices[0].message.content, null treated as empty
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

impl ChatModel for LlmClient {
    async fn complete(&self, prompt: &str, options: &ChatOptions) -> Result<String> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        self.chat(&messages, options).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays scripted answers and records every prompt it was given.
    /// `None` in the script simulates a failed request.
    #[derive(Default)]
    pub struct ScriptedModel {
        answers: Mutex<VecDeque<Option<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(answers: I) -> Self
        where
            I: IntoIterator<Item = Option<S>>,
            S: Into<String>,
        {
            Self {
                answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl ChatModel for ScriptedModel {
        async fn complete(&self, prompt: &str, _options: &ChatOptions) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.answers.lock().unwrap().pop_front() {
                Some(Some(answer)) => Ok(answer),
                Some(None) => anyhow::bail!("connection refused"),
                None => anyhow::bail!("script exhausted"),
            }
        }
    }
}
