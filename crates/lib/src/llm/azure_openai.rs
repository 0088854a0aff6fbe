//! Azure OpenAI chat-completions client (OpenAI wire format, deployment-scoped URL, `api-key` header).

use crate::config::{self, Config};
use crate::llm::{Completion, CompletionBackend, CompletionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client for one Azure OpenAI deployment.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    endpoint: Option<String>,
    api_key: Option<String>,
    deployment: String,
    api_version: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl AzureOpenAiClient {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.map(|u| u.trim_end_matches('/').to_string()),
            api_key,
            deployment: deployment.into(),
            api_version: api_version.into(),
            system_prompt: String::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, with env overrides for endpoint and key.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_completion_endpoint(config),
            config::resolve_completion_api_key(config),
            config.completion.deployment.clone(),
            config.completion.api_version.clone(),
        )
        .with_system_prompt(config.completion.system_prompt.clone())
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// POST URL for the deployment's chat/completions.
    fn completions_url(&self, endpoint: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, self.deployment, self.api_version
        )
    }

    /// System turn (possibly empty) followed by the user turn.
    fn conversation(&self, input: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(input),
        ]
    }

    /// POST chat/completions — one non-streaming call. Returns the first choice's content, if any.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<Option<String>, CompletionError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(CompletionError::NotConfigured("endpoint"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::NotConfigured("api key"))?;
        let url = self.completions_url(endpoint);
        let body = ChatRequest { messages };
        let res = self
            .client
            .post(&url)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        Ok(data.first_content())
    }
}

#[async_trait]
impl CompletionBackend for AzureOpenAiClient {
    async fn complete(&self, input: &str) -> Completion {
        match self.chat(self.conversation(input)).await {
            Ok(content) => {
                let out = Completion::from_content(content);
                if matches!(out, Completion::Empty) {
                    log::info!("completion: response content is missing or empty");
                }
                out
            }
            Err(e) => {
                log::warn!("completion: {}", e);
                Completion::Failed(e)
            }
        }
    }
}

/// One conversation turn in OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AzureOpenAiClient {
        AzureOpenAiClient::new(
            Some("https://res.openai.azure.com/".into()),
            Some("k".into()),
            "gpt-4o",
            "2024-06-01",
        )
    }

    #[test]
    fn url_is_deployment_scoped() {
        let c = client();
        assert_eq!(
            c.completions_url(c.endpoint.as_deref().unwrap()),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn conversation_is_system_then_user() {
        let msgs = client().conversation("hello");
        assert_eq!(msgs, vec![ChatMessage::system(""), ChatMessage::user("hello")]);
        let msgs = client().with_system_prompt("be terse").conversation("hi");
        assert_eq!(msgs[0].content, "be terse");
    }

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            messages: client().conversation("hi"),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(
            v,
            serde_json::json!({ "messages": [
                { "role": "system", "content": "" },
                { "role": "user", "content": "hi" }
            ]})
        );
    }

    #[test]
    fn first_choice_content_is_used() {
        let data: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"first"}},
                           {"message":{"role":"assistant","content":"second"}}]}"#,
        )
        .unwrap();
        assert_eq!(data.first_content().as_deref(), Some("first"));
    }

    #[test]
    fn missing_choices_yield_none() {
        let data: ChatResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(data.first_content(), None);
        let data: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(data.first_content(), None);
    }

    #[tokio::test]
    async fn unconfigured_client_fails_without_io() {
        let c = AzureOpenAiClient::new(None, Some("k".into()), "gpt-4o", "2024-06-01");
        match c.complete("hi").await {
            Completion::Failed(CompletionError::NotConfigured(what)) => assert_eq!(what, "endpoint"),
            other => panic!("unexpected: {:?}", other),
        }
        let c = AzureOpenAiClient::new(Some("http://127.0.0.1:1".into()), None, "gpt-4o", "v");
        assert!(matches!(
            c.complete("hi").await,
            Completion::Failed(CompletionError::NotConfigured("api key"))
        ));
    }
}
