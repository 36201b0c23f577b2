use anyhow::{Context, Result};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue},
};
use serde_json::{Value, json};

use super::{GenerationClient, GenerationError, GenerationRequest};

pub struct GeminiClient {
    http: Client,
    headers: HeaderMap,
    url: String,
}

impl GeminiClient {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key).context("API key is not a valid header value")?,
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Ok(Self {
            http: Client::new(),
            headers,
            url: format!(
                "{}/models/{}:generateContent",
                endpoint.trim_end_matches('/'),
                model
            ),
        })
    }

    async fn send(&self, payload: Value) -> Result<Value, GenerationError> {
        let resp = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|err| GenerationError::Transport {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "no body".to_string());
            tracing::error!(%status, %body, "Generation request failed");
            return Err(GenerationError::Transport {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|err| GenerationError::Parse(err.to_string()))
    }
}

#[async_trait::async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let resp = self.send(build_payload(&request)).await?;
        extract_text(&resp)
    }
}

fn build_payload(request: &GenerationRequest) -> Value {
    let mut contents: Vec<Value> = request
        .prior_turns
        .iter()
        .map(|turn| {
            json!({
                "role": turn.speaker.as_str(),
                "parts": [{ "text": turn.text }]
            })
        })
        .collect();
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": request.user_turn }]
    }));

    json!({
        "system_instruction": {
            "parts": [{ "text": request.system_instruction }]
        },
        "contents": contents,
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
            "topP": request.top_p
        }
    })
}

fn extract_text(resp: &Value) -> Result<String, GenerationError> {
    let candidate = resp
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| GenerationError::Parse("candidates missing".into()))?;
    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| GenerationError::Parse("content parts missing".into()))?;

    let mut combined = String::new();
    for part in parts {
        if let Some(chunk) = part.get("text").and_then(|t| t.as_str()) {
            combined.push_str(chunk);
        }
    }
    if combined.trim().is_empty() {
        return Err(GenerationError::Parse(
            "Unable to extract text from generation response".into(),
        ));
    }
    Ok(combined)
}
