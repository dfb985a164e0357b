// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::heuristics::{ItemKind, ParsedRepair, PendingItem, is_positive};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The prompt template that instructs the model to structure office notes.
const SYSTEM_PROMPT: &str = r#"You are a repair invoice extraction assistant for a pool service company.
Given office notes pasted from a vendor invoice screen, extract the parts and labor
line items and return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "invoiceNumber": "string or null",
  "items": [
    {
      "type": "part" or "labor",
      "description": "string (use \"Labor\" for labor)",
      "partNumber": "string or null",
      "quantity": number,
      "unitPrice": number
    }
  ]
}

Notes:
- Columns may be split across lines (name, part number, quantity, price).
- Quantity defaults to 1 when not stated.
- Leave out items that have no price.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Notes longer than this many bytes are cut before sending.
const MAX_BYTES: usize = 8_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// What the model is asked to return. Totals are never trusted from the
/// model; they are recomputed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmRepair {
    #[serde(default)]
    invoice_number: Option<String>,
    #[serde(default)]
    items: Vec<LlmItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmItem {
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(default)]
    description: String,
    #[serde(default)]
    part_number: Option<String>,
    #[serde(default = "default_quantity")]
    quantity: f64,
    #[serde(default)]
    unit_price: f64,
}

fn default_quantity() -> f64 {
    1.0
}

impl LlmRepair {
    /// Rebuild through the same finalize path the heuristic parser uses.
    fn into_parsed(self) -> Option<ParsedRepair> {
        let invoice_number = self.invoice_number.filter(|n| !n.trim().is_empty());
        let items: Vec<_> = self
            .items
            .into_iter()
            .filter(|item| is_positive(item.quantity))
            .filter_map(|item| {
                let part_number = item.part_number.filter(|n| !n.trim().is_empty());
                let description = match item.kind {
                    ItemKind::Labor if item.description.trim().is_empty() => "Labor".to_string(),
                    _ => item.description,
                };
                PendingItem {
                    kind: item.kind,
                    description,
                    part_number,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                }
                .finalize()
            })
            .collect();

        if items.is_empty() && invoice_number.is_none() {
            return None;
        }
        Some(ParsedRepair::assemble(invoice_number, items))
    }
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, Box<dyn std::error::Error>> {
    match llm.backend {
        LlmBackend::Ollama => {
            info!(
                url = %llm.ollama.base_url,
                model = %llm.ollama.model,
                "Using Ollama (local) backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.ollama.base_url.clone(),
                model: llm.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
            })
        }
        LlmBackend::Remote => {
            let api_key = std::env::var("LLM_API_KEY")
                .map_err(|_| "LLM_API_KEY env var required for remote backend")?;
            info!(
                url = %llm.remote.base_url,
                model = %llm.remote.model,
                "Using remote API backend"
            );
            Ok(ResolvedEndpoint {
                base_url: llm.remote.base_url.clone(),
                model: llm.remote.model.clone(),
                api_key,
            })
        }
        LlmBackend::Heuristics => {
            Err("Heuristics backend selected, LLM extraction not needed".into())
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(std::time::Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens from qwen3).
fn extract_json_object(s: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let start = s.find('{').ok_or("No '{' found in LLM response")?;
    let end = s.rfind('}').ok_or("No '}' found in LLM response")?;
    if end <= start {
        return Err("Malformed JSON in LLM response".into());
    }
    Ok(&s[start..=end])
}

/// Turn the model's reply into a parse result.
fn parse_reply(content: &str) -> Result<Option<ParsedRepair>, Box<dyn std::error::Error>> {
    // Strip markdown fences if the model added them despite instructions
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(json_str)?;

    let reply: LlmRepair = serde_json::from_str(json_str)
        .map_err(|e| format!("Failed to parse LLM response as repair JSON: {e}\nRaw: {json_str}"))?;
    Ok(reply.into_parsed())
}

/// A ready-to-use chat endpoint for structuring office notes.
pub struct LlmExtractor {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl LlmExtractor {
    /// Resolve the endpoint and, for Ollama, make sure the server answers.
    pub async fn connect(llm_config: &LlmSection) -> Result<Self, Box<dyn std::error::Error>> {
        let endpoint = resolve_endpoint(llm_config)?;
        let client = Client::new();

        if llm_config.backend == LlmBackend::Ollama
            && !check_ollama_health(&client, &endpoint.base_url).await
        {
            return Err(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )
            .into());
        }

        Ok(Self { client, endpoint })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    /// Send office notes to the model and rebuild a parse result.
    pub async fn extract(
        &self,
        notes: &str,
    ) -> Result<Option<ParsedRepair>, Box<dyn std::error::Error>> {
        if notes.trim().is_empty() {
            return Ok(None);
        }
        let text = truncate_bytes(notes, MAX_BYTES);

        let request = ChatRequest {
            model: self.endpoint.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Extract repair line items from these office notes:\n\n{text}"),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("LLM API error {status}: {body}").into());
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or("Empty response from LLM")?;

        parse_reply(content)
    }
}
