//! Order extraction tool - turns free-form order text into structured fields

use super::catalog::{canonical_model, MODELS};
use crate::context::ToolContext;
use crate::error::{Error, Result};
use crate::registry::{BlockingTool, ToolCategory, ToolDefinition};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Tool ID
pub const ORDER_EXTRACTION_TOOL: &str = "order_extraction_tool";

struct Patterns {
    email: Regex,
    model: Regex,
    quantity: Regex,
    location: Regex,
}

impl Patterns {
    fn compile() -> std::result::Result<Self, regex::Error> {
        let models = MODELS
            .iter()
            .map(|(name, _)| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            model: Regex::new(&format!(r"(?i)\b({models})\b"))?,
            quantity: Regex::new(r"\b(\d{1,5})\b")?,
            location: Regex::new(r"\b(?:to|in|at)\s+([A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*)*)")?,
        })
    }
}

fn patterns() -> Result<&'static Patterns> {
    static PATTERNS: OnceLock<std::result::Result<Patterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(Patterns::compile)
        .as_ref()
        .map_err(|e| Error::Execution(format!("order patterns failed to compile: {e}")))
}

/// Extracts `model`, `quantity`, `delivery_location` and `buyer_email` from
/// an order text. Fields that cannot be found are `null` and listed in
/// `missing_fields`.
pub struct OrderExtractionTool {
    definition: ToolDefinition,
}

impl OrderExtractionTool {
    /// Create a new order extraction tool
    #[must_use]
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            ORDER_EXTRACTION_TOOL,
            "Extract model, quantity, delivery location and buyer email from order text",
        )
        .with_display_name("Order Extraction")
        .with_category(ToolCategory::Extraction)
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "order_text": {
                    "type": "string",
                    "description": "Free-form order text, e.g. \"2 Harrier to Pune\""
                }
            },
            "required": ["order_text"]
        }));

        Self { definition }
    }

    fn extract(text: &str) -> Result<serde_json::Value> {
        let p = patterns()?;

        let buyer_email = p.email.find(text).map(|m| m.as_str().to_string());
        let without_email = p.email.replace_all(text, " ");

        let model = p
            .model
            .captures(&without_email)
            .and_then(|c| c.get(1))
            .and_then(|m| canonical_model(m.as_str()));

        let quantity = p
            .quantity
            .captures(&without_email)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .filter(|q| *q > 0);

        let delivery_location = p
            .location
            .captures_iter(&without_email)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .find(|loc| canonical_model(loc).is_none());

        let mut missing = Vec::new();
        if model.is_none() {
            missing.push("model");
        }
        if quantity.is_none() {
            missing.push("quantity");
        }
        if delivery_location.is_none() {
            missing.push("delivery_location");
        }

        Ok(serde_json::json!({
            "model": model,
            "quantity": quantity,
            "delivery_location": delivery_location,
            "buyer_email": buyer_email,
            "missing_fields": missing,
        }))
    }
}

impl Default for OrderExtractionTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingTool for OrderExtractionTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> Result<serde_json::Value> {
        let text = input
            .get("order_text")
            .or_else(|| input.get("text"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'order_text' parameter".to_string()))?;

        if text.trim().is_empty() {
            return Err(Error::InvalidInput("order text is empty".to_string()));
        }

        debug!(len = text.len(), "Extracting order fields");
        Self::extract(text)
    }
}
