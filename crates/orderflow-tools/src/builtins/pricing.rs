//! Pricing tool - order total from catalog prices

use super::catalog::{canonical_model, unit_price};
use crate::context::ToolContext;
use crate::error::{Error, Result};
use crate::registry::{BlockingTool, ToolCategory, ToolDefinition};

/// Tool ID
pub const PRICING_TOOL: &str = "pricing_tool";

/// Calculates the total cost of an order
pub struct PricingTool {
    definition: ToolDefinition,
}

impl PricingTool {
    /// Create a new pricing tool
    #[must_use]
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            PRICING_TOOL,
            "Calculates total cost for the requested order",
        )
        .with_display_name("Pricing")
        .with_category(ToolCategory::Pricing)
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "model": {"type": "string", "description": "Car model name"},
                "quantity": {"type": "integer", "description": "Number of cars requested"}
            },
            "required": ["model", "quantity"]
        }));

        Self { definition }
    }
}

impl Default for PricingTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingTool for PricingTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> Result<serde_json::Value> {
        let model = input
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'model' parameter".to_string()))?;
        let quantity = input
            .get("quantity")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidInput("Missing 'quantity' parameter".to_string()))?;

        let price = unit_price(model)
            .ok_or_else(|| Error::InvalidInput(format!("Price not available for model {model}")))?;

        Ok(serde_json::json!({
            "model": canonical_model(model).unwrap_or(model),
            "quantity": quantity,
            "unit_price": price,
            "total": price.saturating_mul(quantity),
            "currency": "USD",
        }))
    }
}
