//! Inventory tool - stock availability check

use super::catalog::{canonical_model, MODELS};
use crate::context::ToolContext;
use crate::error::{Error, Result};
use crate::registry::{Tool, ToolCategory, ToolDefinition};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Tool ID
pub const INVENTORY_TOOL: &str = "inventory_tool";

const DEFAULT_STOCK: &[(&str, u64)] = &[
    ("Harrier", 5),
    ("Safari", 2),
    ("GLA", 0),
    ("GLC", 3),
    ("C-Class", 10),
];

/// Checks whether the requested quantity of a model is in stock
pub struct InventoryTool {
    definition: ToolDefinition,
    stock: HashMap<&'static str, u64>,
    latency: Duration,
}

impl InventoryTool {
    /// Create a new inventory tool with the default stock levels
    #[must_use]
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            INVENTORY_TOOL,
            "Checks inventory availability for requested models",
        )
        .with_display_name("Inventory Check")
        .with_category(ToolCategory::Inventory)
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "model": {"type": "string", "description": "Car model requested"},
                "quantity": {"type": "integer", "description": "Quantity requested"}
            },
            "required": ["model", "quantity"]
        }));

        Self {
            definition,
            stock: DEFAULT_STOCK.iter().copied().collect(),
            latency: Duration::ZERO,
        }
    }

    /// Simulate a slow stock backend
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Override the stock level for a catalog model
    #[must_use]
    pub fn with_stock(mut self, model: &str, units: u64) -> Self {
        if let Some(model) = canonical_model(model) {
            self.stock.insert(model, units);
        }
        self
    }

    fn alternatives(&self, exclude: &str) -> Vec<&'static str> {
        MODELS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| *name != exclude && self.stock.get(name).copied().unwrap_or(0) > 0)
            .collect()
    }
}

impl Default for InventoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for InventoryTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let requested_model = input
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'model' parameter".to_string()))?;
        let quantity = input
            .get("quantity")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidInput("Missing 'quantity' parameter".to_string()))?;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let model = canonical_model(requested_model);
        let available = model
            .and_then(|m| self.stock.get(m).copied())
            .unwrap_or(0);
        let model_name = model.unwrap_or(requested_model);

        debug!(model = %model_name, quantity, available, "Checking inventory");

        let in_stock = available >= quantity && available > 0;
        let message = if available == 0 {
            format!("{model_name} is out of stock")
        } else if quantity > available {
            format!("Only {available}x {model_name} available")
        } else {
            format!("{quantity}x {model_name} available in stock")
        };

        Ok(serde_json::json!({
            "model": model_name,
            "requested": quantity,
            "available": available,
            "in_stock": in_stock,
            "alternatives": if in_stock { Vec::new() } else { self.alternatives(model_name) },
            "message": message,
        }))
    }
}
