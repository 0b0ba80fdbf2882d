//! Builtins - Built-in order tools for Orderflow
//!
//! - Extraction: order_extraction_tool (free text to structured order)
//! - Inventory: inventory_tool
//! - Pricing: pricing_tool
//! - Logistics: logistics_tool (cost, ETA and emissions)
//! - Clarification: clarification_tool (routed to the connected client)

mod catalog;
mod clarification;
mod inventory;
mod logistics;
mod order_extraction;
mod pricing;

pub use catalog::{canonical_model, unit_price, MODELS};
pub use clarification::{ClarificationTool, CLARIFICATION_TOOL, PROMPT_KEYS};
pub use inventory::{InventoryTool, INVENTORY_TOOL};
pub use logistics::{distance_to, LogisticsTool, LOGISTICS_TOOL};
pub use order_extraction::{OrderExtractionTool, ORDER_EXTRACTION_TOOL};
pub use pricing::{PricingTool, PRICING_TOOL};

use crate::registry::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools with the registry
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register_blocking(Arc::new(OrderExtractionTool::new()));
    registry.register(Arc::new(InventoryTool::new()));
    registry.register_blocking(Arc::new(PricingTool::new()));
    registry.register(Arc::new(LogisticsTool::new()));
    registry.register_blocking(Arc::new(ClarificationTool::new()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolCategory;

    #[test]
    fn test_register_builtins() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry);

        assert_eq!(registry.len(), 5);
        assert!(registry.has(ORDER_EXTRACTION_TOOL));
        assert!(registry.has(CLARIFICATION_TOOL));
        assert!(registry.get(INVENTORY_TOOL).map(|h| h.is_async()).unwrap_or(false));
        assert_eq!(registry.list_by_category(ToolCategory::Clarification).len(), 1);
    }
}
