//! Scripted order workflow
//!
//! Stands in for an external planner: extracts the order, asks the client
//! for whatever is missing, then checks stock, prices and plans delivery.

use orderflow_core::{Error, OrderRequest, Result, ToolBridge, Workflow};
use orderflow_tools::builtins::{
    canonical_model, CLARIFICATION_TOOL, INVENTORY_TOOL, LOGISTICS_TOOL, MODELS,
    ORDER_EXTRACTION_TOOL, PRICING_TOOL,
};
use orderflow_tools::RunContext;
use serde_json::{json, Value};
use tracing::info;

/// Extraction, inventory, pricing and logistics
const BASE_STEPS: u32 = 4;

const DECLINE: &str = "Cancel order";

/// Fixed five-phase order pipeline
#[derive(Debug, Default)]
pub struct ScriptedOrderWorkflow;

impl ScriptedOrderWorkflow {
    pub fn new() -> Self {
        Self
    }
}

impl Workflow for ScriptedOrderWorkflow {
    fn name(&self) -> &str {
        "scripted_order"
    }

    fn execute(&self, ctx: &RunContext, order: &OrderRequest, bridge: &ToolBridge) -> Result<Value> {
        bridge.report_phase(ctx, "extraction", "Extracting order details");
        let extracted = bridge.run(
            ORDER_EXTRACTION_TOOL,
            Some(ctx),
            json!({"order_text": order.order_text}),
        )?;

        let missing: Vec<String> = extracted["missing_fields"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        bridge.set_total_steps(ctx, BASE_STEPS + missing.len() as u32);

        let mut details = OrderDetails::from_extraction(&extracted);
        if !missing.is_empty() {
            bridge.report_phase(ctx, "clarification", "Asking for missing order details");
            for field in &missing {
                let answer = ask(bridge, ctx, field)?;
                details.apply(field, &answer)?;
            }
        }
        let (model, quantity, location) = details.complete()?;

        bridge.report_phase(ctx, "inventory", "Checking stock");
        let (model, stock) = check_stock(bridge, ctx, model, quantity)?;

        bridge.report_phase(ctx, "pricing", "Calculating order total");
        let pricing = bridge.run(
            PRICING_TOOL,
            Some(ctx),
            json!({"model": model, "quantity": quantity}),
        )?;

        bridge.report_phase(ctx, "logistics", "Planning delivery");
        let mut logistics_args = json!({"quantity": quantity, "delivery_location": location});
        if let Some(urgency) = order.options.extra.get("urgency") {
            logistics_args["urgency"] = urgency.clone();
        }
        let logistics = bridge.run(LOGISTICS_TOOL, Some(ctx), logistics_args)?;

        info!(run_id = %ctx.run_id, model = %model, quantity, "Order planned");
        Ok(json!({
            "order": {
                "model": model,
                "quantity": quantity,
                "delivery_location": location,
                "buyer_email": extracted["buyer_email"],
            },
            "inventory": stock,
            "pricing": pricing,
            "logistics": logistics,
        }))
    }
}

#[derive(Debug, Default)]
struct OrderDetails {
    model: Option<String>,
    quantity: Option<u64>,
    location: Option<String>,
}

impl OrderDetails {
    fn from_extraction(extracted: &Value) -> Self {
        Self {
            model: extracted["model"].as_str().map(str::to_string),
            quantity: extracted["quantity"].as_u64(),
            location: extracted["delivery_location"].as_str().map(str::to_string),
        }
    }

    fn apply(&mut self, field: &str, answer: &str) -> Result<()> {
        let answer = answer.trim();
        match field {
            "model" => {
                let model = canonical_model(answer)
                    .ok_or_else(|| Error::Workflow(format!("Unknown model: {answer}")))?;
                self.model = Some(model.to_string());
            }
            "quantity" => {
                let quantity = answer
                    .parse::<u64>()
                    .ok()
                    .filter(|q| *q > 0)
                    .ok_or_else(|| Error::Workflow(format!("Invalid quantity: {answer}")))?;
                self.quantity = Some(quantity);
            }
            "delivery_location" if !answer.is_empty() => self.location = Some(answer.to_string()),
            _ => return Err(Error::Workflow(format!("No usable answer for {field}"))),
        }
        Ok(())
    }

    fn complete(self) -> Result<(String, u64, String)> {
        match (self.model, self.quantity, self.location) {
            (Some(model), Some(quantity), Some(location)) => Ok((model, quantity, location)),
            _ => Err(Error::Workflow("Order details are incomplete".to_string())),
        }
    }
}

fn ask(bridge: &ToolBridge, ctx: &RunContext, field: &str) -> Result<String> {
    let mut args = json!({
        "question": question_for(field),
        "context": {"missing_field": field},
    });
    if field == "model" {
        args["options"] = json!(MODELS.iter().map(|(name, _)| *name).collect::<Vec<_>>());
    }
    let answer = bridge.run(CLARIFICATION_TOOL, Some(ctx), args)?;
    Ok(answer.as_str().unwrap_or_default().to_string())
}

fn question_for(field: &str) -> String {
    match field {
        "model" => "Which model would you like to order?".to_string(),
        "quantity" => "How many units do you need?".to_string(),
        "delivery_location" => "What is your delivery location?".to_string(),
        other => format!("Please provide the {other}"),
    }
}

/// Check stock, offering in-stock alternatives once if the model is short.
fn check_stock(
    bridge: &ToolBridge,
    ctx: &RunContext,
    model: String,
    quantity: u64,
) -> Result<(String, Value)> {
    let stock = bridge.run(
        INVENTORY_TOOL,
        Some(ctx),
        json!({"model": model, "quantity": quantity}),
    )?;
    if stock["in_stock"].as_bool() == Some(true) {
        return Ok((model, stock));
    }

    let mut options: Vec<String> = stock["alternatives"]
        .as_array()
        .map(|alts| alts.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let message = stock["message"].as_str().unwrap_or("Requested model unavailable");
    if options.is_empty() {
        return Err(Error::Workflow(message.to_string()));
    }
    options.push(DECLINE.to_string());

    let answer = bridge.run_as(
        CLARIFICATION_TOOL,
        &format!("{CLARIFICATION_TOOL}:alternative"),
        Some(ctx),
        json!({
            "question": format!("{message}. Would you like an alternative model?"),
            "options": options,
            "context": {"requested_model": model, "requested_quantity": quantity},
        }),
    )?;
    let choice = answer.as_str().unwrap_or(DECLINE);
    if choice == DECLINE {
        return Err(Error::Workflow(format!("{message}; order declined")));
    }

    let alternative = bridge.run_as(
        INVENTORY_TOOL,
        &format!("{INVENTORY_TOOL}:{choice}"),
        Some(ctx),
        json!({"model": choice, "quantity": quantity}),
    )?;
    if alternative["in_stock"].as_bool() != Some(true) {
        let message = alternative["message"].as_str().unwrap_or("Alternative unavailable");
        return Err(Error::Workflow(message.to_string()));
    }
    Ok((choice.to_string(), alternative))
}
