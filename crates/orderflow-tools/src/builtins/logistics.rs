//! Logistics tool - shipping cost, ETA and emissions estimate

use crate::context::ToolContext;
use crate::error::{Error, Result};
use crate::registry::{Tool, ToolCategory, ToolDefinition};
use tracing::debug;

/// Tool ID
pub const LOGISTICS_TOOL: &str = "logistics_tool";

const HANDLING_FEE: f64 = 200.0;
const UNIT_WEIGHT_TON: f64 = 1.5;
const DEFAULT_DISTANCE_KM: u64 = 1000;

/// Distances in km from the Mumbai depot
const DISTANCES: &[(&str, u64)] = &[
    ("Mumbai", 0),
    ("Pune", 150),
    ("Bangalore", 840),
    ("Delhi", 1400),
    ("New Delhi", 1400),
    ("Singapore", 3900),
    ("Berlin", 6300),
    ("Tokyo", 6800),
    ("Paris", 7000),
    ("London", 7200),
    ("New York", 12500),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Road,
    Rail,
    Air,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "road" => Some(Self::Road),
            "rail" => Some(Self::Rail),
            "air" => Some(Self::Air),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Road => "road",
            Self::Rail => "rail",
            Self::Air => "air",
        }
    }

    /// USD per km per unit
    fn rate(self) -> f64 {
        match self {
            Self::Road => 2.5,
            Self::Rail => 1.8,
            Self::Air => 6.0,
        }
    }

    /// gCO2 per ton-km
    fn emission_factor(self) -> f64 {
        match self {
            Self::Road => 120.0,
            Self::Rail => 30.0,
            Self::Air => 600.0,
        }
    }

    fn base_eta_days(self, distance_km: u64) -> u64 {
        match self {
            Self::Road => distance_km / 500 + 2,
            Self::Rail => distance_km / 800 + 3,
            Self::Air => (distance_km / 2000 + 1).max(2),
        }
    }
}

struct Carrier {
    name: &'static str,
    cost_mult: f64,
    speed_mult: f64,
    emission_mult: f64,
}

const CARRIERS: &[Carrier] = &[
    Carrier { name: "DHL", cost_mult: 1.2, speed_mult: 0.9, emission_mult: 1.1 },
    Carrier { name: "FedEx", cost_mult: 1.1, speed_mult: 0.8, emission_mult: 1.0 },
    Carrier { name: "LocalFreight", cost_mult: 0.9, speed_mult: 1.2, emission_mult: 0.8 },
];

/// Look up the depot distance for a known location
#[must_use]
pub fn distance_to(location: &str) -> Option<u64> {
    let location = location.trim();
    DISTANCES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(location))
        .map(|(_, km)| *km)
}

/// Estimates shipping for an order
pub struct LogisticsTool {
    definition: ToolDefinition,
}

impl LogisticsTool {
    /// Create a new logistics tool
    #[must_use]
    pub fn new() -> Self {
        let definition = ToolDefinition::new(
            LOGISTICS_TOOL,
            "Estimates shipping cost, ETA and CO2 emissions considering carrier and urgency",
        )
        .with_display_name("Logistics Planning")
        .with_category(ToolCategory::Logistics)
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "model": {"type": "string"},
                "quantity": {"type": "integer"},
                "delivery_location": {"type": "string"},
                "distance_km": {"type": "integer", "default": DEFAULT_DISTANCE_KM},
                "urgency": {"type": "string", "enum": ["normal", "urgent"], "default": "normal"},
                "preferred_mode": {"type": "string", "enum": ["road", "rail", "air"], "default": "road"},
                "carrier": {"type": "string", "enum": ["DHL", "FedEx", "LocalFreight"], "default": "DHL"}
            },
            "required": ["quantity"]
        }));

        Self { definition }
    }
}

impl Default for LogisticsTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Tool for LogisticsTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let quantity = input
            .get("quantity")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidInput("Missing 'quantity' parameter".to_string()))?;
        let location = input
            .get("delivery_location")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let urgent = input.get("urgency").and_then(|v| v.as_str()) == Some("urgent");

        let preferred = input
            .get("preferred_mode")
            .and_then(|v| v.as_str())
            .unwrap_or("road");
        let preferred = Mode::parse(preferred).ok_or_else(|| {
            Error::InvalidInput(format!(
                "Unknown transport mode: {preferred}. Valid: road, rail, air"
            ))
        })?;

        let carrier_name = input
            .get("carrier")
            .and_then(|v| v.as_str())
            .unwrap_or("DHL");
        let carrier = CARRIERS
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(carrier_name))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Unknown carrier: {carrier_name}. Valid: DHL, FedEx, LocalFreight"
                ))
            })?;

        let distance_km = distance_to(location).unwrap_or_else(|| {
            input
                .get("distance_km")
                .and_then(|v| v.as_u64())
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_DISTANCE_KM)
        });

        let mode = if urgent { Mode::Air } else { preferred };
        let units = quantity as f64;
        let distance = distance_km as f64;

        let mut cost = (HANDLING_FEE + mode.rate() * distance * units) * carrier.cost_mult;
        let mut eta_days =
            ((mode.base_eta_days(distance_km) as f64 * carrier.speed_mult) as u64).max(1);
        let emissions_kg = units * UNIT_WEIGHT_TON * distance * mode.emission_factor() / 1000.0
            * carrier.emission_mult;

        if urgent {
            eta_days = eta_days.saturating_sub(1).max(1);
            cost *= 1.15;
        }

        debug!(
            location = %location,
            distance_km,
            mode = mode.as_str(),
            carrier = carrier.name,
            "Planned shipment"
        );

        Ok(serde_json::json!({
            "delivery_location": location,
            "distance_km": distance_km,
            "mode": mode.as_str(),
            "carrier": carrier.name,
            "urgency": if urgent { "urgent" } else { "normal" },
            "eta_days": eta_days,
            "shipping_cost": (cost * 100.0).round() / 100.0,
            "emissions_kg": (emissions_kg * 10.0).round() / 10.0,
        }))
    }
}
