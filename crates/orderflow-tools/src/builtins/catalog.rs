//! Vehicle catalog shared by the order tools.

/// Known models with their unit price in USD.
pub const MODELS: &[(&str, u64)] = &[
    ("Harrier", 25_000),
    ("Safari", 28_000),
    ("GLA", 40_000),
    ("GLC", 50_000),
    ("C-Class", 55_000),
];

/// Resolve a model name case-insensitively to its catalog spelling.
#[must_use]
pub fn canonical_model(name: &str) -> Option<&'static str> {
    let name = name.trim();
    MODELS
        .iter()
        .map(|(model, _)| *model)
        .find(|model| model.eq_ignore_ascii_case(name))
}

/// Unit price for a model, if it is in the catalog.
#[must_use]
pub fn unit_price(model: &str) -> Option<u64> {
    let model = canonical_model(model)?;
    MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, price)| *price)
}
