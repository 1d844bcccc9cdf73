//! Shared data models for catalog records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column headers used by the retailer's catalog table.
pub mod columns {
    pub const SKU: &str = "Prenda / Sku Lote";
    pub const BRAND: &str = "Marca";
    pub const MODEL: &str = "Modelo";
    pub const DESCRIPTION: &str = "Descripción";
    pub const PROMO_PRICE: &str = "Precio Promoción";
    pub const KIND: &str = "Tipo";
}

/// A raw per-unit catalog record, exactly as scraped.
///
/// Nothing is validated here; the price is still the display string
/// (e.g. `"$ 6,599.00"`). Normalization happens in the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub sku: String,
    pub brand: String,
    pub model: String,
    pub description: String,
    pub price: String,
    pub branch: String,
    #[serde(default)]
    pub family: Option<String>,
    /// Catalog "Tipo" column (e.g. `con_reporte` for reported units)
    #[serde(default)]
    pub kind: Option<String>,
}

impl RawListing {
    /// Build a record from a parsed table row.
    pub fn from_row(row: &BTreeMap<String, String>, branch: &str, family: &str) -> Self {
        let field = |name: &str| row.get(name).map(|s| s.trim().to_string()).unwrap_or_default();
        let kind = field(columns::KIND);

        Self {
            sku: field(columns::SKU),
            brand: field(columns::BRAND),
            model: field(columns::MODEL),
            description: field(columns::DESCRIPTION),
            price: field(columns::PROMO_PRICE),
            branch: branch.trim().to_string(),
            family: Some(family.trim().to_string()).filter(|f| !f.is_empty()),
            kind: Some(kind).filter(|k| !k.is_empty()),
        }
    }
}
