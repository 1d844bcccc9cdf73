//! Retailer catalog client.
//!
//! The catalog endpoint is paginated (50 rows per page) and answers every
//! page with a JSON envelope `{ "tabla": "<table>...", "rowCount": N }`.
//! Rows are extracted with [`crate::table::parse_table`].

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Branch, Config};
use crate::images::ImageListing;
use crate::models::RawListing;
use crate::table::parse_table;

/// Rows per catalog page (fixed by the retailer backend).
pub const PAGE_SIZE: usize = 50;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Snapshot I/O failed: {0}")]
    SnapshotIo(#[from] std::io::Error),
}

/// One page of catalog results.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPage {
    /// Server-rendered result table
    #[serde(default)]
    pub tabla: Option<String>,
    /// Total matching rows; the backend sends it as a number or a string
    #[serde(rename = "rowCount", default)]
    pub row_count: Option<serde_json::Value>,
}

impl CatalogPage {
    /// Total rows across all pages (0 when missing or malformed).
    pub fn total_rows(&self) -> usize {
        match &self.row_count {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Number of pages implied by the row count.
    pub fn total_pages(&self) -> usize {
        self.total_rows().div_ceil(PAGE_SIZE)
    }

    fn has_table(&self) -> bool {
        self.tabla.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Catalog API client.
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    /// Directory of the endpoint; image hrefs are relative to it
    image_base_url: String,
}

impl CatalogClient {
    /// Create a new catalog client.
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.catalog_api_url.clone(),
            image_base_url: endpoint_dir(&config.catalog_api_url),
        }
    }

    /// Fetch a single page for a branch and family.
    pub async fn fetch_page(
        &self,
        page: usize,
        family: &str,
        branch_id: &str,
    ) -> Result<CatalogPage, CatalogError> {
        debug!(
            "[CATALOG] Fetching page {} of {} for branch {}",
            page, family, branch_id
        );

        let response = self
            .client
            .post(&self.base_url)
            .query(&[
                ("metodo", "consulta_catalogo"),
                ("salida", "res"),
                ("id_sucursal", branch_id),
                ("ramo", ""),
                ("familia", family),
                ("tipo", ""),
                ("prenda", ""),
                ("marca", ""),
                ("modelo", ""),
                ("descripcion", ""),
                ("col_order", ""),
            ])
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&[("pagina", page.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::ApiError(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        // The backend labels its JSON as text/html, so decode by hand.
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| CatalogError::ParseError(e.to_string()))
    }

    /// Fetch the product image URLs of one SKU.
    pub async fn fetch_images(&self, sku: &str) -> Result<Vec<String>, CatalogError> {
        debug!("[CATALOG] Fetching images for {}", sku);

        let response = self
            .client
            .post(&self.base_url)
            .query(&[("metodo", "guardayMuestaImagenes"), ("prenda", sku)])
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CatalogError::ApiError(format!(
                "API returned status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let listing: ImageListing =
            serde_json::from_str(&body).map_err(|e| CatalogError::ParseError(e.to_string()))?;

        Ok(listing.urls(&self.image_base_url))
    }

    /// Fetch every listing of one family at one branch.
    ///
    /// A failing follow-up page is logged and skipped; only a failing
    /// first page fails the whole fetch.
    pub async fn fetch_branch(
        &self,
        branch: &Branch,
        family: &str,
    ) -> Result<Vec<RawListing>, CatalogError> {
        let first = self.fetch_page(1, family, &branch.id).await?;
        if !first.has_table() {
            debug!("[CATALOG] No {} listings at {}", family, branch.name);
            return Ok(Vec::new());
        }

        let total_pages = first.total_pages();
        let mut listings = page_listings(&first, branch, family);

        for page in 2..=total_pages {
            match self.fetch_page(page, family, &branch.id).await {
                Ok(p) => listings.extend(page_listings(&p, branch, family)),
                Err(e) => warn!(
                    "[CATALOG] Page {}/{} of {} at {} failed: {}",
                    page, total_pages, family, branch.name, e
                ),
            }
        }

        debug!(
            "[CATALOG] {} {} listings at {} ({} pages)",
            listings.len(),
            family,
            branch.name,
            total_pages.max(1)
        );
        Ok(listings)
    }

    /// Fetch all families at all branches, sequentially.
    ///
    /// Failures are per branch/family: they are logged and the scan continues.
    pub async fn fetch_all(&self, branches: &[Branch], families: &[String]) -> Vec<RawListing> {
        let mut all = Vec::new();

        for branch in branches {
            for family in families {
                match self.fetch_branch(branch, family).await {
                    Ok(listings) => all.extend(listings),
                    Err(e) => warn!(
                        "[CATALOG] Failed to fetch {} at {} ({}): {}",
                        family, branch.name, branch.id, e
                    ),
                }
            }
        }

        info!(
            "[CATALOG] Fetched {} listings from {} branches",
            all.len(),
            branches.len()
        );
        all
    }
}

/// `https://host/catalogo/consulta.php` -> `https://host/catalogo`.
fn endpoint_dir(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((dir, _)) if !dir.ends_with('/') => dir.to_string(),
        _ => url.trim_end_matches('/').to_string(),
    }
}

fn page_listings(page: &CatalogPage, branch: &Branch, family: &str) -> Vec<RawListing> {
    page.tabla
        .as_deref()
        .map(parse_table)
        .unwrap_or_default()
        .iter()
        .map(|row| RawListing::from_row(row, &branch.name, family))
        .collect()
}

/// On-disk copy of the last catalog scan.
///
/// A full scan hits every branch and family, so cycles reuse a recent
/// snapshot instead of refetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub listings: Vec<RawListing>,
}

impl CatalogSnapshot {
    pub fn new(listings: Vec<RawListing>) -> Self {
        Self {
            fetched_at: Utc::now(),
            listings,
        }
    }

    /// Load a snapshot. Missing or unreadable files yield `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "[CATALOG] Ignoring unreadable snapshot {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write the snapshot via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let json = serde_json::to_string(self).map_err(|e| CatalogError::ParseError(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Whether the snapshot is younger than `max_age` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.fetched_at < max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn page(json: &str) -> CatalogPage {
        serde_json::from_str(json).unwrap()
    }

    // ============ CatalogPage TESTS ============

    #[test]
    fn test_row_count_as_number() {
        let p = page(r#"{"tabla":"<table></table>","rowCount":120}"#);
        assert_eq!(p.total_rows(), 120);
        assert_eq!(p.total_pages(), 3);
    }

    #[test]
    fn test_row_count_as_string() {
        let p = page(r#"{"tabla":"<table></table>","rowCount":"50"}"#);
        assert_eq!(p.total_pages(), 1);
    }

    #[test]
    fn test_missing_row_count_means_no_pages() {
        let p = page(r#"{"tabla":""}"#);
        assert_eq!(p.total_pages(), 0);
        assert!(!p.has_table());
    }

    #[test]
    fn test_page_listings_tags_branch_and_family() {
        let p = page(
            r#"{"tabla":"<table><tr><th>Prenda / Sku Lote</th><th>Marca</th></tr><tr><td>77</td><td>LG</td></tr></table>","rowCount":1}"#,
        );
        let branch = Branch {
            id: "101".to_string(),
            name: "Centro".to_string(),
        };

        let listings = page_listings(&p, &branch, "MONITORES");

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].sku, "77");
        assert_eq!(listings[0].brand, "LG");
        assert_eq!(listings[0].branch, "Centro");
        assert_eq!(listings[0].family.as_deref(), Some("MONITORES"));
    }

    #[test]
    fn test_endpoint_dir_strips_script_name() {
        assert_eq!(
            endpoint_dir("https://efectimundo.com.mx/catalogo/consulta_catalogo.php"),
            "https://efectimundo.com.mx/catalogo"
        );
        assert_eq!(endpoint_dir("https://example.com"), "https://example.com");
    }

    // ============ CatalogSnapshot TESTS ============

    #[test]
    fn test_snapshot_freshness() {
        let mut snapshot = CatalogSnapshot::new(Vec::new());
        let now = Utc::now();
        snapshot.fetched_at = now - ChronoDuration::hours(5);

        assert!(snapshot.is_fresh(now, ChronoDuration::hours(6)));
        assert!(!snapshot.is_fresh(now, ChronoDuration::hours(4)));
    }

    #[test]
    fn test_snapshot_save_and_load() {
        let path = std::env::temp_dir().join(format!("catalog-snapshot-{}.json", std::process::id()));
        let listing = RawListing {
            sku: "1".to_string(),
            brand: "APPLE".to_string(),
            model: "A2633".to_string(),
            description: "iPhone".to_string(),
            price: "$ 1,000.00".to_string(),
            branch: "Centro".to_string(),
            family: None,
            kind: None,
        };

        CatalogSnapshot::new(vec![listing.clone()]).save(&path).unwrap();
        let loaded = CatalogSnapshot::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.listings, vec![listing]);
    }

    #[test]
    fn test_snapshot_load_corrupt_file_is_none() {
        let path = std::env::temp_dir().join(format!("catalog-corrupt-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();

        assert!(CatalogSnapshot::load(&path).is_none());
        std::fs::remove_file(&path).ok();
    }
}
