//! Product image lookup results and their on-disk cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::catalog::CatalogError;

/// Image listing answered by the catalog's image method.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageListing {
    #[serde(default)]
    pub estatus: serde_json::Value,
    #[serde(rename = "listaImagenes", default)]
    pub lista_imagenes: Vec<serde_json::Value>,
}

impl ImageListing {
    /// Absolute image URLs. Entries without an `href` are skipped and a
    /// falsy status yields nothing.
    ///
    /// Hrefs come back relative (`./imagenes/...`); leading dots are
    /// stripped and the result appended to `base`.
    pub fn urls(&self, base: &str) -> Vec<String> {
        if !is_truthy(&self.estatus) {
            return Vec::new();
        }

        let base = base.trim_end_matches('/');
        self.lista_imagenes
            .iter()
            .filter_map(|entry| entry.get("href")?.as_str())
            .map(|href| format!("{}{}", base, href.trim_start_matches('.')))
            .collect()
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        serde_json::Value::Null => false,
    }
}

/// SKU to image URLs, persisted as a JSON object.
///
/// An empty list is a cached "no images" answer, not a miss.
#[derive(Debug, Default)]
pub struct ImageCache {
    path: PathBuf,
    entries: BTreeMap<String, Vec<String>>,
}

impl ImageCache {
    /// Load the cache. Missing or unreadable files start empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(
                    "[IMAGES] Ignoring unreadable cache {}: {}",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, sku: &str) -> Option<&[String]> {
        self.entries.get(sku).map(Vec::as_slice)
    }

    pub fn insert(&mut self, sku: &str, urls: Vec<String>) {
        self.entries.insert(sku.to_string(), urls);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache via a temp file and rename.
    pub fn save(&self) -> Result<(), CatalogError> {
        let json = serde_json::to_string(&self.entries)
            .map_err(|e| CatalogError::ParseError(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://efectimundo.com.mx/catalogo";

    fn listing(json: &str) -> ImageListing {
        serde_json::from_str(json).unwrap()
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("image-cache-{}-{}.json", tag, std::process::id()))
    }

    // ============ ImageListing TESTS ============

    #[test]
    fn test_urls_prefix_relative_hrefs() {
        let l = listing(
            r#"{"estatus":true,"listaImagenes":[{"href":"./imagenes/1001_1.jpg"},{"href":"/imagenes/1001_2.jpg"}]}"#,
        );

        assert_eq!(
            l.urls(BASE),
            vec![
                "https://efectimundo.com.mx/catalogo/imagenes/1001_1.jpg",
                "https://efectimundo.com.mx/catalogo/imagenes/1001_2.jpg",
            ]
        );
    }

    #[test]
    fn test_urls_skip_entries_without_href() {
        let l = listing(r#"{"estatus":1,"listaImagenes":["x",{"src":"a"},{"href":"./b.jpg"}]}"#);
        assert_eq!(l.urls(BASE), vec![format!("{}/b.jpg", BASE)]);
    }

    #[test]
    fn test_urls_empty_on_false_status() {
        let l = listing(r#"{"estatus":false,"listaImagenes":[{"href":"./a.jpg"}]}"#);
        assert!(l.urls(BASE).is_empty());

        let l = listing(r#"{}"#);
        assert!(l.urls(BASE).is_empty());
    }

    // ============ ImageCache TESTS ============

    #[test]
    fn test_cache_save_and_load() {
        let path = temp_path("roundtrip");
        let mut cache = ImageCache::load(&path);
        assert!(cache.is_empty());

        cache.insert("1001", vec![format!("{}/a.jpg", BASE)]);
        cache.insert("1002", Vec::new());
        cache.save().unwrap();

        let loaded = ImageCache::load(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("1001").unwrap()[0], format!("{}/a.jpg", BASE));
        // A cached empty answer is still a hit
        assert_eq!(loaded.get("1002"), Some(&[][..]));
        assert!(loaded.get("1003").is_none());
    }

    #[test]
    fn test_cache_corrupt_file_starts_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "[not an object").unwrap();

        let cache = ImageCache::load(&path);
        std::fs::remove_file(&path).ok();

        assert!(cache.is_empty());
        assert_eq!(cache.path(), path.as_path());
    }
}
