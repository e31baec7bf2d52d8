//! Static registry of tracked products.
//!
//! The registry is loaded once at startup and then passed by reference to
//! the parser and the aggregator. Entry order is significant: when a message
//! carries several registered tags, the earliest entry wins.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RestockError, Result};

/// One tracked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEntry {
    /// Stable identifier, e.g. `"RTX3080"`.
    pub product_id: String,
    /// Human-readable name for reports.
    pub display_name: String,
    /// Tag that marks a message as a restock of this product, e.g. `"#RTX3080"`.
    pub match_tag: String,
}

impl ProductEntry {
    pub fn new(
        product_id: impl Into<String>,
        display_name: impl Into<String>,
        match_tag: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            display_name: display_name.into(),
            match_tag: match_tag.into(),
        }
    }
}

/// Ordered, validated set of [`ProductEntry`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ProductEntry>", into = "Vec<ProductEntry>")]
pub struct ProductRegistry {
    entries: Vec<ProductEntry>,
}

impl ProductRegistry {
    /// Build a registry, rejecting empty input, blank fields, and duplicate
    /// ids or tags (tags compare case-insensitively).
    pub fn new(entries: Vec<ProductEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(RestockError::InvalidRegistry(
                "registry has no products".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut tags = HashSet::new();
        for entry in &entries {
            if entry.product_id.trim().is_empty() {
                return Err(RestockError::InvalidRegistry(
                    "product_id must not be blank".to_string(),
                ));
            }
            if entry.match_tag.trim().is_empty() || entry.match_tag.chars().any(char::is_whitespace) {
                return Err(RestockError::InvalidRegistry(format!(
                    "match_tag for {} must be a single non-blank token",
                    entry.product_id
                )));
            }
            if !ids.insert(entry.product_id.as_str()) {
                return Err(RestockError::InvalidRegistry(format!(
                    "duplicate product_id {}",
                    entry.product_id
                )));
            }
            if !tags.insert(entry.match_tag.to_lowercase()) {
                return Err(RestockError::InvalidRegistry(format!(
                    "duplicate match_tag {}",
                    entry.match_tag
                )));
            }
        }

        Ok(Self { entries })
    }

    /// The products tracked when no registry file is given.
    pub fn default_products() -> Self {
        Self {
            entries: vec![
                ProductEntry::new("RTX3070", "GeForce RTX 3070", "#RTX3070"),
                ProductEntry::new("RTX3080", "GeForce RTX 3080", "#RTX3080"),
            ],
        }
    }

    /// Load a registry from a JSON array of entries.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RestockError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<ProductEntry> = serde_json::from_str(&content).map_err(|e| {
            RestockError::InvalidRegistry(format!("{}: {}", path.display(), e))
        })?;
        Self::new(entries)
    }

    /// Load from `path` when given, otherwise fall back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(p),
            None => Ok(Self::default_products()),
        }
    }

    pub fn entries(&self) -> &[ProductEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by product id.
    pub fn get(&self, product_id: &str) -> Option<&ProductEntry> {
        self.entries.iter().find(|e| e.product_id == product_id)
    }

    /// Display name for `product_id`, or the id itself when unregistered.
    pub fn display_name<'a>(&'a self, product_id: &'a str) -> &'a str {
        self.get(product_id)
            .map(|e| e.display_name.as_str())
            .unwrap_or(product_id)
    }

    /// Search query selecting messages from `account` carrying any registered tag.
    ///
    /// ```
    /// use restock_core::registry::ProductRegistry;
    ///
    /// let registry = ProductRegistry::default_products();
    /// assert_eq!(
    ///     registry.search_query("SnailMonitor"),
    ///     "from:SnailMonitor (#RTX3070 OR #RTX3080)"
    /// );
    /// ```
    pub fn search_query(&self, account: &str) -> String {
        let tags: Vec<&str> = self.entries.iter().map(|e| e.match_tag.as_str()).collect();
        format!("from:{} ({})", account, tags.join(" OR "))
    }
}

impl TryFrom<Vec<ProductEntry>> for ProductRegistry {
    type Error = RestockError;

    fn try_from(entries: Vec<ProductEntry>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<ProductRegistry> for Vec<ProductEntry> {
    fn from(registry: ProductRegistry) -> Self {
        registry.entries
    }
}
