/// Product id → collection resolution
use std::collections::HashMap;

use tracing::warn;

use crate::state::provenance::parse_product_id;

/// Maps the hex product id found in provenance to a collection key
pub trait ProductRegistry: Send + Sync {
    fn resolve(&self, product_id_hex: &str) -> Option<String>;
}

/// Registry backed by a fixed table, usually built from the config file
#[derive(Debug, Clone, Default)]
pub struct ProductTable {
    products: HashMap<u32, String>,
}

impl ProductTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `collection_key` for the product with `product_id_hex`.
    /// Ids that are not hex are logged and ignored.
    pub fn with_product(mut self, product_id_hex: &str, collection_key: impl Into<String>) -> Self {
        match parse_product_id(product_id_hex) {
            Some(id) => {
                self.products.insert(id, collection_key.into());
            }
            None => warn!("Ignoring product with invalid id '{}'", product_id_hex),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ProductTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(ProductTable::new(), |table, (id, key)| table.with_product(id.as_ref(), key))
    }
}

impl ProductRegistry for ProductTable {
    fn resolve(&self, product_id_hex: &str) -> Option<String> {
        self.products.get(&parse_product_id(product_id_hex)?).cloned()
    }
}
