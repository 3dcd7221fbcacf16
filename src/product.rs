use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::ChecksumAlgorithm;

/// Descriptor of a product to be transferred.
///
/// Derived sub-products (thumbnails, quicklooks) carry a `sub_product_tag`
/// and no trustworthy checksum; verification is skipped for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub uuid: Uuid,
    pub filename: String,
    pub declared_size: u64,
    #[serde(default)]
    pub checksum: Option<ProductChecksum>,
    #[serde(default)]
    pub sub_product_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductChecksum {
    pub algorithm: ChecksumAlgorithm,
    /// Hex digest, compared case-insensitively.
    pub value: String,
}

impl ProductInfo {
    pub fn new(filename: impl Into<String>, declared_size: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            filename: filename.into(),
            declared_size,
            checksum: None,
            sub_product_tag: None,
        }
    }

    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        self.checksum = Some(ProductChecksum {
            algorithm,
            value: value.into(),
        });
        self
    }

    pub fn with_sub_product_tag(mut self, tag: impl Into<String>) -> Self {
        self.sub_product_tag = Some(tag.into());
        self
    }

    /// Whether the final digest must be compared against a declared checksum.
    /// Derived sub-products never carry a trustworthy checksum.
    pub fn requires_verification(&self) -> bool {
        self.sub_product_tag.is_none() && self.checksum.is_some()
    }
}
