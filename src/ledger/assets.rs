//! Asset Registry
//!
//! Tracks the assets the vault accepts, their current prices, and the
//! volatility guard applied to price updates. A registered asset never
//! has a zero price.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::LedgerError;
use crate::types::{Asset, AssetId};

/// Registry of accepted assets
#[derive(Clone, Default)]
pub struct AssetRegistry {
    assets: Arc<RwLock<HashMap<AssetId, Asset>>>,
}

impl AssetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new asset
    pub async fn register(&self, asset: Asset) -> Result<(), LedgerError> {
        if asset.price == 0 {
            return Err(LedgerError::PriceIsZero(asset.id.clone()));
        }

        let mut assets = self.assets.write().await;
        if assets.contains_key(&asset.id) {
            return Err(LedgerError::AlreadyRegistered(asset.id));
        }

        assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    /// Remove an asset. The caller is responsible for verifying no pool or
    /// staked funds remain.
    pub async fn remove(&self, id: &str) -> Result<Asset, LedgerError> {
        self.assets
            .write()
            .await
            .remove(id)
            .ok_or_else(|| LedgerError::UnsupportedAsset(id.to_string()))
    }

    /// Update an asset's price
    ///
    /// A relative move larger than the asset's volatility threshold fails
    /// and leaves the stored price unchanged.
    pub async fn update_price(&self, id: &str, new_price: u128) -> Result<(), LedgerError> {
        if new_price == 0 {
            return Err(LedgerError::PriceIsZero(id.to_string()));
        }

        let mut assets = self.assets.write().await;
        let asset = assets
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnsupportedAsset(id.to_string()))?;

        let diff = asset.price.abs_diff(new_price);
        if diff * 10_000 > asset.price * asset.volatility_threshold_bps as u128 {
            return Err(LedgerError::PriceChangeExceedsGuard {
                asset: asset.id.clone(),
                old_price: asset.price,
                new_price,
                max_bps: asset.volatility_threshold_bps,
            });
        }

        asset.price = new_price;
        Ok(())
    }

    /// Get an asset by id
    pub async fn get(&self, id: &str) -> Option<Asset> {
        self.assets.read().await.get(id).cloned()
    }

    /// Whether an asset is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.assets.read().await.contains_key(id)
    }

    /// All registered assets
    pub async fn all(&self) -> Vec<Asset> {
        self.assets.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PRICE_SCALE;

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = AssetRegistry::new();
        registry
            .register(Asset::new("tokA", 18, PRICE_SCALE, 500))
            .await
            .unwrap();

        let asset = registry.get("tokA").await.unwrap();
        assert_eq!(asset.decimals, 18);
        assert!(registry.contains("tokA").await);
        assert!(!registry.contains("tokB").await);
    }

    #[tokio::test]
    async fn test_zero_price_rejected() {
        let registry = AssetRegistry::new();
        let result = registry.register(Asset::new("tokA", 18, 0, 500)).await;
        assert!(matches!(result, Err(LedgerError::PriceIsZero(_))));
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = AssetRegistry::new();
        registry
            .register(Asset::new("tokA", 18, PRICE_SCALE, 500))
            .await
            .unwrap();

        let result = registry.register(Asset::new("tokA", 18, PRICE_SCALE, 500)).await;
        assert!(matches!(result, Err(LedgerError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_volatility_guard() {
        let registry = AssetRegistry::new();
        // 5% guard
        registry
            .register(Asset::new("tokA", 18, PRICE_SCALE, 500))
            .await
            .unwrap();

        // 4% move passes
        let four_up = PRICE_SCALE + PRICE_SCALE * 4 / 100;
        registry.update_price("tokA", four_up).await.unwrap();
        assert_eq!(registry.get("tokA").await.unwrap().price, four_up);

        // 10% move from the new price fails and leaves the price unchanged
        let ten_up = four_up + four_up / 10;
        let result = registry.update_price("tokA", ten_up).await;
        assert!(matches!(
            result,
            Err(LedgerError::PriceChangeExceedsGuard { .. })
        ));
        assert_eq!(registry.get("tokA").await.unwrap().price, four_up);

        // Zero price always fails
        let result = registry.update_price("tokA", 0).await;
        assert!(matches!(result, Err(LedgerError::PriceIsZero(_))));
    }
}
