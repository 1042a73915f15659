//! Collaborator seams consumed by out-of-scope layers.
//!
//! The core never calls these itself; the alert-polling and route
//! layers do. They live here so those layers depend on a trait, not on
//! a vendor client.

use async_trait::async_trait;

use crate::models::setup::Setup;

/// Last trade / prior close lookup for a symbol.
#[async_trait]
pub trait PriceSnapshotProvider: Send + Sync {
    async fn last_trade_price(
        &self,
        symbol: &str,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>>;

    async fn previous_close(
        &self,
        symbol: &str,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Persistence adapter for setup records.
#[async_trait]
pub trait SetupStore: Send + Sync {
    async fn record_setup(
        &self,
        setup: &Setup,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn list_setups(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<Setup>, Box<dyn std::error::Error + Send + Sync>>;
}

pub struct PlaceholderPriceSnapshotProvider;

#[async_trait]
impl PriceSnapshotProvider for PlaceholderPriceSnapshotProvider {
    async fn last_trade_price(
        &self,
        _symbol: &str,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(None)
    }

    async fn previous_close(
        &self,
        _symbol: &str,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(None)
    }
}

pub struct PlaceholderSetupStore;

#[async_trait]
impl SetupStore for PlaceholderSetupStore {
    async fn record_setup(
        &self,
        _setup: &Setup,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    async fn list_setups(
        &self,
        _symbol: Option<&str>,
    ) -> Result<Vec<Setup>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Vec::new())
    }
}
