use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::concurrency::{RecordKind, VersionToken, VersionedRecord};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    Normal,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfStock => "out_of_stock",
            Self::LowStock => "low_stock",
            Self::Normal => "normal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "out_of_stock" => Some(Self::OutOfStock),
            "low_stock" => Some(Self::LowStock),
            "normal" => Some(Self::Normal),
            _ => None,
        }
    }

    pub fn derive(quantity: Decimal, low_stock_threshold: Decimal) -> Self {
        if quantity <= Decimal::ZERO {
            Self::OutOfStock
        } else if quantity <= low_stock_threshold {
            Self::LowStock
        } else {
            Self::Normal
        }
    }
}

/// A consumable (reagent, standard sample) with a shared on-hand count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
    pub low_stock_threshold: Decimal,
    pub status: StockStatus,
    pub version: VersionToken,
}

impl StockItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        quantity: Decimal,
        low_stock_threshold: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit: unit.into(),
            quantity,
            low_stock_threshold,
            status: StockStatus::derive(quantity, low_stock_threshold),
            version: VersionToken::now(),
        }
    }

    /// Applies `delta`, refusing to go below zero.
    pub fn adjust(&mut self, delta: Decimal) -> Result<(), WorkflowError> {
        let next = self.quantity + delta;
        if next < Decimal::ZERO {
            return Err(WorkflowError::InsufficientStock {
                id: self.id.clone(),
                available: self.quantity,
                requested: -delta,
            });
        }
        self.quantity = next;
        self.status = StockStatus::derive(self.quantity, self.low_stock_threshold);
        Ok(())
    }
}

/// Registration input. A missing threshold falls back to the configured
/// default.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewStockItem {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub low_stock_threshold: Option<Decimal>,
}

impl NewStockItem {
    pub fn into_item(self, default_threshold: Decimal) -> Result<StockItem, WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::invalid_input("id", "must not be blank"));
        }
        if self.quantity.is_sign_negative() {
            return Err(WorkflowError::invalid_input("quantity", "must not be negative"));
        }
        let threshold = self.low_stock_threshold.unwrap_or(default_threshold);
        if threshold.is_sign_negative() {
            return Err(WorkflowError::invalid_input("low_stock_threshold", "must not be negative"));
        }
        Ok(StockItem::new(self.id.trim(), self.name, self.unit, self.quantity, threshold))
    }
}

impl VersionedRecord for StockItem {
    const KIND: RecordKind = RecordKind::StockItem;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> VersionToken {
        self.version
    }

    fn set_version(&mut self, version: VersionToken) {
        self.version = version;
    }

    fn refresh_derived(&mut self) {
        self.status = StockStatus::derive(self.quantity, self.low_stock_threshold);
    }
}
