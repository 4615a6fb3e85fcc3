use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;

use signoff_core::concurrency::VersionToken;
use signoff_core::domain::stock::{StockItem, StockStatus};

use super::{column, RepositoryError, VersionedRepository};
use crate::DbPool;

pub struct SqlStockRepository {
    pool: DbPool,
}

impl SqlStockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<StockItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, unit, quantity, low_stock_threshold, status, updated_at
             FROM stock_item ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_item).collect()
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|e| RepositoryError::Decode(format!("invalid {field} `{value}`: {e}")))
}

fn row_to_item(row: &SqliteRow) -> Result<StockItem, RepositoryError> {
    let quantity: String = column(row, "quantity")?;
    let threshold: String = column(row, "low_stock_threshold")?;
    let status: String = column(row, "status")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(StockItem {
        id: column(row, "id")?,
        name: column(row, "name")?,
        unit: column(row, "unit")?,
        quantity: parse_decimal("quantity", &quantity)?,
        low_stock_threshold: parse_decimal("low_stock_threshold", &threshold)?,
        status: StockStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown stock status `{status}`")))?,
        version: VersionToken::parse(&updated_at)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid version `{updated_at}`")))?,
    })
}

#[async_trait]
impl VersionedRepository<StockItem> for SqlStockRepository {
    async fn find(&self, id: &str) -> Result<Option<StockItem>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, unit, quantity, low_stock_threshold, status, updated_at
             FROM stock_item WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn insert(&self, item: &StockItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO stock_item
                 (id, name, unit, quantity, low_stock_threshold, status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.unit)
        .bind(item.quantity.to_string())
        .bind(item.low_stock_threshold.to_string())
        .bind(item.status.as_str())
        .bind(item.version.to_storage())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::classify)?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        item: &StockItem,
        expected: VersionToken,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE stock_item
             SET name = ?, unit = ?, quantity = ?, low_stock_threshold = ?, status = ?,
                 updated_at = ?
             WHERE id = ? AND updated_at = ?",
        )
        .bind(&item.name)
        .bind(&item.unit)
        .bind(item.quantity.to_string())
        .bind(item.low_stock_threshold.to_string())
        .bind(item.status.as_str())
        .bind(item.version.to_storage())
        .bind(&item.id)
        .bind(expected.to_storage())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
