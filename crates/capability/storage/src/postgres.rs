//! Postgres 时序写入实现

use crate::error::StorageError;
use crate::traits::MeasurementWriter;
use domain::Reading;
use sqlx::PgPool;

/// Postgres 时序读数写入器
///
/// 所有目标库共用一个连接池，目标库名作为 measurement 表的一列；
/// 一个批次在同一事务内写入。
pub struct PgMeasurementWriter {
    pub pool: PgPool,
}

impl PgMeasurementWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl MeasurementWriter for PgMeasurementWriter {
    async fn write_batch(
        &self,
        destination: &str,
        readings: &[Reading],
    ) -> Result<usize, StorageError> {
        if readings.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for reading in readings {
            sqlx::query(
                "insert into measurement (destination, iot, device, name, property, ts, value, quality) \
                 values ($1, $2, $3, $4, $5, to_timestamp($6), $7, $8)",
            )
            .bind(destination)
            .bind(&reading.iot)
            .bind(&reading.device)
            .bind(&reading.name)
            .bind(&reading.property)
            .bind(reading.ts)
            .bind(reading.value.as_text())
            .bind(reading.quality)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(readings.len())
    }
}
