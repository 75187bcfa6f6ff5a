use super::{
    PriceSink, commit_failure, insert_failure, rollback_with, sql_literal, stats_from_rows,
    unavailable,
};
use crate::config::{AREA_MAX_LEN, SinkBackend, SinkConfig};
use crate::error::{PipelineError, Result};
use crate::types::{PriceTable, SinkStats, StoredPrice};
use crate::utils::round_to_cents;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{MySql, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// MySQL-backed sink. Prices are stored as `DECIMAL(10,2)`.
pub struct MySqlSink {
    pool: MySqlPool,
    table: String,
    default_area: String,
    batch_size: usize,
    description: String,
    write_lock: Mutex<()>,
}

impl MySqlSink {
    pub fn new(config: &SinkConfig, insert_batch_size: usize) -> Result<Self> {
        let SinkBackend::MySql(settings) = &config.backend else {
            return Err(PipelineError::InvalidConfig(
                "MySqlSink requires a mysql backend".to_string(),
            ));
        };

        let connect_options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy_with(connect_options);

        Ok(Self {
            pool,
            table: config.table_name.clone(),
            default_area: config.default_area.clone(),
            batch_size: insert_batch_size.max(1),
            description: config.describe(),
            write_lock: Mutex::new(()),
        })
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS `{table}` (
                id BIGINT AUTO_INCREMENT PRIMARY KEY,
                date DATE NOT NULL,
                price DECIMAL(10,2) NOT NULL,
                area VARCHAR({area_len}) NULL DEFAULT {area},
                inserted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                INDEX idx_date (date),
                INDEX idx_price (price)
            )
            "#,
            table = self.table,
            area_len = AREA_MAX_LEN,
            area = sql_literal(&self.default_area),
        )
    }

    async fn write_rows(
        &self,
        tx: &mut Transaction<'static, MySql>,
        table: &PriceTable,
    ) -> Result<()> {
        let deleted = sqlx::query(&format!("DELETE FROM `{}`", self.table))
            .execute(&mut **tx)
            .await
            .map_err(insert_failure)?;
        debug!("Deleted {} existing rows", deleted.rows_affected());

        for chunk in table.records().chunks(self.batch_size) {
            let values = chunk
                .iter()
                .map(|r| Ok((r.date, price_to_decimal(r.price)?, r.area.as_str())))
                .collect::<Result<Vec<(NaiveDate, Decimal, &str)>>>()?;

            let mut builder: QueryBuilder<MySql> =
                QueryBuilder::new(format!("INSERT INTO `{}` (date, price, area) ", self.table));

            builder.push_values(values, |mut b, (date, price, area)| {
                b.push_bind(date).push_bind(price).push_bind(area);
            });

            builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(insert_failure)?;
        }

        Ok(())
    }
}

/// Fixed-point form of a price, rounded to cents.
fn price_to_decimal(price: f64) -> Result<Decimal> {
    let mut decimal = Decimal::from_f64(round_to_cents(price))
        .ok_or_else(|| PipelineError::InsertFailure(format!("price {} is not storable", price)))?;
    decimal.rescale(2);
    Ok(decimal)
}

fn row_to_stored(row: &MySqlRow) -> std::result::Result<StoredPrice, sqlx::Error> {
    let price: Decimal = row.try_get("price")?;
    Ok(StoredPrice {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        price: price.to_f64().unwrap_or(f64::NAN),
        area: row.try_get("area")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

#[async_trait]
impl PriceSink for MySqlSink {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        debug!("Schema ensured for {}", self.table);
        Ok(())
    }

    async fn replace_all(&self, table: &PriceTable) -> Result<usize> {
        let _guard = self.write_lock.try_lock().map_err(|_| PipelineError::Busy)?;

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        if let Err(e) = self.write_rows(&mut tx, table).await {
            return Err(rollback_with(tx, e).await);
        }

        tx.commit().await.map_err(commit_failure)?;

        info!("Replaced {} with {} rows", self.table, table.len());
        Ok(table.len())
    }

    async fn query(&self, limit: Option<usize>) -> Result<Vec<StoredPrice>> {
        let mut sql = format!(
            "SELECT id, date, price, area, inserted_at FROM `{}` ORDER BY date DESC, id DESC",
            self.table
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.iter()
            .map(|row| row_to_stored(row).map_err(unavailable))
            .collect()
    }

    async fn stats(&self) -> Result<SinkStats> {
        let rows = self.query(None).await?;
        Ok(stats_from_rows(&rows))
    }
}
