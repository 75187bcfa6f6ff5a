use super::{
    PriceSink, commit_failure, insert_failure, rollback_with, sql_literal, stats_from_rows,
    unavailable,
};
use crate::config::{AREA_MAX_LEN, SinkBackend, SinkConfig};
use crate::error::{PipelineError, Result};
use crate::types::{PriceTable, SinkStats, StoredPrice};
use crate::utils::round_to_cents;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// SQLite-backed sink, on a file or in memory.
///
/// Prices are stored as `REAL` rounded to cents; SQLite has no fixed-point
/// type.
pub struct SqliteSink {
    pool: SqlitePool,
    table: String,
    default_area: String,
    batch_size: usize,
    description: String,
    write_lock: Mutex<()>,
}

impl SqliteSink {
    pub fn new(config: &SinkConfig, insert_batch_size: usize) -> Result<Self> {
        let SinkBackend::Sqlite { path } = &config.backend else {
            return Err(PipelineError::InvalidConfig(
                "SqliteSink requires a sqlite backend".to_string(),
            ));
        };

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let in_memory = path.as_os_str() == ":memory:";

        let connect_options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        let connect_options = connect_options.busy_timeout(timeout);

        // An in-memory database lives exactly as long as its one connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(timeout)
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
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date DATE NOT NULL,
                price REAL NOT NULL,
                area VARCHAR({area_len}) DEFAULT {area},
                inserted_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            table = self.table,
            area_len = AREA_MAX_LEN,
            area = sql_literal(&self.default_area),
        )
    }

    fn create_index_sql(&self, column: &str) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
            table = self.table,
            column = column,
        )
    }

    async fn write_rows(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        table: &PriceTable,
    ) -> Result<()> {
        let deleted = sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&mut **tx)
            .await
            .map_err(insert_failure)?;
        debug!("Deleted {} existing rows", deleted.rows_affected());

        for chunk in table.records().chunks(self.batch_size) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {} (date, price, area) ", self.table));

            builder.push_values(chunk, |mut b, record| {
                b.push_bind(record.date)
                    .push_bind(round_to_cents(record.price))
                    .push_bind(record.area.as_str());
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

fn row_to_stored(row: &SqliteRow) -> std::result::Result<StoredPrice, sqlx::Error> {
    Ok(StoredPrice {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        price: row.try_get("price")?,
        area: row.try_get("area")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

#[async_trait]
impl PriceSink for SqliteSink {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        for column in ["date", "price"] {
            sqlx::query(&self.create_index_sql(column))
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;
        }

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
            "SELECT id, date, price, area, inserted_at FROM {} ORDER BY date DESC, id DESC",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalRecord;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table(prices: &[(u32, f64)]) -> PriceTable {
        prices
            .iter()
            .map(|&(day, price)| CanonicalRecord::new(date(2024, 1, day), price, "Finland"))
            .collect::<Vec<_>>()
            .into()
    }

    async fn memory_sink(batch_size: usize) -> SqliteSink {
        let sink = SqliteSink::new(&SinkConfig::sqlite_in_memory(), batch_size).unwrap();
        sink.ensure_schema().await.unwrap();
        sink
    }

    async fn stored_prices(sink: &SqliteSink) -> Vec<(NaiveDate, f64)> {
        sink.query(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.date, r.price))
            .collect()
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let sink = memory_sink(10).await;
        sink.replace_all(&table(&[(1, 10.0)])).await.unwrap();

        sink.ensure_schema().await.unwrap();
        sink.ensure_schema().await.unwrap();

        assert_eq!(stored_prices(&sink).await, vec![(date(2024, 1, 1), 10.0)]);
    }

    #[tokio::test]
    async fn test_replace_all_replaces_previous_content() {
        let sink = memory_sink(2).await;

        let written = sink
            .replace_all(&table(&[(1, 10.0), (2, 20.0), (3, 30.0)]))
            .await
            .unwrap();
        assert_eq!(written, 3);

        sink.replace_all(&table(&[(5, 50.0), (4, 40.0)]))
            .await
            .unwrap();

        assert_eq!(
            stored_prices(&sink).await,
            vec![(date(2024, 1, 5), 50.0), (date(2024, 1, 4), 40.0)]
        );
    }

    #[tokio::test]
    async fn test_replace_all_twice_is_idempotent() {
        let sink = memory_sink(500).await;
        let batch = table(&[(1, 10.0), (2, 20.0)]);

        sink.replace_all(&batch).await.unwrap();
        let first = stored_prices(&sink).await;
        sink.replace_all(&batch).await.unwrap();

        assert_eq!(stored_prices(&sink).await, first);
    }

    #[tokio::test]
    async fn test_prices_are_rounded_to_cents() {
        let sink = memory_sink(10).await;
        sink.replace_all(&table(&[(1, 10.126)])).await.unwrap();
        assert_eq!(stored_prices(&sink).await, vec![(date(2024, 1, 1), 10.13)]);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let sink = memory_sink(1).await;
        sink.replace_all(&table(&[(1, 10.0), (2, 20.0)]))
            .await
            .unwrap();
        let before = stored_prices(&sink).await;

        // SQLite stores NaN as NULL, which violates NOT NULL on the second batch.
        let err = sink
            .replace_all(&table(&[(3, 30.0), (4, f64::NAN)]))
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "INSERT_FAILURE");
        assert!(err.is_rolled_back());
        assert_eq!(stored_prices(&sink).await, before);
    }

    #[tokio::test]
    async fn test_replace_all_fails_fast_when_busy() {
        let sink = memory_sink(10).await;
        let guard = sink.write_lock.try_lock().unwrap();

        let err = sink.replace_all(&table(&[(1, 10.0)])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Busy));
        assert!(!err.is_rolled_back());

        drop(guard);
        assert_eq!(sink.replace_all(&table(&[(1, 10.0)])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_area_column_default() {
        let sink = memory_sink(10).await;
        sqlx::query("INSERT INTO electric_prices (date, price) VALUES ('2024-02-01', 1.5)")
            .execute(&sink.pool)
            .await
            .unwrap();

        let rows = sink.query(Some(1)).await.unwrap();
        assert_eq!(rows[0].area.as_deref(), Some("Finland"));
    }

    #[tokio::test]
    async fn test_query_limit_and_stats() {
        let sink = memory_sink(10).await;
        sink.replace_all(&table(&[(1, 10.0), (2, 20.0), (3, 60.0)]))
            .await
            .unwrap();

        let latest = sink.query(Some(2)).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].date, date(2024, 1, 3));

        let stats = sink.stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.first_date, Some(date(2024, 1, 1)));
        assert_eq!(stats.last_date, Some(date(2024, 1, 3)));
        assert_eq!(stats.average_price, Some(30.0));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig::sqlite(dir.path().join("prices.db"));

        {
            let sink = SqliteSink::new(&config, 10).unwrap();
            sink.ensure_schema().await.unwrap();
            sink.replace_all(&table(&[(1, 10.0)])).await.unwrap();
            sink.pool.close().await;
        }

        let reopened = SqliteSink::new(&config, 10).unwrap();
        assert_eq!(reopened.stats().await.unwrap().total_records, 1);
    }

    #[tokio::test]
    async fn test_unopenable_file_is_sink_unavailable() {
        let config =
            SinkConfig::sqlite("/definitely/not/a/dir/prices.db").with_connect_timeout_secs(1);
        let sink = SqliteSink::new(&config, 10).unwrap();

        let err = sink.ensure_schema().await.unwrap_err();
        assert_eq!(err.error_code(), "SINK_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_replace_without_connection_is_not_rolled_back() {
        let config =
            SinkConfig::sqlite("/definitely/not/a/dir/prices.db").with_connect_timeout_secs(1);
        let sink = SqliteSink::new(&config, 10).unwrap();

        let err = sink.replace_all(&table(&[(1, 10.0)])).await.unwrap_err();
        assert_eq!(err.error_code(), "SINK_UNAVAILABLE");
        assert!(!err.is_rolled_back());
    }
}
