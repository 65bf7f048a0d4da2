#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use toy_sales_core::{parse_sale_date, seed_sales, NewSale, SaleRecord};

pub const SALES_TABLE: &str = "sales";

const SCHEMA_SALES: &str = r"
DROP TABLE IF EXISTS sales;

CREATE TABLE sales (
  date TEXT,
  product_name TEXT NOT NULL,
  category TEXT NOT NULL,
  quantity INTEGER NOT NULL CHECK (quantity >= 0),
  price_per_unit REAL NOT NULL CHECK (price_per_unit >= 0),
  region TEXT NOT NULL
);
";

const SELECT_SALES_WITH_REVENUE: &str = "SELECT
    *,
    quantity * price_per_unit AS revenue
 FROM sales
 ORDER BY rowid ASC";

/// Outcome of [`ensure_store`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StoreInit {
    Created { rows: usize },
    AlreadyPresent,
}

pub struct SqliteSalesStore {
    conn: Connection,
}

impl SqliteSalesStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Replaces the `sales` table with `sales`, in one transaction.
    ///
    /// Every row is validated first; nothing is written when any row fails.
    pub fn replace_sales(&mut self, sales: &[NewSale]) -> Result<usize> {
        for (index, sale) in sales.iter().enumerate() {
            sale.validate()
                .map_err(|err| anyhow!("sale #{index} failed validation: {err}"))?;
        }

        let tx = self
            .conn
            .transaction()
            .context("failed to start seed transaction")?;

        tx.execute_batch(SCHEMA_SALES)
            .context("failed to create sales table")?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO sales(date, product_name, category, quantity, price_per_unit, region)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .context("failed to prepare sales insert")?;

            for sale in sales {
                stmt.execute(params![
                    sale.date,
                    sale.product_name,
                    sale.category,
                    sale.quantity,
                    sale.price_per_unit,
                    sale.region,
                ])
                .with_context(|| format!("failed to insert sale {}", sale.product_name))?;
            }
        }

        tx.commit().context("failed to commit seed transaction")?;
        Ok(sales.len())
    }

    /// Reads every sale with its revenue computed by the query.
    pub fn load_sales(&self) -> Result<Vec<SaleRecord>> {
        let mut stmt = self
            .conn
            .prepare(SELECT_SALES_WITH_REVENUE)
            .context("failed to prepare sales query")?;

        let rows = stmt.query_map([], parse_sale_row)?;
        let records = collect_rows(rows).context("failed to read sales rows")?;

        let undated = records.iter().filter(|record| record.date.is_none()).count();
        if undated > 0 {
            tracing::warn!(undated, "sales rows with unparseable dates were loaded without a date");
        }

        Ok(records)
    }

    #[cfg(test)]
    fn sales_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .context("failed to count sales rows")?;

        usize::try_from(count).with_context(|| format!("invalid sales row count: {count}"))
    }

    #[cfg(test)]
    fn has_sales_table(&self) -> Result<bool> {
        use rusqlite::OptionalExtension;

        let exists = self
            .conn
            .query_row(
                "SELECT 1
                 FROM sqlite_master
                 WHERE type = 'table' AND name = ?1
                 LIMIT 1",
                params![SALES_TABLE],
                |_| Ok(()),
            )
            .optional()
            .context("failed to query sqlite_master")?
            .is_some();

        Ok(exists)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Creates the store at `path` with the seed dataset unless the file already
/// exists. Existing files are left untouched, whatever they contain.
pub fn ensure_store(path: &Path) -> Result<StoreInit> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "sales store already present");
        return Ok(StoreInit::AlreadyPresent);
    }

    let mut store = SqliteSalesStore::open(path)?;
    let rows = store.replace_sales(&seed_sales())?;
    tracing::info!(path = %path.display(), rows, "sales store created");

    Ok(StoreInit::Created { rows })
}

/// Loads every sale from the store at `path`. The connection is closed
/// before returning.
pub fn load_data(path: &Path) -> Result<Vec<SaleRecord>> {
    let store = SqliteSalesStore::open(path)?;
    let records = store
        .load_sales()
        .with_context(|| format!("failed to load sales from {}", path.display()))?;
    tracing::info!(path = %path.display(), records = records.len(), "sales loaded");

    Ok(records)
}

fn parse_sale_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SaleRecord> {
    let date_raw: Option<String> = row.get("date")?;

    Ok(SaleRecord {
        date: date_raw.as_deref().and_then(parse_sale_date),
        product_name: row.get("product_name")?,
        category: row.get("category")?,
        quantity: row.get("quantity")?,
        price_per_unit: row.get("price_per_unit")?,
        region: row.get("region")?,
        revenue: row.get("revenue")?,
    })
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
