use std::{env, path::Path, time::Duration};

use anyhow::Result;
use log::info;
use serde_json::{Map, Value};
use thiserror::Error;

mod frame;
mod store;

pub use frame::{frame_to_rows, load_rows, NormalizeError, DATE_FORMAT};
pub use store::Supabase;

/// One record as sent to the table store.
pub type Row = Map<String, Value>;

pub const URL_VAR: &str = "SUPABASE_URL";
pub const KEY_VAR: &str = "SUPABASE_SERVICE_ROLE_KEY";

/// Column normalized to [`DATE_FORMAT`] in every dataset.
pub const DATE_COLUMN: &str = "fecha";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub url: String,
    pub key: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(URL_VAR).ok_or(ConfigError::Missing(URL_VAR))?;
        let key = lookup(KEY_VAR).ok_or(ConfigError::Missing(KEY_VAR))?;
        Ok(Self { url, key })
    }
}

/// A remote table accepting batched upserts.
#[allow(async_fn_in_trait)]
pub trait TableStore {
    /// Inserts `rows`, overwriting stored rows that share the values of the
    /// comma separated `on_conflict` columns.
    async fn upsert(&self, table: &str, rows: &[Row], on_conflict: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct Batching {
    pub chunk_size: usize,
    pub pause: Duration,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            pause: Duration::from_millis(200),
        }
    }
}

/// A parquet file and the table it is synced into.
#[derive(Clone, Copy, Debug)]
pub struct Dataset {
    pub file: &'static str,
    pub table: &'static str,
    pub unique: &'static str,
    /// Nullable columns that take part in `unique`; nulls become "".
    pub fill_empty: &'static [&'static str],
}

pub const DATASETS: [Dataset; 2] = [
    Dataset {
        file: "reservas.parquet",
        table: "bcb_reservas",
        unique: "tipo,fecha",
        fill_empty: &[],
    },
    Dataset {
        file: "datos.parquet",
        table: "bcb_semanal",
        unique: "categoria,variable,subvariable,fecha",
        fill_empty: &["subvariable"],
    },
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rows: usize,
    pub chunks: usize,
}

pub fn fill_empty(rows: &mut [Row], columns: &[&str]) {
    for row in rows {
        for &column in columns {
            let value = row.entry(column).or_insert(Value::Null);
            if value.is_null() {
                *value = Value::String(String::new());
            }
        }
    }
}

/// Upserts `rows` in chunks, pausing between them. A failed chunk aborts the
/// sync; chunks sent before it stay stored.
pub async fn sync_rows<T: TableStore>(
    store: &T,
    table: &str,
    unique: &str,
    rows: &[Row],
    batching: &Batching,
) -> Result<SyncReport> {
    info!("saving {table}: {} rows", rows.len());
    let mut report = SyncReport::default();

    for chunk in rows.chunks(batching.chunk_size.max(1)) {
        store.upsert(table, chunk, unique).await?;
        report.rows += chunk.len();
        report.chunks += 1;
        info!("{table}: {} rows", report.rows);
        tokio::time::sleep(batching.pause).await;
    }

    Ok(report)
}

pub async fn sync_dataset<T: TableStore>(
    store: &T,
    dataset: &Dataset,
    folder: &Path,
    batching: &Batching,
) -> Result<SyncReport> {
    let mut rows = load_rows(&folder.join(dataset.file), DATE_COLUMN)?;
    fill_empty(&mut rows, dataset.fill_empty);
    sync_rows(store, dataset.table, dataset.unique, &rows, batching).await
}
