use anyhow::{bail, Result};
use log::debug;
use reqwest::{Client, Url};

use crate::{Config, Row, TableStore};

const PREFER: &str = "resolution=merge-duplicates,return=minimal";

/// PostgREST endpoint of a Supabase project.
pub struct Supabase {
    client: Client,
    url: Url,
    key: String,
}

impl Supabase {
    pub fn new(config: &Config) -> Result<Self> {
        let mut url = Url::parse(&config.url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            url,
            key: config.key.clone(),
        })
    }
}

impl TableStore for Supabase {
    async fn upsert(&self, table: &str, rows: &[Row], on_conflict: &str) -> Result<()> {
        let endpoint = self.url.join(&format!("rest/v1/{table}"))?;
        debug!("POST {endpoint} ({} rows)", rows.len());

        let response = self
            .client
            .post(endpoint)
            .query(&[("on_conflict", on_conflict)])
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", PREFER)
            .json(rows)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("upsert into {table} failed with {status}: {body}");
        }

        Ok(())
    }
}
