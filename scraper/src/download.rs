use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use slug::slugify;

use crate::{Category, Report, Source};

/// Attachment formats worth keeping.
pub const SPREADSHEETS: &[&str] = &["xls", "xlsx"];

#[derive(Debug, PartialEq, Eq)]
pub enum Download {
    Saved(PathBuf),
    /// Already on disk, nothing was fetched.
    Skipped(PathBuf),
    /// No attachment in an accepted format.
    NoMatch,
    /// No publication date to name the file after.
    Undated,
}

pub fn filename(category: Category, published: NaiveDate, format: &str) -> String {
    format!(
        "{}_{}.{}",
        slugify(category.to_string()),
        published.format("%Y-%m-%d"),
        format
    )
}

/// Saves the first attachment of `report` whose format is in `formats`.
pub async fn download_attachment<S: Source>(
    source: &S,
    folder: &Path,
    report: &Report,
    formats: &[&str],
    check_existing: bool,
) -> Result<Download> {
    let Some(attachment) = report
        .attachments
        .iter()
        .find(|attachment| formats.contains(&attachment.format.as_str()))
    else {
        return Ok(Download::NoMatch);
    };

    let Some(published) = report.published else {
        warn!("skipping undated report {}", attachment.link);
        return Ok(Download::Undated);
    };
    info!("processing report {}", published.format("%Y-%m-%d"));

    let path = folder.join(filename(report.category, published, &attachment.format));
    if check_existing && path.exists() {
        info!("skipping {}: already exists", path.display());
        return Ok(Download::Skipped(path));
    }

    let contents = source.attachment(&attachment.link).await?;
    fs::create_dir_all(folder)
        .with_context(|| format!("creating {}", folder.display()))?;
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    info!("saved {}", path.display());

    Ok(Download::Saved(path))
}
