use std::{cmp::Ordering, fmt, path::Path, pin::pin};

use anyhow::Result;
use chrono::NaiveDateTime;
use enum_iterator::{all, Sequence};
use futures::{stream, Stream, TryStreamExt};
use itertools::Itertools;
use log::{debug, info};
use reqwest::{Client, Url};

mod checkpoint;
mod download;
mod parse;

pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_FILE};
pub use download::{download_attachment, filename, Download, SPREADSHEETS};
pub use parse::{page_from_html, parse_date, Attachment, EntryError, Page, Report};

pub const BCB_URL: &str = "https://www.bcb.gob.bo";

const LISTING_PATH: &str = "estad-sticas-semanales";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Report categories published in the weekly statistics listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Sequence)]
pub enum Category {
    WeeklyStatistics,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::WeeklyStatistics => "Información Estadística Semanal",
            }
        )
    }
}

/// Everything the crawler needs from the remote site.
#[allow(async_fn_in_trait)]
pub trait Source {
    /// Base URL relative attachment links are resolved against.
    fn base(&self) -> &Url;

    /// Raw HTML of one listing page.
    async fn listing(&self, category: Category, page: usize) -> Result<String>;

    /// Raw bytes of one attachment.
    async fn attachment(&self, link: &Url) -> Result<Vec<u8>>;
}

pub struct Bcb {
    client: Client,
    base: Url,
}

// the listing keeps session cookies between pages, so one client is reused
// for every request of a run

impl Bcb {
    pub fn new() -> Result<Self> {
        Self::with_base(Url::parse(BCB_URL)?)
    }

    pub fn with_base(base: Url) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, base })
    }
}

impl Source for Bcb {
    fn base(&self) -> &Url {
        &self.base
    }

    async fn listing(&self, category: Category, page: usize) -> Result<String> {
        let response = self
            .client
            .get(self.base.clone())
            .query(&[
                ("q", LISTING_PATH.to_owned()),
                ("field_titulo_es_value", category.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }

    async fn attachment(&self, link: &Url) -> Result<Vec<u8>> {
        debug!("GET {link}");
        let response = self
            .client
            .get(link.clone())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }
}

pub async fn list_page<S: Source>(source: &S, category: Category, index: usize) -> Result<Page> {
    let contents = source.listing(category, index).await?;
    Ok(page_from_html(&contents, category, index, source.base()))
}

/// Listing pages of one category, fetched lazily from page 0 until the first
/// page without entries.
pub fn pages<S: Source>(source: &S, category: Category) -> impl Stream<Item = Result<Page>> + '_ {
    stream::try_unfold(0, move |index| async move {
        let page = list_page(source, category, index).await?;
        if page.is_empty() {
            debug!("{category}: page {index} is empty, stopping");
            anyhow::Ok(None)
        } else {
            anyhow::Ok(Some((page, index + 1)))
        }
    })
}

/// Newest first; undated reports go last.
fn newest_first(a: &Report, b: &Report) -> Ordering {
    match (a.published, b.published) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn already_seen(report: &Report, since: Option<NaiveDateTime>) -> bool {
    match (since, report.published) {
        (Some(since), Some(published)) => NaiveDateTime::from(published) <= since,
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct Crawl {
    pub reports: Vec<Report>,
    pub errors: Vec<EntryError>,
}

/// Walks the listing of every category.
///
/// With `since`, each page is sorted newest first and the walk of a category
/// stops at the first report published at or before `since`; later pages are
/// never requested. Undated reports are kept but never stop the walk.
pub async fn crawl<S: Source>(source: &S, since: Option<NaiveDateTime>) -> Result<Crawl> {
    let mut crawl = Crawl::default();

    for category in all::<Category>() {
        let mut pages = pin!(pages(source, category));

        'pages: while let Some(page) = pages.try_next().await? {
            info!(
                "{category}: page {} ({} errors)",
                page.index,
                crawl.errors.len() + page.errors.len()
            );
            crawl.errors.extend(page.errors);

            for report in page.reports.into_iter().sorted_by(newest_first) {
                if already_seen(&report, since) {
                    debug!("{category}: reached {:?}, stopping", report.published);
                    break 'pages;
                }
                crawl.reports.push(report);
            }
        }
    }

    Ok(crawl)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Every report, skipping files already on disk
    Full,
    /// Reports newer than the last incremental run
    Incremental,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub reports: usize,
    pub saved: usize,
    pub skipped: usize,
    pub errors: Vec<EntryError>,
}

/// One crawler run: crawl, download spreadsheets into `folder`, and in
/// incremental mode advance the checkpoint once every download succeeded.
pub async fn update<S: Source>(
    source: &S,
    store: &CheckpointStore,
    folder: &Path,
    mode: Mode,
) -> Result<Summary> {
    let since = match mode {
        Mode::Full => None,
        Mode::Incremental => store.load()?,
    };
    if let Some(since) = since {
        info!("looking for reports after {since}");
    }

    let Crawl { reports, errors } = crawl(source, since).await?;
    let mut summary = Summary {
        reports: reports.len(),
        errors,
        ..Summary::default()
    };

    let check_existing = mode == Mode::Full;
    for report in &reports {
        match download_attachment(source, folder, report, SPREADSHEETS, check_existing).await? {
            Download::Saved(_) => summary.saved += 1,
            Download::Skipped(_) => summary.skipped += 1,
            Download::NoMatch | Download::Undated => {}
        }
    }

    if mode == Mode::Incremental {
        let saved = store.save_now()?;
        debug!("checkpoint advanced to {saved}");
    }

    Ok(summary)
}
