use std::sync::OnceLock;

use anyhow::Result;
use chrono::NaiveDate;
use log::warn;
use regex::{Captures, Regex};
use reqwest::Url;
use select::{
    document::Document,
    node::Node,
    predicate::{Class, Name, Predicate},
};
use thiserror::Error;

use crate::Category;

const MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub link: Url,
    pub format: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub category: Category,
    /// `None` when the entry carried no recognizable date.
    pub published: Option<NaiveDate>,
    pub attachments: Vec<Attachment>,
}

/// A listing entry that could not be turned into a [`Report`].
#[derive(Debug)]
pub struct EntryError {
    pub category: Category,
    pub page: usize,
    pub fragment: String,
    pub cause: anyhow::Error,
}

/// One listing page, already parsed.
#[derive(Debug, Default)]
pub struct Page {
    pub index: usize,
    pub reports: Vec<Report>,
    pub errors: Vec<EntryError>,
}

impl Page {
    /// A page without any listing entry marks the end of the pagination.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Error)]
enum ParseError {
    #[error("attachment anchor without href")]
    MissingHref,
    #[error("invalid attachment link {0:?}")]
    InvalidLink(String),
    #[error("unknown month {0:?}")]
    UnknownMonth(String),
    #[error("invalid date {0}-{1}-{2}")]
    InvalidDate(i32, u32, u32),
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+), (\d{2}) (\w+), (\d{4})").expect("date pattern is a valid regex")
    })
}

fn date_from_captures(captures: &Captures) -> Result<NaiveDate> {
    let month_name = captures[3].to_lowercase();
    let month = MONTHS
        .iter()
        .position(|&name| name == month_name)
        .ok_or_else(|| ParseError::UnknownMonth(month_name.clone()))?;
    let month = month as u32 + 1;

    let year = captures[4].parse()?;
    let day = captures[2].parse()?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ParseError::InvalidDate(year, month, day).into())
}

/// Parses a date written the way the listing does, e.g. "viernes, 05 enero, 2024".
///
/// Text that does not look like a date yields `None`; text that looks like one
/// but names an unknown month or an impossible day is logged and yields `None`.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let captures = date_pattern().captures(text)?;
    match date_from_captures(&captures) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!("failed parsing date {:?}: {}", &captures[0], e);
            None
        }
    }
}

impl Attachment {
    fn from_html(anchor: &Node, base: &Url) -> Result<Self> {
        let href = anchor.attr("href").ok_or(ParseError::MissingHref)?.trim();
        let link = base
            .join(href)
            .map_err(|_| ParseError::InvalidLink(href.to_owned()))?;

        let format = link
            .path()
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_owned())
            .unwrap_or_default();

        Ok(Attachment { link, format })
    }
}

impl Report {
    fn from_html(entry: &Node, category: Category, base: &Url) -> Result<Self> {
        let published = entry
            .find(Class("bcb_date"))
            .find_map(|node| parse_date(&node.text()));

        let attachments = entry
            .find(Class("bcb_adjunto").descendant(Name("a")))
            .map(|anchor| Attachment::from_html(&anchor, base))
            .collect::<Result<_>>()?;

        Ok(Report {
            category,
            published,
            attachments,
        })
    }
}

pub fn page_from_html(source: &str, category: Category, index: usize, base: &Url) -> Page {
    let document = Document::from(source);
    let mut page = Page {
        index,
        ..Page::default()
    };

    for entry in document.find(Class("view-content").child(Name("div"))) {
        match Report::from_html(&entry, category, base) {
            Ok(report) => {
                if report.published.is_none() {
                    warn!("{category}: undated entry on page {index}");
                }
                page.reports.push(report);
            }
            Err(cause) => {
                warn!("{category}: skipping entry on page {index}: {cause}");
                page.errors.push(EntryError {
                    category,
                    page: index,
                    fragment: entry.html(),
                    cause,
                });
            }
        }
    }

    page
}


#[cfg(test)]
mod tests {
    use super::fixtures::{entry, listing};
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.bcb.gob.bo").unwrap()
    }

    #[test]
    fn parses_spanish_dates() {
        assert_eq!(
            parse_date("Publicado el viernes, 05 enero, 2024"),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(
            parse_date("miércoles, 18 Septiembre, 2024"),
            NaiveDate::from_ymd_opt(2024, 9, 18)
        );
    }

    #[test]
    fn rejects_unknown_months_and_days() {
        assert_eq!(parse_date("lunes, 01 brumario, 2024"), None);
        assert_eq!(parse_date("lunes, 31 febrero, 2024"), None);
        assert_eq!(parse_date("sin fecha"), None);
    }

    #[test]
    fn parses_entries_and_resolves_links() {
        let html = listing(&[entry(
            "viernes, 01 marzo, 2024",
            &["/sites/default/files/semanal.pdf", "/sites/default/files/semanal.xlsx"],
        )]);

        let page = page_from_html(&html, Category::WeeklyStatistics, 3, &base());

        assert_eq!(page.index, 3);
        assert!(page.errors.is_empty());
        let report = &page.reports[0];
        assert_eq!(report.published, NaiveDate::from_ymd_opt(2024, 3, 1));
        let formats: Vec<_> = report.attachments.iter().map(|a| a.format.as_str()).collect();
        assert_eq!(formats, ["pdf", "xlsx"]);
        assert_eq!(
            report.attachments[1].link.as_str(),
            "https://www.bcb.gob.bo/sites/default/files/semanal.xlsx"
        );
    }

    #[test]
    fn isolates_malformed_entries() {
        let malformed = r#"<div><span class="bcb_date">lunes, 04 marzo, 2024</span>
            <div class="bcb_adjunto"><a>sin enlace</a></div></div>"#;
        let html = listing(&[
            entry("viernes, 01 marzo, 2024", &["/a.xlsx"]),
            malformed.to_owned(),
            entry("jueves, 15 febrero, 2024", &["/b.xls"]),
        ]);

        let page = page_from_html(&html, Category::WeeklyStatistics, 0, &base());

        assert_eq!(page.reports.len(), 2);
        assert_eq!(page.errors.len(), 1);
        assert_eq!(page.errors[0].page, 0);
        assert!(page.errors[0].fragment.contains("sin enlace"));
        assert!(!page.is_empty());
    }

    #[test]
    fn keeps_undated_entries() {
        let html = listing(&[entry("próximamente", &["/c.xlsx"])]);

        let page = page_from_html(&html, Category::WeeklyStatistics, 0, &base());

        assert_eq!(page.reports.len(), 1);
        assert_eq!(page.reports[0].published, None);
    }

    #[test]
    fn page_without_listing_is_empty() {
        let page = page_from_html(
            "<html><body><p>Sin resultados</p></body></html>",
            Category::WeeklyStatistics,
            7,
            &base(),
        );
        assert!(page.is_empty());
    }
}
