//! ACM Digital Library scraping.
//!
//! Walks a paginated search-results listing, opens every result's detail page
//! and extracts the abstract, publication date and citation. Detail pages
//! come in two layouts (articles and books); fields whose markup differs are
//! located through [`Layout`] strategies tried in a fixed order.

use crate::config::ScraperSettings;
use crate::driver::{BrowserDriver, Element, Wait};
use crate::error::{AcmError, Result};
use crate::papers::{Paper, PaperSink};
use crate::time_range::TimeWindow;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default ACM Digital Library URL
pub const DEFAULT_ACM_URL: &str = "https://dl.acm.org";

/// CCS 2012 concept: supervised learning by classification
const TOPIC_PATH: &str = "/topic/ccs2012/10010147.10010257.10010258.10010259.10010263";

/// Results per listing page
const PAGE_SIZE: u32 = 50;

const RESULT_ITEM: &str = ".issue-item__content";
const RESULT_LINK: &str = ".issue-item__content .issue-item__title a";
const NEXT_PAGE: &str = ".pagination__btn--next";
const ABSTRACT: &str = ".abstractSection";
const CITATION_TEXT: &str = ".csl-right-inline";

/// Publication dates look like "01 January 2024"
const DATE_FORMAT: &str = "%d %B %Y";

/// Detail page layout, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Journal and proceedings articles
    Standard,
    /// Books and book chapters
    AlternateLayout,
}

impl Layout {
    pub const FALLBACK_ORDER: [Layout; 2] = [Layout::Standard, Layout::AlternateLayout];

    pub fn publication_date(self) -> &'static str {
        match self {
            Layout::Standard => ".CitationCoverDate",
            Layout::AlternateLayout => {
                r#"div[class="item-meta__info"] > div:nth-of-type(3) > div:nth-of-type(2)"#
            }
        }
    }

    pub fn export_citation(self) -> &'static str {
        match self {
            Layout::Standard => r#"a[aria-label="Export Citations"]"#,
            Layout::AlternateLayout => r#"a[data-title="Export Citation"]"#,
        }
    }
}

/// Listing URL for papers published inside `window`, oldest first.
pub fn search_url(base_url: &str, window: &TimeWindow) -> Result<Url> {
    let mut url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), TOPIC_PATH))
        .map_err(|e| AcmError::Config(format!("Invalid base URL: {}", e)))?;

    let epub_date = format!(
        "[{} TO {}2359]",
        window.start.format("%Y%m%d"),
        window.end.format("%Y%m%d")
    );
    url.query_pairs_mut()
        .append_pair("expand", "all")
        .append_pair("EpubDate", &epub_date)
        .append_pair("pageSize", &PAGE_SIZE.to_string())
        .append_pair("startPage", "0")
        .append_pair("sortBy", "EpubDate_asc");

    Ok(url)
}

/// Parse a "DD Month YYYY" publication date.
pub fn parse_publication_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|_| AcmError::DateParse {
        input: text.to_string(),
    })
}

/// Timing knobs for a scrape run
#[derive(Debug, Clone, Copy)]
pub struct ScrapeOptions {
    pub wait: Wait,
    pub pre_click_delay: Duration,
}

impl From<&ScraperSettings> for ScrapeOptions {
    fn from(settings: &ScraperSettings) -> Self {
        Self {
            wait: Wait::new(settings.wait_timeout(), settings.poll_interval()),
            pre_click_delay: settings.pre_click_delay(),
        }
    }
}

/// Counters for a finished crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeReport {
    /// Listing pages visited
    pub pages: usize,
    pub scraped: usize,
    /// Detail pages abandoned because they failed to load or a field could
    /// not be extracted
    pub skipped: usize,
}

/// Sequential crawler over one exclusively owned browser session.
pub struct AcmScraper<D> {
    driver: D,
    options: ScrapeOptions,
}

impl<D: BrowserDriver> AcmScraper<D> {
    pub fn new(driver: D, options: ScrapeOptions) -> Self {
        Self { driver, options }
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Scrape every listing page starting at `search_url`, in listing order.
    pub async fn scrape(&mut self, search_url: &str) -> Result<Vec<Paper>> {
        let mut papers = Vec::new();
        self.scrape_into(search_url, &mut papers).await?;
        Ok(papers)
    }

    /// Scrape every listing page, handing each page's papers to `sink`.
    ///
    /// A detail page that fails to load or whose fields cannot be extracted
    /// is logged and skipped. Failures on the listing page itself and sink
    /// failures end the run.
    pub async fn scrape_into<K: PaperSink>(
        &mut self,
        search_url: &str,
        sink: &mut K,
    ) -> Result<ScrapeReport> {
        let mut report = ScrapeReport::default();
        let mut visited = HashSet::new();
        let mut current = Some(search_url.to_string());

        while let Some(page_url) = current.take() {
            if !visited.insert(page_url.clone()) {
                warn!(url = %page_url, "Listing page already visited, stopping");
                break;
            }
            report.pages += 1;
            info!(page = report.pages, url = %page_url, "Scraping listing page");

            self.driver.navigate(&page_url).await?;
            let links = self.paper_links().await?;
            debug!(page = report.pages, count = links.len(), "Found paper links");

            let mut papers = Vec::with_capacity(links.len());
            for link in &links {
                match self.scrape_paper(link).await {
                    Ok(paper) => {
                        info!(url = %link, "Paper scraped");
                        papers.push(paper);
                        report.scraped += 1;
                    }
                    Err(e) if e.is_extraction_failure() => {
                        warn!(url = %link, error = %e, "Skipping paper");
                        report.skipped += 1;
                    }
                    Err(e) => {
                        warn!(url = %link, error = %e, "Detail page unavailable, skipping paper");
                        report.skipped += 1;
                    }
                }
            }
            sink.accept(&papers)?;

            // the detail pages replaced the listing
            self.driver.navigate(&page_url).await?;
            current = self.next_page().await?;
        }

        info!(
            pages = report.pages,
            scraped = report.scraped,
            skipped = report.skipped,
            "Scrape complete"
        );
        Ok(report)
    }

    async fn paper_links(&mut self) -> Result<Vec<String>> {
        self.options
            .wait
            .until_all_visible(&mut self.driver, RESULT_ITEM)
            .await?;
        let links = self.driver.find_elements(RESULT_LINK).await?;
        Ok(links.into_iter().filter_map(|a| a.href).collect())
    }

    async fn next_page(&mut self) -> Result<Option<String>> {
        match self.driver.find_element(NEXT_PAGE).await {
            Ok(next) => Ok(next.href),
            Err(AcmError::ElementNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn scrape_paper(&mut self, url: &str) -> Result<Paper> {
        debug!(url, "Scraping paper");
        self.driver.navigate(url).await?;
        self.extract_paper().await
    }

    /// Extract one paper from the detail page currently loaded.
    pub async fn extract_paper(&mut self) -> Result<Paper> {
        let abstract_text = self.abstract_text().await?;
        let publication_date = self.publication_date().await?;
        let citation = self.citation().await?;
        Ok(Paper {
            abstract_text,
            publication_date,
            citation,
        })
    }

    async fn abstract_text(&mut self) -> Result<String> {
        let element = self
            .options
            .wait
            .until_visible(&mut self.driver, ABSTRACT)
            .await?;
        Ok(element.text)
    }

    async fn publication_date(&mut self) -> Result<NaiveDate> {
        let (layout, element) = self.first_match(Layout::publication_date).await?;
        debug!(?layout, text = %element.text, "Publication date");
        parse_publication_date(&element.text)
    }

    async fn citation(&mut self) -> Result<String> {
        // clicking before the page settles redirects to the home page
        tokio::time::sleep(self.options.pre_click_delay).await;
        let (layout, button) = self.first_match(Layout::export_citation).await?;
        debug!(?layout, "Opening citation export");
        self.driver.click(&button).await?;

        let element = self
            .options
            .wait
            .until_visible(&mut self.driver, CITATION_TEXT)
            .await?;
        Ok(element.text)
    }

    /// First layout whose selector matches; missing under every layout is
    /// `ElementNotFound`.
    async fn first_match(&mut self, selector: fn(Layout) -> &'static str) -> Result<(Layout, Element)> {
        for layout in Layout::FALLBACK_ORDER {
            match self.driver.find_element(selector(layout)).await {
                Ok(element) => return Ok((layout, element)),
                Err(AcmError::ElementNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(AcmError::ElementNotFound {
            selector: Layout::FALLBACK_ORDER
                .iter()
                .map(|l| selector(*l))
                .collect::<Vec<_>>()
                .join(" | "),
        })
    }
}
