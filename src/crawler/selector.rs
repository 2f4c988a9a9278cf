//! CSS-selector driven extractor for HTML career sites
//!
//! One `SelectorExtractor` per configured source. The listing page yields
//! one [`Listing`] per matched item element; hydration fetches the listing's
//! detail page and concatenates the configured description sections.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::fetcher::{resolve_link, PageFetcher};
use super::{Extractor, Listing};
use crate::config::SourceConfig;
use crate::models::Posting;
use crate::utils::error::ExtractError;
use crate::utils::normalize_whitespace;

/// Company name used when neither the page nor the config provides one
const UNKNOWN_COMPANY: &str = "Unknown";

/// Parsed selectors for one source
#[derive(Debug)]
struct CompiledSelectors {
    item: Selector,
    id_attr: String,
    id_pattern: Option<Regex>,
    title: Selector,
    link: Selector,
    company: Option<Selector>,
    location: Option<Selector>,
    description: Vec<Selector>,
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl CompiledSelectors {
    fn compile(config: &crate::config::SelectorConfig) -> Result<Self, ExtractError> {
        let id_pattern = config
            .id_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| ExtractError::InvalidSelector {
                    selector: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            item: parse_selector(&config.item)?,
            id_attr: config.id_attr.clone(),
            id_pattern,
            title: parse_selector(&config.title)?,
            link: parse_selector(&config.link)?,
            company: config.company.as_deref().map(parse_selector).transpose()?,
            location: config.location.as_deref().map(parse_selector).transpose()?,
            description: config
                .description
                .iter()
                .map(|s| parse_selector(s))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Extractor for a source described by CSS selectors
pub struct SelectorExtractor {
    source: String,
    listing_url: String,
    company: Option<String>,
    selectors: CompiledSelectors,
    fetcher: PageFetcher,
}

impl SelectorExtractor {
    /// Build an extractor from a source configuration
    pub fn from_config(config: &SourceConfig) -> Result<Self, ExtractError> {
        let fetcher = PageFetcher::new(config.requests_per_second)?;
        Ok(Self {
            source: config.name.clone(),
            listing_url: config.listing_url.clone(),
            company: config.company.clone(),
            selectors: CompiledSelectors::compile(&config.selectors)?,
            fetcher,
        })
    }

    /// Replace the page fetcher
    pub fn with_fetcher(mut self, fetcher: PageFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Parse listings out of a listing page
    ///
    /// Items without a usable id, title or link are skipped. Returns
    /// [`ExtractError::NoListings`] only when no item element matched at all,
    /// which usually means the markup changed.
    pub fn parse_listings(&self, html: &str) -> Result<Vec<Listing>, ExtractError> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();
        let mut matched = 0usize;

        for item in document.select(&self.selectors.item) {
            matched += 1;
            match self.parse_item(item) {
                Ok(Some(listing)) => listings.push(listing),
                Ok(None) => {}
                Err(e) => tracing::debug!(source = %self.source, error = %e, "Skipping listing"),
            }
        }

        if matched == 0 {
            return Err(ExtractError::NoListings(self.source.clone()));
        }
        Ok(listings)
    }

    fn parse_item(&self, item: ElementRef<'_>) -> Result<Option<Listing>, ExtractError> {
        let sel = &self.selectors;
        let link_el = item.select(&sel.link).next();

        let raw_id = item
            .value()
            .attr(&sel.id_attr)
            .or_else(|| link_el.and_then(|el| el.value().attr(&sel.id_attr)))
            .ok_or(ExtractError::IdNotFound)?;

        let native_id = match &sel.id_pattern {
            Some(re) => re
                .captures(raw_id)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or(ExtractError::IdNotFound)?,
            None => raw_id.trim().to_string(),
        };
        if native_id.is_empty() {
            return Err(ExtractError::IdNotFound);
        }

        let title = item
            .select(&sel.title)
            .next()
            .map(element_text)
            .unwrap_or_default();
        let Some(href) = link_el.and_then(|el| el.value().attr("href")) else {
            return Ok(None);
        };
        if title.is_empty() {
            return Ok(None);
        }

        let company = sel
            .company
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(element_text)
            .filter(|c| !c.is_empty())
            .or_else(|| self.company.clone());
        let location = sel
            .location
            .as_ref()
            .and_then(|s| item.select(s).next())
            .map(element_text)
            .filter(|l| !l.is_empty());

        Ok(Some(Listing {
            id: Posting::compose_id(&native_id, &self.source),
            native_id,
            title,
            link: resolve_link(&self.listing_url, href)?,
            company,
            location,
        }))
    }

    /// Concatenate the configured description sections of a detail page
    pub fn parse_description(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        self.selectors
            .description
            .iter()
            .filter_map(|s| document.select(s).next())
            .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join("\n")))
            .filter(|section| !section.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")).replace('\n', " ")
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn source(&self) -> &str {
        &self.source
    }

    async fn discover(&self) -> Result<Vec<Listing>, ExtractError> {
        let html = self.fetcher.fetch(&self.listing_url).await?;
        self.parse_listings(&html)
    }

    async fn hydrate(&self, listing: &Listing) -> Result<Posting, ExtractError> {
        let description = if self.selectors.description.is_empty() {
            String::new()
        } else {
            let html = self.fetcher.fetch(&listing.link).await?;
            let description = self.parse_description(&html);
            if description.is_empty() {
                return Err(ExtractError::DescriptionNotFound(listing.id.clone()));
            }
            description
        };

        let company = listing
            .company
            .clone()
            .unwrap_or_else(|| UNKNOWN_COMPANY.to_string());

        let mut posting = Posting::new(
            listing.id.clone(),
            listing.title.clone(),
            company,
            listing.link.clone(),
            description,
        );
        if let Some(location) = &listing.location {
            posting = posting.with_location(location.clone());
        }
        Ok(posting)
    }
}
