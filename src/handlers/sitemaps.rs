use super::{Handler, HandlerContext};
use anyhow::Context;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use scraper::{Html, Selector};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::borrow::Cow;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::trace;

type UrlFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Content types whose bodies are gunzipped before parsing
pub const DEFAULT_GZIP_CONTENT_TYPES: [&str; 2] = ["application/x-gzip", "application/gzip"];

// The HTML parser nests a self-closed `xhtml:link` around its siblings, so
// match descendants rather than children of `url`.
const ALTERNATE_SELECTOR: &str = r"urlset url xhtml\:link[rel=alternate][href]";

/// Returns the `<loc>` entries of XML sitemaps and sitemap indexes, plus the
/// `xhtml:link` alternates of each URL entry
///
/// Bodies served with a gzip content type are decompressed first.
#[derive(Clone)]
pub struct SitemapHandler {
    filter: Option<UrlFilter>,
    gzip_content_types: Vec<String>,
}

impl Default for SitemapHandler {
    fn default() -> Self {
        Self {
            filter: None,
            gzip_content_types: DEFAULT_GZIP_CONTENT_TYPES
                .iter()
                .map(|ty| ty.to_string())
                .collect(),
        }
    }
}

impl SitemapHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the URLs for which `filter` returns true
    pub fn with_filter<F>(filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            filter: Some(Arc::new(filter)),
            ..Self::default()
        }
    }

    /// Replaces the content types treated as gzip archives
    pub fn with_gzip_content_types<I, S>(mut self, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gzip_content_types = content_types
            .into_iter()
            .map(|ty| ty.into().to_ascii_lowercase())
            .collect();
        self
    }

    fn keep(&self, url: &str) -> bool {
        self.filter.as_ref().map_or(true, |keep| keep(url))
    }

    /// The body as sitemap XML, gunzipped when `content_type` calls for it
    pub fn decode<'a>(&self, body: &'a [u8], content_type: &str) -> anyhow::Result<Cow<'a, [u8]>> {
        let content_type = content_type.to_ascii_lowercase();
        if !self.gzip_content_types.contains(&content_type) {
            return Ok(Cow::Borrowed(body));
        }

        let mut xml = Vec::new();
        GzDecoder::new(body)
            .read_to_end(&mut xml)
            .context("Failed to decompress sitemap")?;
        Ok(Cow::Owned(xml))
    }

    /// Parses sitemap XML without loading the whole document into a tree
    ///
    /// Only documents that mention `xhtml:link` get a second, tree-building
    /// pass for the alternates.
    pub fn extract_links(&self, xml: &[u8]) -> Vec<String> {
        let mut links = Vec::new();

        for entity in SiteMapReader::new(Cursor::new(xml)) {
            let loc = match entity {
                SiteMapEntity::Url(entry) => entry.loc.get_url(),
                SiteMapEntity::SiteMap(entry) => entry.loc.get_url(),
                SiteMapEntity::Err(e) => {
                    trace!("Skipping sitemap entry: {:?}", e);
                    None
                }
            };

            if let Some(url) = loc {
                let url = url.to_string();
                if self.keep(&url) {
                    links.push(url);
                }
            }
        }

        let text = String::from_utf8_lossy(xml);
        if !text.contains("xhtml:link") {
            return links;
        }
        if let Ok(selector) = Selector::parse(ALTERNATE_SELECTOR) {
            let document = Html::parse_document(&text);
            for element in document.select(&selector) {
                if let Some(href) = element.value().attr("href") {
                    let href = href.trim();
                    if !href.is_empty() && self.keep(href) {
                        links.push(href.to_string());
                    }
                }
            }
        }

        links
    }
}

impl fmt::Debug for SitemapHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SitemapHandler")
            .field("filtered", &self.filter.is_some())
            .field("gzip_content_types", &self.gzip_content_types)
            .finish()
    }
}

#[async_trait]
impl Handler for SitemapHandler {
    async fn handle(&self, context: &HandlerContext) -> anyhow::Result<Option<Vec<String>>> {
        let xml = self.decode(&context.body, &context.content_type)?;
        Ok(Some(self.extract_links(&xml)))
    }
}
