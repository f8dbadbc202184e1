//! Link extraction from HTML pages

use super::{Handler, HandlerContext};
use crate::url::resolve_link;
use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

/// Returns the target of every `<a href>` on a page
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - anything that does not resolve to an HTTP(S) URL
#[derive(Debug, Clone, Default)]
pub struct HtmlLinkHandler {
    same_host_only: bool,
}

impl HtmlLinkHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only links to the page's own host
    pub fn same_host_only(mut self, yes: bool) -> Self {
        self.same_host_only = yes;
        self
    }

    /// Extracts absolute links from an HTML document
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_crawl::handlers::HtmlLinkHandler;
    /// use url::Url;
    ///
    /// let html = r#"<html><body><a href="/page">Link</a></body></html>"#;
    /// let base_url = Url::parse("https://example.com/").unwrap();
    /// let links = HtmlLinkHandler::new().extract_links(html, &base_url);
    /// assert_eq!(links, vec!["https://example.com/page".to_string()]);
    /// ```
    pub fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut links = Vec::new();

        if let Ok(a_selector) = Selector::parse("a[href]") {
            for element in document.select(&a_selector) {
                if element.value().attr("download").is_some() {
                    continue;
                }

                let absolute = match element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                    Some(url) => url,
                    None => continue,
                };

                if self.same_host_only && absolute.host_str() != base_url.host_str() {
                    continue;
                }

                links.push(absolute.to_string());
            }
        }

        links
    }
}

#[async_trait]
impl Handler for HtmlLinkHandler {
    async fn handle(&self, context: &HandlerContext) -> anyhow::Result<Option<Vec<String>>> {
        Ok(Some(self.extract_links(&context.text(), &context.url)))
    }
}
