use super::{Handler, HandlerContext};
use crate::robots::ParsedRobots;
use async_trait::async_trait;

/// Returns the `Sitemap:` URLs of a `/robots.txt` response
///
/// Any other path yields no links, so the handler can safely be registered
/// for all of `text/plain`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RobotsSitemapHandler;

impl RobotsSitemapHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for RobotsSitemapHandler {
    async fn handle(&self, context: &HandlerContext) -> anyhow::Result<Option<Vec<String>>> {
        if context.url.path() != "/robots.txt" {
            return Ok(Some(Vec::new()));
        }

        let robots = ParsedRobots::from_content(&context.text());
        let links = robots
            .sitemaps()
            .into_iter()
            .filter_map(|href| context.url.join(&href).ok())
            .map(|url| url.to_string())
            .collect();
        Ok(Some(links))
    }
}
