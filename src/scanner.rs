#![forbid(unsafe_code)]

//! Snapshot scanning of the archive page.
//!
//! The page exposes one card per list position. A [`ScanTarget`] turns a
//! position into a CSS locator, and a [`Scanner`] resolves one
//! [`ScanRequest`] into the item shown at that position, if any.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use crate::item::{ListItem, Snapshot};
use crate::process::{ToolError, run_captured, tool_command};

/// Placeholder replaced by the list position in a selector template.
pub const INDEX_PLACEHOLDER: &str = "{index}";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan of position {position} timed out after {}s", .after.as_secs())]
    Timeout { position: usize, after: Duration },

    #[error("scan of position {position} failed: {source}")]
    Renderer { position: usize, source: ToolError },

    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },
}

/// What to watch: the list page and the per-position locator template.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    page_url: Url,
    selector_template: String,
}

impl ScanTarget {
    pub fn new(page_url: &str, selector_template: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            page_url: Url::parse(page_url)?,
            selector_template: selector_template.into(),
        })
    }

    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// Locator for the card at `position`.
    pub fn position_query(&self, position: usize) -> String {
        self.selector_template
            .replace(INDEX_PLACEHOLDER, &position.to_string())
    }

    pub fn request(&self, position: usize) -> ScanRequest {
        ScanRequest {
            page_url: self.page_url.clone(),
            selector: self.position_query(position),
            position,
        }
    }
}

/// A single immutable scan: one page, one locator, one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub page_url: Url,
    pub selector: String,
    pub position: usize,
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Returns the item at the requested position, or `None` when the page
    /// shows nothing there.
    async fn scan(&self, request: &ScanRequest) -> Result<Option<ListItem>, ScanError>;
}

/// Renders the page with a headless Chromium-compatible browser and reads the
/// resulting DOM.
#[derive(Debug, Clone)]
pub struct HeadlessScanner {
    browser: PathBuf,
    timeout: Duration,
}

impl HeadlessScanner {
    pub fn new(browser: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            browser: browser.into(),
            timeout,
        }
    }

    /// Time the browser may spend running page scripts before dumping the
    /// DOM. Kept below the process timeout so a slow page still yields a DOM.
    fn script_budget(&self) -> Duration {
        let budget = self.timeout.mul_f64(0.5);
        budget.min(Duration::from_secs(30))
    }
}

#[async_trait]
impl Scanner for HeadlessScanner {
    async fn scan(&self, request: &ScanRequest) -> Result<Option<ListItem>, ScanError> {
        // Validate before paying for a browser launch.
        let selector = parse_selector(&request.selector)?;

        let mut command = tool_command(&self.browser);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg(format!(
                "--virtual-time-budget={}",
                self.script_budget().as_millis()
            ))
            .arg("--dump-dom")
            .arg(request.page_url.as_str());

        let output = run_captured(command, self.timeout)
            .await
            .map_err(|err| match err {
                ToolError::TimedOut { after, .. } => ScanError::Timeout {
                    position: request.position,
                    after,
                },
                other => ScanError::Renderer {
                    position: request.position,
                    source: other,
                },
            })?;

        let html = String::from_utf8_lossy(&output.stdout);
        let snapshot = snapshot_from_document(&html, &selector, &request.page_url, request.position);
        debug!(
            "position {} matched {} element(s)",
            request.position,
            snapshot.items.len()
        );
        Ok(snapshot.into_first())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ScanError> {
    Selector::parse(selector).map_err(|err| ScanError::Selector {
        selector: selector.to_string(),
        message: err.to_string(),
    })
}

/// Extracts every item matched by `selector` from `html`.
pub fn parse_snapshot(
    html: &str,
    selector: &str,
    page_url: &Url,
    position: usize,
) -> Result<Snapshot, ScanError> {
    let selector = parse_selector(selector)?;
    Ok(snapshot_from_document(html, &selector, page_url, position))
}

fn snapshot_from_document(
    html: &str,
    selector: &Selector,
    page_url: &Url,
    position: usize,
) -> Snapshot {
    let document = Html::parse_document(html);
    let items = document
        .select(selector)
        .filter_map(|element| item_from_element(element, page_url))
        .collect();
    Snapshot { position, items }
}

fn item_from_element(element: ElementRef<'_>, page_url: &Url) -> Option<ListItem> {
    let title = element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .find(|line| !line.is_empty())?;
    let href = anchor_href(element).unwrap_or_default();
    Some(ListItem::captured(title, href, page_url))
}

fn anchor_href(element: ElementRef<'_>) -> Option<&str> {
    if element.value().name() == "a" {
        return element.value().attr("href");
    }
    let anchor = Selector::parse("a[href]").ok()?;
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div data-a-target="video-tower-card-0">
            <article>
              <a href="/videos/300"><img alt=""></a>
              <h3 title="Newest stream">Newest stream</h3>
              <p>3 hours ago</p>
            </article>
          </div>
          <div data-a-target="video-tower-card-1">
            <a href="https://www.twitch.tv/videos/200"><span>Older stream</span></a>
          </div>
          <div data-a-target="video-tower-card-2">
            <h3>No link here</h3>
          </div>
          <div data-a-target="video-tower-card-3"></div>
        </body></html>
    "#;

    fn target() -> ScanTarget {
        ScanTarget::new(
            "https://www.twitch.tv/someone/videos?filter=archives&sort=time",
            crate::config::DEFAULT_ITEM_SELECTOR,
        )
        .unwrap()
    }

    #[test]
    fn position_query_substitutes_index() {
        let target = target();
        assert_eq!(
            target.position_query(0),
            "[data-a-target='video-tower-card-0']"
        );
        assert_eq!(
            target.position_query(12),
            "[data-a-target='video-tower-card-12']"
        );
    }

    #[test]
    fn request_carries_position_and_page() {
        let request = target().request(4);
        assert_eq!(request.position, 4);
        assert_eq!(request.selector, "[data-a-target='video-tower-card-4']");
        assert_eq!(request.page_url.host_str(), Some("www.twitch.tv"));
    }

    #[test]
    fn parses_first_text_line_and_relative_link() {
        let target = target();
        let snapshot = parse_snapshot(PAGE, &target.position_query(0), target.page_url(), 0).unwrap();
        assert_eq!(
            snapshot.items,
            vec![ListItem::new("Newest stream", "https://www.twitch.tv/videos/300")]
        );
    }

    #[test]
    fn parses_absolute_link_inside_anchor() {
        let target = target();
        let item = parse_snapshot(PAGE, &target.position_query(1), target.page_url(), 1)
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(item.title(), "Older stream");
        assert_eq!(item.link(), "https://www.twitch.tv/videos/200");
    }

    #[test]
    fn missing_link_becomes_empty() {
        let target = target();
        let item = parse_snapshot(PAGE, &target.position_query(2), target.page_url(), 2)
            .unwrap()
            .into_first()
            .unwrap();
        assert_eq!(item.link(), "");
    }

    #[test]
    fn card_without_text_or_missing_card_is_empty() {
        let target = target();
        for position in [3, 4] {
            let snapshot =
                parse_snapshot(PAGE, &target.position_query(position), target.page_url(), position)
                    .unwrap();
            assert!(snapshot.items.is_empty(), "position {position}");
        }
    }

    #[test]
    fn invalid_selector_is_reported() {
        let err = parse_snapshot(PAGE, "[[[", target().page_url(), 0).unwrap_err();
        assert!(matches!(err, ScanError::Selector { .. }));
    }

    #[cfg(unix)]
    mod headless {
        use super::*;
        use crate::process::test_support::install_stub;
        use tempfile::tempdir;

        fn page_stub(dir: &std::path::Path) -> PathBuf {
            let page = dir.join("page.html");
            std::fs::write(&page, PAGE).unwrap();
            install_stub(dir, "chromium", &format!("cat '{}'", page.display()))
        }

        #[tokio::test]
        async fn scans_rendered_page() {
            let dir = tempdir().unwrap();
            let scanner = HeadlessScanner::new(page_stub(dir.path()), Duration::from_secs(5));
            let target = target();

            let first = scanner.scan(&target.request(0)).await.unwrap().unwrap();
            assert_eq!(first.title(), "Newest stream");
            assert!(scanner.scan(&target.request(7)).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn slow_browser_is_a_timeout() {
            let dir = tempdir().unwrap();
            let browser = install_stub(dir.path(), "chromium", "sleep 5");
            let scanner = HeadlessScanner::new(browser, Duration::from_millis(200));
            let err = scanner.scan(&target().request(2)).await.unwrap_err();
            match err {
                ScanError::Timeout { position, .. } => assert_eq!(position, 2),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn crashing_browser_is_a_renderer_error() {
            let dir = tempdir().unwrap();
            let browser = install_stub(dir.path(), "chromium", "exit 1");
            let scanner = HeadlessScanner::new(browser, Duration::from_secs(5));
            let err = scanner.scan(&target().request(0)).await.unwrap_err();
            assert!(matches!(err, ScanError::Renderer { position: 0, .. }));
        }
    }
}
