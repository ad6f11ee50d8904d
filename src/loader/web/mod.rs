
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{Document, LoadError, SOURCE_KEY, TITLE_KEY};
use crate::config::LoaderConfig;
use crate::service::{self, ServiceError};

const UNWANTED_ELEMENTS: &str = "script, style, noscript, iframe, template, svg, nav, header, \
     footer, aside, button, form, .advertisement, .ads, .sidebar, .menu, .navigation";
const MAIN_CONTENT: &str = "main, article, .content, .main-content, #content, #main";

/// Fetches web pages with a fixed-delay retry for transient failures
#[derive(Debug, Clone)]
pub struct WebLoader {
    agent: ureq::Agent,
    max_retries: u32,
    retry_delay: Duration,
}

/// Visible text and title pulled out of an HTML page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
}

impl WebLoader {
    #[inline]
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            agent: service::build_agent(
                Duration::from_secs(config.timeout_seconds),
                Some(&config.user_agent),
            ),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        }
    }

    #[inline]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Fetch a page and turn its visible text into one document
    pub async fn load_url(&self, url: &str) -> Result<Document, LoadError> {
        let parsed = validate_url(url)?;
        let html = self.get(&parsed).await.map_err(|source| LoadError::Fetch {
            url: url.to_string(),
            source,
        })?;

        let page = extract_visible_text(&html);
        if page.text.is_empty() {
            return Err(LoadError::EmptyPage(url.to_string()));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(SOURCE_KEY.to_string(), url.to_string());
        if let Some(title) = page.title {
            metadata.insert(TITLE_KEY.to_string(), title);
        }

        Ok(Document::new(page.text, metadata))
    }

    /// GET with retry logic; only connection, 429 and 5xx failures are retried
    pub async fn get(&self, url: &Url) -> Result<String, ServiceError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying request to {} (attempt {})", url, attempt + 1);
                tokio::time::sleep(self.retry_delay).await;
            }

            let agent = self.agent.clone();
            let target = url.to_string();
            match service::run_blocking(move || service::get_text(&agent, &target, None)).await {
                Ok(body) => {
                    debug!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("Retryable error for {}: {}", url, e);
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("Giving up on {}: {}", url, e);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ServiceError::Internal("no fetch attempted".to_string())))
    }
}

/// Validate and normalize a URL
#[inline]
pub fn validate_url(url_str: &str) -> Result<Url, LoadError> {
    let invalid = |reason: &str| LoadError::InvalidUrl {
        url: url_str.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(url_str.trim()).map_err(|e| invalid(&e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("URL must use HTTP or HTTPS scheme"));
    }

    if url.host_str().is_none() {
        return Err(invalid("URL must have a valid host"));
    }

    Ok(url)
}

/// Pull the human-visible text out of an HTML document. Main-content
/// containers win over `body`; chrome such as navigation is dropped and
/// whitespace is collapsed to single spaces.
pub fn extract_visible_text(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let cleaned = clean_content(&document);

    let text = cleaned
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");

    ExtractedPage { title, text }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").expect("valid selector");
    let heading_selector = Selector::parse("h1").expect("valid selector");

    document
        .select(&title_selector)
        .chain(document.select(&heading_selector))
        .map(|element| element.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
}

fn clean_content(document: &Html) -> Html {
    let unwanted_selector = Selector::parse(UNWANTED_ELEMENTS).expect("valid selector");
    let main_content_selector = Selector::parse(MAIN_CONTENT).expect("valid selector");
    let body_selector = Selector::parse("body").expect("valid selector");

    let container = document
        .select(&main_content_selector)
        .next()
        .or_else(|| document.select(&body_selector).next());

    let mut cleaned = match container {
        Some(element) => Html::parse_fragment(&element.html()),
        None => document.clone(),
    };

    remove_unwanted_elements(&mut cleaned, &unwanted_selector);
    cleaned
}

fn remove_unwanted_elements(document: &mut Html, unwanted_selector: &Selector) {
    // Collect ids first; detaching while selecting would alias the tree
    let unwanted_node_ids: Vec<_> = document
        .select(unwanted_selector)
        .map(|element| element.id())
        .collect();

    for node_id in unwanted_node_ids {
        if let Some(mut node) = document.tree.get_mut(node_id) {
            node.detach();
        }
    }
}
