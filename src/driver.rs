//! Browser automation boundary.
//!
//! The scraper only talks to [`BrowserDriver`]. Two drivers are provided:
//! [`WebDriverSession`] speaks the W3C WebDriver protocol to a running
//! chromedriver, and [`HtmlDriver`] evaluates CSS selectors over fetched HTML
//! without executing scripts.
//!
//! All selectors are CSS selectors.

use crate::error::{AcmError, OptionExt, Result};
use async_trait::async_trait;
use reqwest::Method;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// User agent string for plain HTTP fetches
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// W3C web element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Elements that start a new line in rendered text
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "section", "tr",
];

/// Snapshot of a located element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Driver-specific handle used for clicks
    pub handle: String,
    /// Rendered text, block elements separated by newlines
    pub text: String,
    /// Absolute link target, if the element has one
    pub href: Option<String>,
    pub displayed: bool,
}

/// A single, exclusively owned browser session.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn current_url(&mut self) -> Result<String>;

    /// First element matching `selector`, or `ElementNotFound`.
    async fn find_element(&mut self, selector: &str) -> Result<Element>;

    /// All elements matching `selector`, possibly none.
    async fn find_elements(&mut self, selector: &str) -> Result<Vec<Element>>;

    async fn click(&mut self, element: &Element) -> Result<()>;

    async fn quit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Bounded polling wait, the equivalent of an explicit WebDriver wait.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    timeout: Duration,
    poll: Duration,
}

impl Wait {
    pub fn new(timeout: Duration, poll: Duration) -> Self {
        Self { timeout, poll }
    }

    /// Wait until the first element matching `selector` is displayed.
    pub async fn until_visible<D>(&self, driver: &mut D, selector: &str) -> Result<Element>
    where
        D: BrowserDriver + ?Sized,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            match driver.find_element(selector).await {
                Ok(element) if element.displayed => return Ok(element),
                Ok(_) | Err(AcmError::ElementNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            self.tick(deadline, selector).await?;
        }
    }

    /// Wait until at least one element matches and every match is displayed.
    pub async fn until_all_visible<D>(&self, driver: &mut D, selector: &str) -> Result<Vec<Element>>
    where
        D: BrowserDriver + ?Sized,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let elements = driver.find_elements(selector).await?;
            if !elements.is_empty() && elements.iter().all(|e| e.displayed) {
                return Ok(elements);
            }
            self.tick(deadline, selector).await?;
        }
    }

    async fn tick(&self, deadline: Instant, selector: &str) -> Result<()> {
        let now = Instant::now();
        if now >= deadline {
            return Err(AcmError::Timeout {
                selector: selector.to_string(),
                waited_ms: self.timeout.as_millis(),
            });
        }
        tokio::time::sleep(self.poll.min(deadline - now)).await;
        Ok(())
    }
}

// ============================================================================
// W3C WebDriver
// ============================================================================

/// Outcome of one WebDriver command
enum Reply {
    Ok(Value),
    Failed { error: String, message: String },
}

impl Reply {
    fn into_value(self) -> Result<Value> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Failed { error, message } => {
                Err(AcmError::Browser(format!("{}: {}", error, message)))
            }
        }
    }
}

/// Browser session driven through a chromedriver endpoint.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: Url,
    session_id: String,
}

impl WebDriverSession {
    /// Open a new Chrome session.
    ///
    /// Headless sessions get the same flags the CI job passes to Chrome.
    pub async fn start(webdriver_url: &str, headless: bool) -> Result<Self> {
        let mut base = Url::parse(webdriver_url).map_err(|e| {
            AcmError::Config(format!("Invalid WebDriver URL '{}': {}", webdriver_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AcmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let args: Vec<&str> = if headless {
            vec!["--headless", "--disable-gpu", "--remote-debugging-port=9222"]
        } else {
            Vec::new()
        };
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        });

        let url = join(&base, "session")?;
        let value = execute(&client, Method::POST, url, Some(capabilities))
            .await?
            .into_value()?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_parse("WebDriver response without sessionId")?
            .to_string();

        info!(session = %session_id, headless, "WebDriver session started");
        Ok(Self {
            client,
            base,
            session_id,
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Reply> {
        let url = join(&self.base, &format!("session/{}/{}", self.session_id, path))?;
        execute(&self.client, method, url, body).await
    }

    async fn describe(&self, id: String) -> Result<Element> {
        let text = self
            .command(Method::GET, &format!("element/{}/text", id), None)
            .await?
            .into_value()?;
        let href = self
            .command(Method::GET, &format!("element/{}/property/href", id), None)
            .await?
            .into_value()?;
        let displayed = self
            .command(Method::GET, &format!("element/{}/displayed", id), None)
            .await?
            .into_value()?;

        Ok(Element {
            handle: id,
            text: text.as_str().unwrap_or_default().to_string(),
            href: href.as_str().map(str::to_string),
            displayed: displayed.as_bool().unwrap_or(false),
        })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await?
            .into_value()?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        let value = self.command(Method::GET, "url", None).await?.into_value()?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_element(&mut self, selector: &str) -> Result<Element> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = match self.command(Method::POST, "element", Some(body)).await? {
            Reply::Ok(value) => value,
            Reply::Failed { error, .. } if is_missing_element(&error) => {
                return Err(AcmError::ElementNotFound {
                    selector: selector.to_string(),
                })
            }
            failed => failed.into_value()?,
        };
        let id = element_id(&value)?;
        match self.describe(id).await {
            // the element went stale between lookup and read
            Err(AcmError::Browser(msg)) if is_missing_element(&msg) => {
                Err(AcmError::ElementNotFound {
                    selector: selector.to_string(),
                })
            }
            other => other,
        }
    }

    async fn find_elements(&mut self, selector: &str) -> Result<Vec<Element>> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = self
            .command(Method::POST, "elements", Some(body))
            .await?
            .into_value()?;
        let ids = value
            .as_array()
            .ok_or_parse("WebDriver elements response is not an array")?
            .iter()
            .map(element_id)
            .collect::<Result<Vec<_>>>()?;

        let mut elements = Vec::with_capacity(ids.len());
        for id in ids {
            elements.push(self.describe(id).await?);
        }
        Ok(elements)
    }

    async fn click(&mut self, element: &Element) -> Result<()> {
        self.command(
            Method::POST,
            &format!("element/{}/click", element.handle),
            Some(json!({})),
        )
        .await?
        .into_value()?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        let url = join(&self.base, &format!("session/{}", self.session_id))?;
        execute(&self.client, Method::DELETE, url, None)
            .await?
            .into_value()?;
        info!(session = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| AcmError::Config(format!("Invalid WebDriver path '{}': {}", path, e)))
}

fn is_missing_element(error: &str) -> bool {
    error.starts_with("no such element") || error.starts_with("stale element reference")
}

fn element_id(value: &Value) -> Result<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_parse("WebDriver response without element reference")
}

async fn execute(
    client: &reqwest::Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> Result<Reply> {
    let request = client.request(method, url);
    let request = match body {
        Some(body) => request.json(&body),
        None => request,
    };

    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(Reply::Ok(value));
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    debug!(status = status.as_u16(), error = %error, "WebDriver command failed");
    Ok(Reply::Failed { error, message })
}

// ============================================================================
// Static HTML
// ============================================================================

/// Where [`HtmlDriver`] gets its documents from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Plain HTTP page source
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .build()
            .map_err(|e| AcmError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcmError::Browser(format!("HTTP {} for {}", status, url)));
        }
        Ok(response.text().await?)
    }
}

/// Driver over static documents.
///
/// Scripts never run: an element counts as displayed unless it or an
/// ancestor is `hidden` or styled `display: none`, and a click follows the
/// element's `href`.
pub struct HtmlDriver<S> {
    source: S,
    page: Option<(Url, String)>,
}

impl<S: PageSource> HtmlDriver<S> {
    pub fn new(source: S) -> Self {
        Self { source, page: None }
    }

    fn page(&self) -> Result<&(Url, String)> {
        self.page
            .as_ref()
            .ok_or_else(|| AcmError::Browser("no page loaded".to_string()))
    }
}

#[async_trait]
impl<S: PageSource> BrowserDriver for HtmlDriver<S> {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let url = Url::parse(url)
            .map_err(|e| AcmError::Browser(format!("Invalid URL '{}': {}", url, e)))?;
        debug!(url = %url, "Fetching page");
        let html = self.source.fetch(&url).await?;
        self.page = Some((url, html));
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.page()?.0.to_string())
    }

    async fn find_element(&mut self, selector: &str) -> Result<Element> {
        let (url, html) = self.page()?;
        select_elements(html, url, selector)?
            .into_iter()
            .next()
            .ok_or_else(|| AcmError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    async fn find_elements(&mut self, selector: &str) -> Result<Vec<Element>> {
        let (url, html) = self.page()?;
        select_elements(html, url, selector)
    }

    async fn click(&mut self, element: &Element) -> Result<()> {
        match &element.href {
            Some(href) => {
                let href = href.clone();
                self.navigate(&href).await
            }
            None => {
                warn!(element = %element.handle, "Click on element without link target");
                Err(AcmError::Browser(format!(
                    "{} has no link target to follow",
                    element.handle
                )))
            }
        }
    }
}

fn select_elements(html: &str, base: &Url, selector: &str) -> Result<Vec<Element>> {
    let parsed = Selector::parse(selector)
        .map_err(|e| AcmError::Parse(format!("Invalid selector '{}': {}", selector, e)))?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&parsed)
        .enumerate()
        .map(|(i, el)| Element {
            handle: format!("{}#{}", selector, i),
            text: rendered_text(el),
            href: el
                .value()
                .attr("href")
                .and_then(|h| base.join(h).ok())
                .map(String::from),
            displayed: is_displayed(el),
        })
        .collect())
}

fn rendered_text(element: ElementRef) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Element(e) if BLOCK_TAGS.contains(&e.name()) => raw.push('\n'),
            Node::Text(text) => {
                let in_script = node
                    .parent()
                    .and_then(|p| p.value().as_element())
                    .map(|p| p.name() == "script" || p.name() == "style")
                    .unwrap_or(false);
                if !in_script {
                    raw.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
                }
            }
            _ => {}
        }
    }

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_displayed(element: ElementRef) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .all(|e| {
            let hidden_style = e
                .value()
                .attr("style")
                .map(|s| s.replace(' ', "").contains("display:none"))
                .unwrap_or(false);
            e.value().attr("hidden").is_none() && !hidden_style
        })
}

/// In-memory page source for tests.
#[cfg(test)]
pub(crate) struct MemorySource {
    pages: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MemorySource {
    pub(crate) fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl PageSource for MemorySource {
    async fn fetch(&self, url: &Url) -> Result<String> {
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| AcmError::Browser(format!("HTTP 404 for {}", url)))
    }
}

/// Canned chromedriver for tests: one session over one fixed page.
#[cfg(test)]
pub(crate) mod chromedriver {
    use super::ELEMENT_KEY;
    use axum::{
        extract::{Path, State},
        http::StatusCode,
        routing::{delete, get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    pub(crate) const SESSION: &str = "session-1";

    /// Element returned for a CSS selector
    #[derive(Debug, Clone)]
    pub(crate) struct FakeElement {
        pub id: &'static str,
        pub text: &'static str,
        pub href: Option<&'static str>,
        pub displayed: bool,
    }

    impl FakeElement {
        pub(crate) fn new(id: &'static str, text: &'static str) -> Self {
            Self {
                id,
                text,
                href: None,
                displayed: true,
            }
        }

        pub(crate) fn href(mut self, href: &'static str) -> Self {
            self.href = Some(href);
            self
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakePage {
        /// Matches per selector; selectors not listed match nothing
        pub elements: Vec<(&'static str, Vec<FakeElement>)>,
        /// Element ids that go stale once found
        pub stale: Vec<&'static str>,
        /// Navigating to a URL containing this text fails with a page-load timeout
        pub slow_url: Option<&'static str>,
    }

    impl FakePage {
        fn element(&self, id: &str) -> Option<&FakeElement> {
            self.elements.iter().flat_map(|(_, e)| e).find(|e| e.id == id)
        }
    }

    #[derive(Clone)]
    struct Shared {
        page: Arc<FakePage>,
        url: Arc<Mutex<String>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Shared {
        fn record(&self, entry: String) {
            if let Ok(mut log) = self.log.lock() {
                log.push(entry);
            }
        }
    }

    /// Running fake: its base URL and the commands it received, in order.
    pub(crate) struct FakeChromedriver {
        pub url: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeChromedriver {
        pub(crate) fn commands(&self) -> Vec<String> {
            self.log.lock().map(|l| l.clone()).unwrap_or_default()
        }
    }

    type Reply = (StatusCode, Json<Value>);

    fn ok(value: Value) -> Reply {
        (StatusCode::OK, Json(json!({ "value": value })))
    }

    fn failed(status: StatusCode, error: &str, message: &str) -> Reply {
        (
            status,
            Json(json!({ "value": { "error": error, "message": message } })),
        )
    }

    fn reference(id: &str) -> Value {
        let mut object = serde_json::Map::new();
        object.insert(ELEMENT_KEY.to_string(), json!(id));
        Value::Object(object)
    }

    fn no_such_element(what: &str) -> Reply {
        failed(StatusCode::NOT_FOUND, "no such element", &format!("Unable to locate {}", what))
    }

    pub(crate) async fn spawn(page: FakePage) -> std::io::Result<FakeChromedriver> {
        let shared = Shared {
            page: Arc::new(page),
            url: Arc::new(Mutex::new(String::new())),
            log: Arc::new(Mutex::new(Vec::new())),
        };
        let log = shared.log.clone();

        let app = Router::new()
            .route("/session", post(new_session))
            .route("/session/{session}", delete(end_session))
            .route("/session/{session}/url", post(navigate).get(current_url))
            .route("/session/{session}/element", post(find_element))
            .route("/session/{session}/elements", post(find_elements))
            .route("/session/{session}/element/{id}/text", get(text))
            .route("/session/{session}/element/{id}/property/href", get(href))
            .route("/session/{session}/element/{id}/displayed", get(displayed))
            .route("/session/{session}/element/{id}/click", post(click))
            .with_state(shared);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(FakeChromedriver {
            url: format!("http://{}", addr),
            log,
        })
    }

    async fn new_session(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
        let args = &body["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"];
        state.record(format!("new session {}", args));
        ok(json!({ "sessionId": SESSION, "capabilities": {} }))
    }

    async fn end_session(State(state): State<Shared>, Path(session): Path<String>) -> Reply {
        state.record(format!("quit {}", session));
        ok(Value::Null)
    }

    async fn navigate(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
        let url = body["url"].as_str().unwrap_or_default().to_string();
        state.record(format!("navigate {}", url));
        if let Some(slow) = state.page.slow_url {
            if url.contains(slow) {
                return failed(StatusCode::INTERNAL_SERVER_ERROR, "timeout", "page load timed out");
            }
        }
        if let Ok(mut current) = state.url.lock() {
            *current = url;
        }
        ok(Value::Null)
    }

    async fn current_url(State(state): State<Shared>) -> Reply {
        ok(json!(state.url.lock().map(|u| u.clone()).unwrap_or_default()))
    }

    fn matching<'p>(page: &'p FakePage, selector: &str) -> &'p [FakeElement] {
        page.elements
            .iter()
            .find(|(s, _)| *s == selector)
            .map(|(_, e)| e.as_slice())
            .unwrap_or(&[])
    }

    async fn find_element(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
        let selector = body["value"].as_str().unwrap_or_default();
        state.record(format!("find {}", selector));
        match matching(&state.page, selector).first() {
            Some(element) => ok(reference(element.id)),
            None => no_such_element(selector),
        }
    }

    async fn find_elements(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
        let selector = body["value"].as_str().unwrap_or_default();
        state.record(format!("find all {}", selector));
        let ids: Vec<Value> = matching(&state.page, selector)
            .iter()
            .map(|e| reference(e.id))
            .collect();
        ok(Value::Array(ids))
    }

    fn read(state: &Shared, id: &str, property: fn(&FakeElement) -> Value) -> Reply {
        if state.page.stale.iter().any(|s| *s == id) {
            return failed(
                StatusCode::NOT_FOUND,
                "stale element reference",
                "element is not attached to the page document",
            );
        }
        match state.page.element(id) {
            Some(element) => ok(property(element)),
            None => no_such_element(id),
        }
    }

    async fn text(State(state): State<Shared>, Path((_, id)): Path<(String, String)>) -> Reply {
        read(&state, &id, |e| json!(e.text))
    }

    async fn href(State(state): State<Shared>, Path((_, id)): Path<(String, String)>) -> Reply {
        read(&state, &id, |e| json!(e.href))
    }

    async fn displayed(State(state): State<Shared>, Path((_, id)): Path<(String, String)>) -> Reply {
        read(&state, &id, |e| json!(e.displayed))
    }

    async fn click(State(state): State<Shared>, Path((_, id)): Path<(String, String)>) -> Reply {
        state.record(format!("click {}", id));
        ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="abstractSection"><h2>Abstract</h2><p>This   studies
        X.</p><script>var a = 1;</script></div>
        <div style="display: none"><span class="hidden-note">secret</span></div>
        <a class="next" href="/page/2">Next</a>
        <ul><li class="item">one</li><li class="item">two</li></ul>
    </body></html>"#;

    fn driver() -> HtmlDriver<MemorySource> {
        HtmlDriver::new(MemorySource::new(&[
            ("https://example.org/page/1", PAGE),
            ("https://example.org/page/2", "<p class='done'>done</p>"),
        ]))
    }

    #[tokio::test]
    async fn test_rendered_text_and_links() -> Result<()> {
        let mut driver = driver();
        driver.navigate("https://example.org/page/1").await?;

        let abstract_el = driver.find_element(".abstractSection").await?;
        assert_eq!(abstract_el.text, "Abstract\nThis studies X.");
        assert!(abstract_el.displayed);

        let next = driver.find_element("a.next").await?;
        assert_eq!(next.href.as_deref(), Some("https://example.org/page/2"));

        let hidden = driver.find_element(".hidden-note").await?;
        assert!(!hidden.displayed);

        assert_eq!(driver.find_elements("li.item").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_click_follows_href() -> Result<()> {
        let mut driver = driver();
        driver.navigate("https://example.org/page/1").await?;
        let next = driver.find_element("a.next").await?;
        driver.click(&next).await?;
        assert_eq!(driver.current_url().await?, "https://example.org/page/2");
        assert_eq!(driver.find_element(".done").await?.text, "done");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_element() -> Result<()> {
        let mut driver = driver();
        driver.navigate("https://example.org/page/1").await?;
        let result = driver.find_element(".CitationCoverDate").await;
        assert!(matches!(result, Err(AcmError::ElementNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_times_out_on_hidden_element() -> Result<()> {
        let mut driver = driver();
        driver.navigate("https://example.org/page/1").await?;
        let wait = Wait::new(Duration::from_millis(30), Duration::from_millis(5));

        let result = wait.until_visible(&mut driver, ".hidden-note").await;
        assert!(matches!(result, Err(AcmError::Timeout { .. })));

        let items = wait.until_all_visible(&mut driver, "li.item").await?;
        assert_eq!(items.len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_selector_is_parse_error() {
        let base = Url::parse("https://example.org/").expect("url");
        let result = select_elements("<p></p>", &base, "div[");
        assert!(matches!(result, Err(AcmError::Parse(_))));
    }

    fn listing_page() -> chromedriver::FakePage {
        use chromedriver::FakeElement;
        chromedriver::FakePage {
            elements: vec![
                (
                    ".title a",
                    vec![
                        FakeElement::new("e-1", "First").href("https://dl.acm.org/doi/1"),
                        FakeElement::new("e-2", "Second").href("https://dl.acm.org/doi/2"),
                    ],
                ),
                (".gone", vec![FakeElement::new("e-stale", "old")]),
            ],
            stale: vec!["e-stale"],
            slow_url: Some("/slow"),
        }
    }

    #[tokio::test]
    async fn test_webdriver_session_commands() -> Result<()> {
        let fake = chromedriver::spawn(listing_page()).await?;
        let mut session = WebDriverSession::start(&fake.url, true).await?;

        session.navigate("https://dl.acm.org/listing").await?;
        assert_eq!(session.current_url().await?, "https://dl.acm.org/listing");

        let links = session.find_elements(".title a").await?;
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].handle, "e-1");
        assert_eq!(links[1].text, "Second");
        assert_eq!(links[1].href.as_deref(), Some("https://dl.acm.org/doi/2"));
        assert!(links.iter().all(|l| l.displayed));
        assert!(session.find_elements(".none").await?.is_empty());

        session.click(&links[0]).await?;
        session.quit().await?;

        let commands = fake.commands();
        assert!(commands[0].starts_with("new session"));
        assert!(commands[0].contains("--headless"));
        assert!(commands.contains(&"click e-1".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some("quit session-1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_webdriver_missing_and_stale_elements_are_not_found() -> Result<()> {
        let fake = chromedriver::spawn(listing_page()).await?;
        let mut session = WebDriverSession::start(&fake.url, false).await?;

        let missing = session.find_element(".CitationCoverDate").await;
        assert!(matches!(missing, Err(AcmError::ElementNotFound { selector }) if selector == ".CitationCoverDate"));

        let stale = session.find_element(".gone").await;
        assert!(matches!(stale, Err(AcmError::ElementNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_webdriver_page_load_failure_is_browser_error() -> Result<()> {
        let fake = chromedriver::spawn(listing_page()).await?;
        let mut session = WebDriverSession::start(&fake.url, true).await?;

        let result = session.navigate("https://dl.acm.org/slow").await;
        assert!(matches!(result, Err(AcmError::Browser(msg)) if msg.starts_with("timeout")));
        Ok(())
    }
}
