//! Chromium-driven archive retrieval.
//!
//! The files page only produces the archive after a JavaScript countdown that
//! starts when the download control is clicked, so the page is driven through
//! a real browser over the DevTools protocol and the browser's own download
//! events tell us when the zip has landed on disk.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        browser::{
            DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
            SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
        },
        network::SetUserAgentOverrideParams,
        page::AddScriptToEvaluateOnNewDocumentParams,
    },
    element::Element,
    listeners::EventStream,
    page::Page,
};
use futures_util::StreamExt;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::{ArchiveFetcher, FetchError, Result, thing_files_url};
use crate::{config::BrowserOptions, registry::ThingId};

/// Time given to client-side rendering after the DOM is loaded
const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// How long each locator is polled for a visible match
const LOCATOR_WAIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const BROWSER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined});";

const IS_VISIBLE: &str = "function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    return rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none';
}";

/// A way of finding the download control on the files page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// Elements matching `css` whose trimmed text equals `text`
    ExactText {
        css: &'static str,
        text: &'static str,
    },
    /// Elements matching `css` whose text contains `text`
    ContainsText {
        css: &'static str,
        text: &'static str,
    },
    Css(&'static str),
}

/// Tried in order until one yields a visible element.
pub const DOWNLOAD_LOCATORS: &[Locator] = &[
    Locator::ExactText {
        css: "button, a, span",
        text: "Download All Files",
    },
    Locator::ContainsText {
        css: "button",
        text: "Download",
    },
    Locator::ContainsText {
        css: "a",
        text: "Download All",
    },
    Locator::Css("[class*='download']"),
];

impl Locator {
    pub fn css(&self) -> &'static str {
        match self {
            Self::ExactText { css, .. } | Self::ContainsText { css, .. } => *css,
            Self::Css(css) => *css,
        }
    }

    fn needs_text(&self) -> bool {
        !matches!(self, Self::Css(_))
    }

    /// Whether an element with the given rendered text satisfies this locator.
    ///
    /// Runs of whitespace count as a single space. Containment ignores case,
    /// exact matches do not.
    pub fn accepts_text(&self, element_text: Option<&str>) -> bool {
        match self {
            Self::ExactText { text, .. } => {
                element_text.is_some_and(|t| collapse_whitespace(t) == collapse_whitespace(text))
            }
            Self::ContainsText { text, .. } => element_text.is_some_and(|t| {
                collapse_whitespace(t)
                    .to_lowercase()
                    .contains(&collapse_whitespace(text).to_lowercase())
            }),
            Self::Css(_) => true,
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactText { css, text } => write!(f, "{css} with text '{text}'"),
            Self::ContainsText { css, text } => write!(f, "{css} containing '{text}'"),
            Self::Css(css) => f.write_str(css),
        }
    }
}

/// Fetches thing archives by clicking through the files page in Chromium.
#[derive(Debug, Clone)]
pub struct ChromiumFetcher {
    options: BrowserOptions,
}

impl ChromiumFetcher {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }
}

impl ArchiveFetcher for ChromiumFetcher {
    #[instrument(name = "fetch_archive", level = "debug", skip(self, thing_id, download_dir), fields(thing = %thing_id))]
    async fn fetch_archive(&self, thing_id: &ThingId, download_dir: &Path) -> Result<PathBuf> {
        let url = thing_files_url(&self.options.site_url, thing_id)?;
        info!(url = %url, download_dir = ?download_dir, "Downloading archive with Chromium");

        let session = Session::launch(&self.options).await?;
        let result = session.download(url.as_str(), download_dir).await;
        // Always tear the browser down, whatever happened on the page
        session.shutdown().await;
        result
    }

    fn manual_url(&self, thing_id: &ThingId) -> String {
        match thing_files_url(&self.options.site_url, thing_id) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}/thing:{thing_id}/files", super::DEFAULT_SITE_URL),
        }
    }
}

/// One browser process plus the task pumping its DevTools connection
struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    timeout: Duration,
    user_agent: String,
}

impl Session {
    async fn launch(options: &BrowserOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .request_timeout(options.timeout())
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");
        if options.headful {
            builder = builder.with_head();
        }
        if let Some(chrome) = &options.chrome {
            builder = builder.chrome_executable(chrome);
        }

        let config = builder.build().map_err(|e| {
            FetchError::BrowserUnavailable(format!(
                "{e}; install Chromium or point STLFETCH_CHROME at a Chrome executable"
            ))
        })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::BrowserUnavailable(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!(error = %e, "Browser handler error");
                }
            }
        });

        info!("Browser launched");
        Ok(Self {
            browser,
            handler,
            timeout: options.timeout(),
            user_agent: options.user_agent.clone(),
        })
    }

    async fn download(&self, url: &str, download_dir: &Path) -> Result<PathBuf> {
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .events_enabled(true)
            .build()
            .map_err(FetchError::Protocol)?;
        self.browser.execute(behavior).await?;

        let page = self.browser.new_page("about:blank").await?;
        page.set_user_agent(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
            .await?;

        info!(url, "Loading files page");
        tokio::time::timeout(self.timeout, page.goto(url.to_string()))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout, "loading the files page"))??;
        tokio::time::sleep(SETTLE_DELAY).await;
        debug!("Page loaded");

        let Some(control) = find_download_control(&page).await else {
            let title = page.get_title().await.ok().flatten();
            error!(url, title = ?title, "Could not find download control");
            return Err(FetchError::ControlNotFound {
                url: url.to_string(),
                title,
            });
        };

        // Subscribe before clicking so the start event cannot be missed
        let mut started = self.browser.event_listener::<EventDownloadWillBegin>().await?;
        let mut progress = self.browser.event_listener::<EventDownloadProgress>().await?;

        info!("Clicking download control, waiting for countdown and download");
        control.click().await?;

        tokio::time::timeout(
            self.timeout,
            wait_for_download(&mut started, &mut progress, download_dir),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.timeout, "waiting for the download"))?
    }

    async fn shutdown(mut self) {
        let closed = match self.browser.close().await {
            Ok(_) => exited_within(BROWSER_EXIT_TIMEOUT, self.browser.wait()).await,
            Err(e) => {
                debug!(error = %e, "Failed to close browser cleanly");
                false
            }
        };
        if !closed {
            warn!("Browser did not exit, killing it");
            if let Some(Err(e)) = self.browser.kill().await {
                debug!(error = %e, "Failed to kill browser");
            }
        }
        self.handler.abort();
        debug!("Browser closed");
    }
}

/// Waits for `exit` for at most `limit`. Returns false on timeout or error.
async fn exited_within<F, T>(limit: Duration, exit: F) -> bool
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, exit).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Failed to wait for browser exit");
            false
        }
        Err(_) => false,
    }
}

async fn find_download_control(page: &Page) -> Option<Element> {
    for locator in DOWNLOAD_LOCATORS {
        if let Some(element) = find_visible(page, locator).await {
            info!(locator = %locator, "Found download control");
            return Some(element);
        }
        debug!(locator = %locator, "No visible match");
    }
    None
}

async fn find_visible(page: &Page, locator: &Locator) -> Option<Element> {
    let deadline = Instant::now() + LOCATOR_WAIT;
    loop {
        let elements = page.find_elements(locator.css()).await.unwrap_or_default();
        for element in elements {
            let text = if locator.needs_text() {
                element.inner_text().await.ok().flatten()
            } else {
                None
            };
            if locator.accepts_text(text.as_deref()) && is_visible(&element).await {
                return Some(element);
            }
        }

        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn is_visible(element: &Element) -> bool {
    match element.call_js_fn(IS_VISIBLE, false).await {
        Ok(ret) => ret
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        Err(e) => {
            trace!(error = %e, "Visibility check failed");
            false
        }
    }
}

async fn wait_for_download(
    started: &mut EventStream<EventDownloadWillBegin>,
    progress: &mut EventStream<EventDownloadProgress>,
    download_dir: &Path,
) -> Result<PathBuf> {
    // (guid, suggested file name) of the download we are following
    let mut current: Option<(String, String)> = None;

    loop {
        tokio::select! {
            Some(event) = started.next() => {
                info!(file = %event.suggested_filename, url = %event.url, "Download started");
                current = Some((event.guid.clone(), event.suggested_filename.clone()));
            }
            Some(event) = progress.next() => {
                let ours = current.as_ref().is_none_or(|(guid, _)| *guid == event.guid);
                if ours {
                    match event.state {
                        DownloadProgressState::InProgress => {
                            trace!(
                                received = event.received_bytes,
                                total = event.total_bytes,
                                "Download progress"
                            );
                        }
                        DownloadProgressState::Completed => {
                            let suggested = current.as_ref().map(|(_, name)| download_dir.join(name));
                            return locate_download(download_dir, suggested).await;
                        }
                        DownloadProgressState::Canceled => {
                            warn!("Download cancelled");
                            return Err(FetchError::DownloadCancelled);
                        }
                    }
                }
            }
            else => return Err(FetchError::DownloadCancelled),
        }
    }
}

/// Resolves the finished download, falling back to scanning the directory.
async fn locate_download(download_dir: &Path, suggested: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = suggested {
        if tokio::fs::try_exists(&path).await? {
            info!(path = ?path, "Download complete");
            return Ok(path);
        }
    }

    let mut entries = tokio::fs::read_dir(download_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let partial = path.extension().is_some_and(|ext| ext == "crdownload");
        if entry.file_type().await?.is_file() && !partial {
            info!(path = ?path, "Download complete");
            return Ok(path);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "browser reported a finished download but no file was saved",
    )
    .into())
}
