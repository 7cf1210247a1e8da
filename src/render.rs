//! Rendering fallback: drives a headless browser session that expands
//! click-revealed content before the extractor sees the markup.
//!
//! The matcher table and readiness heuristic live outside the `render`
//! feature so the orchestrator can use them (and tests can exercise them)
//! without a browser.

/// How an expansion-control pattern matches a candidate element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionPattern {
    /// Case-insensitive fragment of the element's visible text.
    Text(&'static str),
    /// Case-insensitive fragment of the element's class attribute.
    ClassFragment(&'static str),
}

/// Ordered matcher table for expansion controls; first match wins.
pub const EXPANSION_PATTERNS: &[ExpansionPattern] = &[
    ExpansionPattern::Text("view more"),
    ExpansionPattern::Text("load more"),
    ExpansionPattern::Text("see more"),
    ExpansionPattern::Text("show more"),
    ExpansionPattern::ClassFragment("view-more"),
    ExpansionPattern::ClassFragment("load-more"),
    ExpansionPattern::ClassFragment("see-more"),
    ExpansionPattern::ClassFragment("show-more"),
];

/// Keywords whose presence marks a listings page as carrying event content.
const READY_KEYWORDS: &[&str] = &["/events/"];

impl ExpansionPattern {
    /// Applies the pattern to an element's lowercased text and class strings.
    pub fn matches(&self, text: &str, class: &str) -> bool {
        match self {
            Self::Text(needle) => text.contains(needle),
            Self::ClassFragment(needle) => class.contains(needle),
        }
    }
}

/// True when markup hints at an expansion control, meaning a plain fetch
/// likely missed click-revealed listings.
pub fn expansion_hint_present(html: &str) -> bool {
    let lowered = html.to_lowercase();
    EXPANSION_PATTERNS
        .iter()
        .any(|pattern| pattern.matches(&lowered, &lowered))
}

/// Heuristic for "sufficiently loaded" rendered markup: big enough, enough
/// anchors, or an event-content keyword present — whichever holds first.
pub fn page_is_ready(html: &str, min_bytes: usize, min_anchors: usize) -> bool {
    if html.len() >= min_bytes {
        return true;
    }
    if html.matches("<a ").count() >= min_anchors {
        return true;
    }
    READY_KEYWORDS.iter().any(|keyword| html.contains(keyword))
}

/// In-page script that finds the first element matching the expansion table,
/// scrolls it into view, clicks it, and reports whether anything was clicked.
pub fn click_script() -> String {
    let table = EXPANSION_PATTERNS
        .iter()
        .map(|pattern| match pattern {
            ExpansionPattern::Text(needle) => format!("[\"text\",\"{needle}\"]"),
            ExpansionPattern::ClassFragment(needle) => format!("[\"class\",\"{needle}\"]"),
        })
        .collect::<Vec<_>>()
        .join(",");

    format!(
        r#"(() => {{
  const patterns = [{table}];
  const candidates = Array.from(
    document.querySelectorAll('button, a, [role="button"], [class*="more"]')
  );
  for (const [kind, needle] of patterns) {{
    for (const el of candidates) {{
      const hay = kind === "text"
        ? (el.textContent || "").trim().toLowerCase()
        : String(el.className || "").toLowerCase();
      if (hay.includes(needle)) {{
        el.scrollIntoView({{ block: "center" }});
        el.click();
        return true;
      }}
    }}
  }}
  return false;
}})()"#
    )
}

#[cfg(feature = "render")]
pub use session::{RenderError, RenderFetcher};

#[cfg(feature = "render")]
mod session {
    use std::error::Error;
    use std::fmt;
    use std::time::Duration;

    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::error::CdpError;
    use chromiumoxide::Page;
    use futures_util::StreamExt;
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, Instant};
    use tracing::{debug, warn};
    use url::Url;

    use super::{click_script, page_is_ready};
    use crate::controls::ScrapeControls;
    use crate::fetch::FetchResult;

    /// Flags that keep the session from advertising itself as automated.
    const STEALTH_ARGS: &[&str] = &[
        "--disable-blink-features=AutomationControlled",
        "--disable-infobars",
        "--no-first-run",
        "--no-default-browser-check",
    ];

    const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
    const SCROLL_PAUSE: Duration = Duration::from_millis(400);
    const SCROLL_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";
    const SCROLL_TOP: &str = "window.scrollTo(0, 0)";

    /// Errors surfaced while driving the rendering session.
    #[derive(Debug)]
    pub enum RenderError {
        /// Browser configuration was rejected.
        Config(String),
        /// The browser process could not be launched.
        Launch(CdpError),
        /// A page could not be opened inside the session.
        Session(CdpError),
        /// Navigation to the listings URL failed.
        Navigation(CdpError),
        /// Final markup could not be read back.
        Content(CdpError),
    }

    impl fmt::Display for RenderError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Config(msg) => write!(f, "browser config rejected: {msg}"),
                Self::Launch(err) => write!(f, "browser launch failed: {err}"),
                Self::Session(err) => write!(f, "page setup failed: {err}"),
                Self::Navigation(err) => write!(f, "navigation failed: {err}"),
                Self::Content(err) => write!(f, "reading rendered markup failed: {err}"),
            }
        }
    }

    impl Error for RenderError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                Self::Config(_) => None,
                Self::Launch(err)
                | Self::Session(err)
                | Self::Navigation(err)
                | Self::Content(err) => Some(err),
            }
        }
    }

    /// Rendering tier: an isolated headless session per fetch.
    pub struct RenderFetcher {
        controls: ScrapeControls,
    }

    impl RenderFetcher {
        /// Captures the thresholds the session needs.
        pub fn new(controls: ScrapeControls) -> Self {
            Self { controls }
        }

        /// Renders `url`, expanding click-revealed content up to
        /// `max_expansions` times, and returns rendered-tagged markup.
        ///
        /// The browser session is released on every exit path.
        pub async fn fetch_rendered(
            &self,
            url: &Url,
            max_expansions: u32,
        ) -> Result<FetchResult, RenderError> {
            let (browser, handler_task) = Self::launch().await?;
            let outcome = self.drive(&browser, url, max_expansions).await;
            Self::shutdown(browser, handler_task).await;
            Ok(FetchResult::rendered(outcome?))
        }

        async fn launch() -> Result<(Browser, JoinHandle<()>), RenderError> {
            let config = BrowserConfig::builder()
                .args(STEALTH_ARGS.iter().copied())
                .build()
                .map_err(RenderError::Config)?;
            let (browser, mut handler) =
                Browser::launch(config).await.map_err(RenderError::Launch)?;
            let handler_task = tokio::task::spawn(async move {
                while handler.next().await.is_some() {}
            });
            Ok((browser, handler_task))
        }

        async fn drive(
            &self,
            browser: &Browser,
            url: &Url,
            max_expansions: u32,
        ) -> Result<String, RenderError> {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(RenderError::Session)?;
            page.goto(url.as_str())
                .await
                .map_err(RenderError::Navigation)?;
            // The readiness poll below is the real gate; the navigation
            // event alone often fires before client-side content lands.
            let _ = page.wait_for_navigation().await;

            self.wait_until_ready(&page).await;
            self.nudge_lazy_content(&page).await;

            let script = click_script();
            for round in 1..=max_expansions {
                if !Self::click_expansion(&page, &script).await {
                    debug!(round, "no expansion control found, stopping");
                    break;
                }
                sleep(self.controls.settle_delay()).await;
            }

            page.content().await.map_err(RenderError::Content)
        }

        async fn wait_until_ready(&self, page: &Page) {
            let deadline = Instant::now() + self.controls.render_wait();
            while Instant::now() < deadline {
                if let Ok(html) = page.content().await {
                    if page_is_ready(
                        &html,
                        self.controls.min_content_bytes(),
                        self.controls.ready_anchor_count(),
                    ) {
                        return;
                    }
                }
                sleep(READY_POLL_INTERVAL).await;
            }
            warn!("rendered page never looked fully loaded, continuing with what arrived");
        }

        async fn nudge_lazy_content(&self, page: &Page) {
            let _ = page.evaluate(SCROLL_BOTTOM).await;
            sleep(SCROLL_PAUSE).await;
            let _ = page.evaluate(SCROLL_TOP).await;
        }

        async fn click_expansion(page: &Page, script: &str) -> bool {
            match page.evaluate(script).await {
                Ok(result) => result.into_value::<bool>().unwrap_or(false),
                Err(err) => {
                    debug!(error = %err, "expansion click script failed");
                    false
                }
            }
        }

        async fn shutdown(mut browser: Browser, handler_task: JoinHandle<()>) {
            if let Err(err) = browser.close().await {
                warn!(error = %err, "browser did not close cleanly");
            }
            let _ = browser.wait().await;
            handler_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_patterns_outrank_class_patterns() {
        let first_class = EXPANSION_PATTERNS
            .iter()
            .position(|p| matches!(p, ExpansionPattern::ClassFragment(_)))
            .expect("class patterns present");
        assert!(EXPANSION_PATTERNS[..first_class]
            .iter()
            .all(|p| matches!(p, ExpansionPattern::Text(_))));
    }

    #[test]
    fn patterns_match_text_and_class_independently() {
        let text = ExpansionPattern::Text("view more");
        assert!(text.matches("view more events", ""));
        assert!(!text.matches("", "view-more"));

        let class = ExpansionPattern::ClassFragment("load-more");
        assert!(class.matches("", "btn btn-load-more"));
        assert!(!class.matches("load more", ""));
    }

    #[test]
    fn expansion_hints_are_case_insensitive() {
        assert!(expansion_hint_present("<button>View More</button>"));
        assert!(expansion_hint_present("<div class=\"LOAD-MORE\"></div>"));
        assert!(!expansion_hint_present("<div>All events shown</div>"));
    }

    #[test]
    fn readiness_accepts_any_single_signal() {
        let big = "x".repeat(50_000);
        assert!(page_is_ready(&big, 50_000, 30));

        let many_anchors = "<a href=\"#\">x</a>".repeat(30);
        assert!(page_is_ready(&many_anchors, 50_000, 30));

        assert!(page_is_ready("<a href=\"/events/x\">x</a>", 50_000, 30));
        assert!(!page_is_ready("<p>loading…</p>", 50_000, 30));
    }

    #[test]
    fn click_script_embeds_the_matcher_table_in_order() {
        let script = click_script();
        let view = script.find("view more").expect("view more present");
        let load = script.find("load-more").expect("load-more present");
        assert!(view < load);
        assert!(script.contains("scrollIntoView"));
    }
}
