//! Run loop coordinating the per-date fetch tiers, extraction, and export.

use std::error::Error;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use tokio::runtime::Builder;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::artifact::{ArtifactError, ArtifactWriter};
use crate::controls::{Cli, ScrapeControls};
use crate::event::DayBuckets;
use crate::extract::EventExtractor;
use crate::fetch::{FetchError, FetchResult, NetworkFetcher};
use crate::render::expansion_hint_present;
use crate::window::{listings_url, DateWindow};

/// Boxed error alias used at the runtime boundary.
pub type DynError = Box<dyn Error + Send + Sync>;

/// Errors that abort a run.
#[derive(Debug)]
pub enum RunError {
    /// The configured base URL is not a valid absolute URL.
    InvalidBaseUrl(url::ParseError),
    /// Every fetch tier failed for one target date.
    DateFailed {
        /// Date whose markup could not be obtained.
        date: NaiveDate,
        /// Final network-tier error, when the network tier ran.
        source: Option<FetchError>,
    },
    /// The workbook could not be written.
    Artifact(ArtifactError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(err) => write!(f, "invalid base url: {err}"),
            Self::DateFailed {
                date,
                source: Some(err),
            } => {
                write!(f, "all fetch tiers failed for {date}: {err}")
            }
            Self::DateFailed { date, source: None } => {
                write!(f, "all fetch tiers failed for {date}")
            }
            Self::Artifact(err) => write!(f, "artifact write failed: {err}"),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidBaseUrl(err) => Some(err),
            Self::DateFailed {
                source: Some(err), ..
            } => Some(err),
            Self::DateFailed { source: None, .. } => None,
            Self::Artifact(err) => Some(err),
        }
    }
}

/// Entry point: builds a current-thread runtime and drives the whole run.
pub fn run(cli: Cli) -> Result<(), DynError> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run_pipeline(cli))
}

async fn run_pipeline(cli: Cli) -> Result<(), DynError> {
    let controls = cli.build_controls();
    let started = Instant::now();
    let window = DateWindow::starting(Local::now().date_naive());
    let base = Url::parse(controls.base_url()).map_err(RunError::InvalidBaseUrl)?;

    let fetcher = NetworkFetcher::new(&controls)?;
    let extractor = EventExtractor::new(base);
    let mut metrics = Metrics::default();
    let mut buckets = DayBuckets::for_window(&window);

    if controls.force_render() {
        if cfg!(feature = "render") {
            info!("continuous-integration environment detected, skipping the network tier");
        } else {
            warn!("network-tier skip requested but this build carries no rendering tier, keeping the network tier");
        }
    }

    for (index, date) in window.iter().enumerate() {
        pace(index, &controls).await;

        let url = listings_url(controls.base_url(), date).map_err(RunError::InvalidBaseUrl)?;
        info!(%url, %date, "processing target date");

        let markup = fetch_markup(&fetcher, &controls, &url, &mut metrics)
            .await
            .map_err(|source| RunError::DateFailed { date, source })?;
        info!(
            strategy = %markup.strategy,
            size_bytes = markup.size_bytes,
            "markup selected"
        );

        let events = extractor.extract(&markup.html, date);
        if events.is_empty() {
            info!(%date, "no events found");
        }
        metrics.record_events(events.len());
        metrics.record_date();
        buckets.fill(date, events);
    }

    let dest = controls.output_path(window.first());
    let written = ArtifactWriter::new()
        .write(&buckets, &dest)
        .map_err(RunError::Artifact)?;
    metrics.report(started.elapsed(), &written);
    Ok(())
}

/// Obtains markup for one target date, escalating to the rendering tier when
/// the network result is missing or looks incomplete.
async fn fetch_markup(
    fetcher: &NetworkFetcher,
    controls: &ScrapeControls,
    url: &Url,
    metrics: &mut Metrics,
) -> Result<FetchResult, Option<FetchError>> {
    let mut network_error = None;
    let network = if controls.force_render() && cfg!(feature = "render") {
        None
    } else {
        match fetcher.fetch(url).await {
            Ok(result) => {
                metrics.record_page_fetched();
                Some(result)
            }
            Err(err) => {
                warn!(%url, error = %err, "network tier failed, escalating to rendering");
                network_error = Some(err);
                None
            }
        }
    };

    let needs_render = network
        .as_ref()
        .map_or(true, |result| needs_rendering(result, controls));
    let rendered = if needs_render {
        render_tier(url, controls, metrics).await
    } else {
        None
    };

    select_markup(network, rendered, controls.improvement_ratio()).ok_or(network_error)
}

/// Signals that a network result likely misses click-revealed content.
fn needs_rendering(result: &FetchResult, controls: &ScrapeControls) -> bool {
    result.size_bytes < controls.min_content_bytes() || expansion_hint_present(&result.html)
}

/// Tier-selection rule: a failed network fetch hands the rendered result the
/// win outright; otherwise the rendered result must beat the network result
/// by the improvement ratio, which protects good network content from
/// degraded rendering (anti-bot interstitials and the like).
fn select_markup(
    network: Option<FetchResult>,
    rendered: Option<FetchResult>,
    improvement_ratio: f64,
) -> Option<FetchResult> {
    match (network, rendered) {
        (None, rendered) => rendered,
        (Some(network), None) => Some(network),
        (Some(network), Some(rendered)) => {
            if rendered.size_bytes as f64 > network.size_bytes as f64 * improvement_ratio {
                Some(rendered)
            } else {
                Some(network)
            }
        }
    }
}

#[cfg(feature = "render")]
async fn render_tier(
    url: &Url,
    controls: &ScrapeControls,
    metrics: &mut Metrics,
) -> Option<FetchResult> {
    let renderer = crate::render::RenderFetcher::new(controls.clone());
    match renderer.fetch_rendered(url, controls.max_expansions()).await {
        Ok(result) => {
            metrics.record_page_rendered();
            Some(result)
        }
        Err(err) => {
            warn!(%url, error = %err, "rendering tier failed, keeping the network result");
            None
        }
    }
}

#[cfg(not(feature = "render"))]
async fn render_tier(
    url: &Url,
    _controls: &ScrapeControls,
    _metrics: &mut Metrics,
) -> Option<FetchResult> {
    warn!(%url, "rendering needed but this build carries no rendering tier, continuing with network content only");
    None
}

/// Inter-request pacing; the first request of a run uses the shorter warm-up.
async fn pace(index: usize, controls: &ScrapeControls) {
    let delay = if index == 0 {
        controls.warmup_delay()
    } else {
        controls.request_delay()
    };
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

#[derive(Debug, Default)]
struct Metrics {
    dates_processed: usize,
    pages_fetched: usize,
    pages_rendered: usize,
    events_found: usize,
}

impl Metrics {
    fn record_date(&mut self) {
        self.dates_processed += 1;
    }

    fn record_page_fetched(&mut self) {
        self.pages_fetched += 1;
    }

    fn record_page_rendered(&mut self) {
        self.pages_rendered += 1;
    }

    fn record_events(&mut self, count: usize) {
        self.events_found += count;
    }

    fn report(&self, elapsed: Duration, artifact: &Path) {
        info!(
            elapsed_secs = elapsed.as_secs(),
            dates = self.dates_processed,
            pages_fetched = self.pages_fetched,
            pages_rendered = self.pages_rendered,
            events = self.events_found,
            artifact = %artifact.display(),
            "run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::SourceStrategy;

    fn network_result(size: usize) -> FetchResult {
        FetchResult::network("x".repeat(size))
    }

    fn rendered_result(size: usize) -> FetchResult {
        FetchResult::rendered("x".repeat(size))
    }

    #[test]
    fn rendered_wins_unconditionally_when_network_failed() {
        let selected =
            select_markup(None, Some(rendered_result(10)), 1.5).expect("rendered selected");
        assert_eq!(selected.strategy, SourceStrategy::Rendered);
    }

    #[test]
    fn rendered_must_beat_network_by_the_improvement_ratio() {
        let kept = select_markup(Some(network_result(100)), Some(rendered_result(150)), 1.5)
            .expect("network kept");
        assert_eq!(kept.strategy, SourceStrategy::Network);

        let replaced = select_markup(Some(network_result(100)), Some(rendered_result(151)), 1.5)
            .expect("rendered selected");
        assert_eq!(replaced.strategy, SourceStrategy::Rendered);
    }

    #[test]
    fn network_result_survives_absent_rendering() {
        let selected =
            select_markup(Some(network_result(10)), None, 1.5).expect("network selected");
        assert_eq!(selected.strategy, SourceStrategy::Network);
    }

    #[test]
    fn nothing_selected_when_both_tiers_failed() {
        assert!(select_markup(None, None, 1.5).is_none());
    }

    #[test]
    fn small_or_expandable_markup_escalates_to_rendering() {
        let controls = ScrapeControls::default();

        let small = network_result(10);
        assert!(needs_rendering(&small, &controls));

        let mut big = "x".repeat(60_000);
        big.push_str("<button>View More</button>");
        assert!(needs_rendering(&FetchResult::network(big), &controls));

        let complete = network_result(60_000);
        assert!(!needs_rendering(&complete, &controls));
    }
}
