//! Scrape throttle, threshold, and output controls shared across the pipeline.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

/// Tunable knobs that bound fetch, rendering, and output behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct ScrapeControls {
    base_url: String,
    output_dir: PathBuf,
    output_prefix: String,
    min_content_bytes: usize,
    improvement_ratio: f64,
    request_delay: Duration,
    warmup_delay: Duration,
    max_expansions: u32,
    render_wait: Duration,
    settle_delay: Duration,
    ready_anchor_count: usize,
    rate_limit_attempts: u32,
    rate_limit_backoff: Duration,
    server_retries: u32,
    server_backoff: Duration,
    http_timeout: Duration,
    force_render: bool,
}

impl ScrapeControls {
    /// Base city-listings URL that target dates are appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Directory receiving the output workbook.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File-name prefix for the output workbook.
    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    /// Markup below this size is treated as incomplete and escalated to rendering.
    pub fn min_content_bytes(&self) -> usize {
        self.min_content_bytes
    }

    /// Rendered markup must beat network markup by this factor to be selected.
    pub fn improvement_ratio(&self) -> f64 {
        self.improvement_ratio
    }

    /// Pause between consecutive target-date requests.
    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    /// Shorter pause before the first request of a run.
    pub fn warmup_delay(&self) -> Duration {
        self.warmup_delay
    }

    /// Upper bound on expansion-control activations per rendered page.
    pub fn max_expansions(&self) -> u32 {
        self.max_expansions
    }

    /// Ceiling on the readiness wait inside a rendering session.
    pub fn render_wait(&self) -> Duration {
        self.render_wait
    }

    /// Pause after an expansion click while new content settles.
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Anchor count at which a rendered page counts as sufficiently loaded.
    pub fn ready_anchor_count(&self) -> usize {
        self.ready_anchor_count
    }

    /// Total attempts allowed against a rate-limiting endpoint.
    pub fn rate_limit_attempts(&self) -> u32 {
        self.rate_limit_attempts
    }

    /// Base backoff applied when the server supplies no retry delay.
    pub fn rate_limit_backoff(&self) -> Duration {
        self.rate_limit_backoff
    }

    /// Retries allowed after a server-side (5xx) failure.
    pub fn server_retries(&self) -> u32 {
        self.server_retries
    }

    /// Linear backoff step between server-error retries.
    pub fn server_backoff(&self) -> Duration {
        self.server_backoff
    }

    /// Socket-level timeout for a single request.
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Skip the network tier and go straight to rendering.
    pub fn force_render(&self) -> bool {
        self.force_render
    }

    /// Workbook destination for a run that started on `run_date`.
    pub fn output_path(&self, run_date: NaiveDate) -> PathBuf {
        self.output_dir
            .join(format!("{}_{run_date}.xlsx", self.output_prefix))
    }
}

impl Default for ScrapeControls {
    fn default() -> Self {
        Self {
            base_url: "https://shotgun.live/en/cities/paris".to_string(),
            output_dir: PathBuf::from("output"),
            output_prefix: "paris_events".to_string(),
            min_content_bytes: 50_000,
            improvement_ratio: 1.5,
            request_delay: Duration::from_secs(8),
            warmup_delay: Duration::from_secs(1),
            max_expansions: 12,
            render_wait: Duration::from_secs(20),
            settle_delay: Duration::from_millis(1200),
            ready_anchor_count: 30,
            rate_limit_attempts: 3,
            rate_limit_backoff: Duration::from_secs(60),
            server_retries: 2,
            server_backoff: Duration::from_secs(5),
            http_timeout: Duration::from_secs(20),
            force_render: false,
        }
    }
}

/// Command-line interface for the scraper binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "eventcrawl",
    about = "Export upcoming city event listings to a spreadsheet"
)]
pub struct Cli {
    /// Base city-listings URL; the target date is appended as an ISO path segment
    #[arg(
        long,
        env = "EVENTCRAWL_BASE_URL",
        default_value = "https://shotgun.live/en/cities/paris"
    )]
    pub base_url: String,

    /// Directory receiving the output workbook
    #[arg(long, env = "EVENTCRAWL_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// File-name prefix for the output workbook
    #[arg(long, env = "EVENTCRAWL_OUTPUT_PREFIX", default_value = "paris_events")]
    pub output_prefix: String,

    /// Minimum markup size (bytes) before rendering is considered unnecessary
    #[arg(long, env = "EVENTCRAWL_MIN_CONTENT_BYTES", default_value_t = 50_000)]
    pub min_content_bytes: usize,

    /// Size factor a rendered page must exceed to replace network markup
    #[arg(long, env = "EVENTCRAWL_IMPROVEMENT_RATIO", default_value_t = 1.5)]
    pub improvement_ratio: f64,

    /// Milliseconds to pause between consecutive target dates
    #[arg(long, env = "EVENTCRAWL_REQUEST_DELAY_MS", default_value_t = 8000)]
    pub request_delay_ms: u64,

    /// Milliseconds to pause before the first request of the run
    #[arg(long, env = "EVENTCRAWL_WARMUP_DELAY_MS", default_value_t = 1000)]
    pub warmup_delay_ms: u64,

    /// Maximum "view more" activations per rendered page
    #[arg(long, env = "EVENTCRAWL_MAX_EXPANSIONS", default_value_t = 12)]
    pub max_expansions: u32,

    /// Seconds to wait for a rendered page to look sufficiently loaded
    #[arg(long, env = "EVENTCRAWL_RENDER_WAIT_SECS", default_value_t = 20)]
    pub render_wait_secs: u64,

    /// Skip the network tier and render every page (implied by a CI environment)
    #[arg(long, default_value_t = false)]
    pub ci: bool,
}

impl Cli {
    /// Converts the parsed CLI into `ScrapeControls`.
    pub fn build_controls(&self) -> ScrapeControls {
        ScrapeControls {
            base_url: self.base_url.clone(),
            output_dir: self.output_dir.clone(),
            output_prefix: self.output_prefix.clone(),
            min_content_bytes: self.min_content_bytes,
            improvement_ratio: self.improvement_ratio,
            request_delay: Duration::from_millis(self.request_delay_ms),
            warmup_delay: Duration::from_millis(self.warmup_delay_ms),
            max_expansions: self.max_expansions,
            render_wait: Duration::from_secs(self.render_wait_secs),
            force_render: self.ci || is_ci_env(),
            ..ScrapeControls::default()
        }
    }
}

/// True when the process appears to run inside a continuous-integration environment.
pub fn is_ci_env() -> bool {
    std::env::var("CI").map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_reflect_reference_thresholds() {
        let controls = ScrapeControls::default();
        assert_eq!(controls.min_content_bytes(), 50_000);
        assert!((controls.improvement_ratio() - 1.5).abs() < f64::EPSILON);
        assert_eq!(controls.rate_limit_attempts(), 3);
        assert_eq!(controls.rate_limit_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn cli_defaults_convert_into_controls() {
        let cli = Cli::parse_from(["eventcrawl"]);
        let controls = cli.build_controls();
        assert_eq!(controls.base_url(), "https://shotgun.live/en/cities/paris");
        assert_eq!(controls.request_delay(), Duration::from_secs(8));
        assert_eq!(controls.warmup_delay(), Duration::from_secs(1));
    }

    #[test]
    fn output_path_carries_prefix_and_run_date() {
        let controls = ScrapeControls::default();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
        let path = controls.output_path(date);
        assert_eq!(
            path,
            PathBuf::from("output").join("paris_events_2024-06-01.xlsx")
        );
    }

    #[test]
    fn truthy_values_cover_common_ci_spellings() {
        for value in ["1", "true", "TRUE", "yes", " Yes "] {
            assert!(is_truthy(value), "expected {value:?} to be truthy");
        }
        for value in ["", "0", "false", "no", "off"] {
            assert!(!is_truthy(value), "expected {value:?} to be falsy");
        }
    }
}
