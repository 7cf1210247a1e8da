#![warn(missing_docs)]
//! Core library entry points for the eventcrawl listings exporter.

pub mod artifact;
pub mod controls;
pub mod event;
pub mod extract;
pub mod fetch;
pub mod render;
pub mod runtime;
pub mod window;

pub use artifact::{ArtifactError, ArtifactWriter};
pub use controls::{is_ci_env, Cli, ScrapeControls};
pub use event::{DayBuckets, EventRecord};
pub use extract::EventExtractor;
pub use fetch::{FetchError, FetchResult, NetworkFetcher, RetryPolicy, SourceStrategy};
pub use runtime::{run, DynError, RunError};
pub use window::{listings_url, DateWindow, WINDOW_DAYS};
