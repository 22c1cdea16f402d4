//! State module for crawl progress
//!
//! # Components
//!
//! - `PageState`: Lifecycle of a URL inside one run's frontier
//! - `RunSummary`: Finalized outcome of a run, kept in the scheduler history

mod page_state;
mod run_summary;

pub use page_state::PageState;
pub use run_summary::{RunSummary, TerminationReason};
