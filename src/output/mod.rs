//! Output formatting module
//!
//! Renders the event stream, run summaries and suite listings.

mod formatter;

pub use formatter::{write_summary_to_file, EventFormatter, OutputFormat};
