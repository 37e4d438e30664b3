//! Diagnostic harness
//!
//! Probes, the aggregator that runs them, and the renderers for their results

mod aggregator;
mod card;
mod page;
mod probe;
mod registry;
mod report;
mod result;

pub use aggregator::{DiagError, Diagnostics, ProvisionStep};
pub use card::{ResultCard, INITIAL_CONTENT_LIMIT};
pub use page::{error_chain, PageRenderer};
pub use probe::Probe;
pub use registry::*;
pub use report::{format_report, DiagnosticsReport, ReportOptions};
pub use result::{
    DiagnosticResult, ErrorReport, ResultSummary, UNKNOWN_ERROR_MESSAGE, UNKNOWN_ERROR_STRING,
};
