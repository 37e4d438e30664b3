//! Diagnostic results
//!
//! The normalized outcome of a single probe, plus the error normalization
//! shared by every probe.

use serde::{Deserialize, Serialize};
use std::any::Any;

/// Message used when a failure carries neither a message nor a string form
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// String form used when a failure cannot be stringified
pub const UNKNOWN_ERROR_STRING: &str = "Unknown";

/// Outcome of one probe
///
/// Serializes as `{"name": .., "status": "success", "result": ..}` or
/// `{"name": .., "status": "failure", "errorMessage": .., "errorString": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DiagnosticResult {
    /// The probe completed and produced a summary
    Success {
        /// Probe name
        name: String,
        /// Human readable summary built from the probe's data
        result: String,
    },
    /// The probe failed
    #[serde(rename_all = "camelCase")]
    Failure {
        /// Probe name
        name: String,
        /// Short summary of the error
        error_message: String,
        /// Full stringified error, including its causes
        error_string: String,
    },
}

impl DiagnosticResult {
    /// Create a successful result
    pub fn success(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self::Success {
            name: name.into(),
            result: result.into(),
        }
    }

    /// Create a failed result from a normalized error
    pub fn failure(name: impl Into<String>, report: ErrorReport) -> Self {
        Self::Failure {
            name: name.into(),
            error_message: report.message,
            error_string: report.string,
        }
    }

    /// Create a failed result straight from an error
    pub fn from_error(name: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::failure(name, ErrorReport::from_error(error))
    }

    /// Name of the probe that produced this result
    pub fn name(&self) -> &str {
        match self {
            Self::Success { name, .. } | Self::Failure { name, .. } => name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The text shown in the body of a card: the result on success, the
    /// full error string on failure
    pub fn content(&self) -> &str {
        match self {
            Self::Success { result, .. } => result,
            Self::Failure { error_string, .. } => error_string,
        }
    }
}

/// An error reduced to the two display fields of a failure
///
/// Extraction order:
/// - `message`: the error's own message, else its full string form, else
///   [`UNKNOWN_ERROR_MESSAGE`]
/// - `string`: the full string form (message and cause chain), else
///   [`UNKNOWN_ERROR_STRING`]
///
/// Empty strings count as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub string: String,
}

impl ErrorReport {
    pub fn new(message: Option<String>, string: Option<String>) -> Self {
        let string = string.filter(|s| !s.is_empty());
        let message = message
            .filter(|m| !m.is_empty())
            .or_else(|| string.clone())
            .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());
        let string = string.unwrap_or_else(|| UNKNOWN_ERROR_STRING.to_string());
        Self { message, string }
    }

    /// Normalize an error; the string form is the alternate `{:#}` rendering,
    /// which appends every cause as `: cause`
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self::new(Some(error.to_string()), Some(format!("{:#}", error)))
    }

    /// Normalize a panic payload. Only `&str` and `String` payloads carry text.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        Self::new(text.clone(), text)
    }
}

/// Success and failure counts for a list of results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ResultSummary {
    pub fn from_results(results: &[DiagnosticResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::fmt;

    #[derive(Debug)]
    struct Silent;

    impl fmt::Display for Silent {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Ok(())
        }
    }

    impl std::error::Error for Silent {}

    #[test]
    fn test_report_uses_message() {
        let error = anyhow::anyhow!("boom");
        let report = ErrorReport::from_error(&error);
        assert_eq!(report.message, "boom");
        assert_eq!(report.string, "boom");
    }

    #[test]
    fn test_report_string_includes_causes() {
        let error = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("request to table service failed")
            .unwrap_err();
        let report = ErrorReport::from_error(&error);
        assert_eq!(report.message, "request to table service failed");
        assert_eq!(
            report.string,
            "request to table service failed: connection refused"
        );
    }

    #[test]
    fn test_report_empty_error_defaults() {
        let error = anyhow::Error::new(Silent);
        let report = ErrorReport::from_error(&error);
        assert_eq!(report.message, UNKNOWN_ERROR_MESSAGE);
        assert_eq!(report.string, UNKNOWN_ERROR_STRING);
    }

    #[test]
    fn test_report_falls_back_to_string_form() {
        let report = ErrorReport::new(None, Some("Error: 403".to_string()));
        assert_eq!(report.message, "Error: 403");
        assert_eq!(report.string, "Error: 403");
    }

    #[test]
    fn test_report_from_panic_payloads() {
        let report = ErrorReport::from_panic(&"index out of bounds");
        assert_eq!(report.message, "index out of bounds");

        let report = ErrorReport::from_panic(&String::from("bad state"));
        assert_eq!(report.string, "bad state");

        let report = ErrorReport::from_panic(&42u32);
        assert_eq!(report.message, UNKNOWN_ERROR_MESSAGE);
        assert_eq!(report.string, UNKNOWN_ERROR_STRING);
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let ok = DiagnosticResult::success("Dummy", "Dummy complete");
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"status": "success", "name": "Dummy", "result": "Dummy complete"})
        );

        let failed = DiagnosticResult::failure(
            "Job Queue",
            ErrorReport::new(Some("denied".into()), Some("Error: denied".into())),
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({
                "status": "failure",
                "name": "Job Queue",
                "errorMessage": "denied",
                "errorString": "Error: denied"
            })
        );
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            DiagnosticResult::success("a", "ok"),
            DiagnosticResult::from_error("b", &anyhow::anyhow!("nope")),
            DiagnosticResult::success("c", "ok"),
        ];
        let summary = ResultSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(ResultSummary::from_results(&[]), ResultSummary::default());
    }
}
