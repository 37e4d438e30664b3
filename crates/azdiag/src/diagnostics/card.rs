//! Result cards
//!
//! View-model for one rendered result. Long content starts truncated and can
//! be expanded once; there is no way back.

use serde::Serialize;

use super::result::DiagnosticResult;

/// Characters shown before a card's content is truncated
pub const INITIAL_CONTENT_LIMIT: usize = 50;

const SUCCESS_HEADLINE: &str = "SUCCESS";
const FAILURE_HEADLINE: &str = "FAILURE";
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCard {
    name: String,
    success: bool,
    headline: String,
    content: String,
    expanded: bool,
}

impl ResultCard {
    pub fn new(result: &DiagnosticResult) -> Self {
        let (success, headline, content) = match result {
            DiagnosticResult::Success { result, .. } => {
                (true, SUCCESS_HEADLINE.to_string(), result.clone())
            }
            DiagnosticResult::Failure {
                error_message,
                error_string,
                ..
            } => (
                false,
                failure_headline(error_message, error_string),
                error_string.clone(),
            ),
        };
        Self {
            name: result.name().to_string(),
            success,
            headline,
            content,
            expanded: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn headline(&self) -> &str {
        &self.headline
    }

    /// The untruncated content
    pub fn full_content(&self) -> &str {
        &self.content
    }

    /// The content as currently shown
    pub fn displayed(&self) -> String {
        if self.expanded {
            self.content.clone()
        } else {
            truncate(&self.content, INITIAL_CONTENT_LIMIT)
        }
    }

    /// Whether the "Show more" control is visible
    pub fn show_more(&self) -> bool {
        !self.expanded && self.content.chars().count() > INITIAL_CONTENT_LIMIT
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn expand(&mut self) {
        self.expanded = true;
    }

    pub(crate) fn view(&self) -> CardView {
        CardView {
            name: self.name.clone(),
            status: if self.success { "success" } else { "failure" },
            headline: self.headline.clone(),
            preview: self.displayed(),
            full: self.content.clone(),
            show_more: self.show_more(),
        }
    }
}

/// Template context for one card
#[derive(Debug, Serialize)]
pub(crate) struct CardView {
    name: String,
    status: &'static str,
    headline: String,
    preview: String,
    full: String,
    show_more: bool,
}

/// `FAILURE` when the full error text already contains the message, the
/// message itself otherwise
fn failure_headline(message: &str, string: &str) -> String {
    if string.contains(message) {
        FAILURE_HEADLINE.to_string()
    } else {
        message.to_string()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut out: String = text.chars().take(limit).collect();
        out.push_str(ELLIPSIS);
        out
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::result::ErrorReport;
    use test_case::test_case;

    fn failure(message: &str, string: &str) -> DiagnosticResult {
        DiagnosticResult::failure(
            "Cognitive Search",
            ErrorReport {
                message: message.to_string(),
                string: string.to_string(),
            },
        )
    }

    #[test]
    fn test_success_card() {
        let card = ResultCard::new(&DiagnosticResult::success("Job Queue", "Found 0 in queue"));
        assert!(card.is_success());
        assert_eq!(card.headline(), "SUCCESS");
        assert_eq!(card.displayed(), "Found 0 in queue");
        assert!(!card.show_more());
    }

    #[test_case("timeout", "Error: timeout after 30s", "FAILURE" ; "message inside string")]
    #[test_case("denied", "Error: 403", "denied" ; "message not in string")]
    #[test_case("", "anything", "FAILURE" ; "empty message always matches")]
    fn test_failure_headline(message: &str, string: &str, expected: &str) {
        let card = ResultCard::new(&failure(message, string));
        assert!(!card.is_success());
        assert_eq!(card.headline(), expected);
        assert_eq!(card.full_content(), string);
    }

    #[test]
    fn test_exactly_limit_is_not_truncated() {
        let text = "a".repeat(INITIAL_CONTENT_LIMIT);
        let card = ResultCard::new(&DiagnosticResult::success("x", text.clone()));
        assert_eq!(card.displayed(), text);
        assert!(!card.show_more());
    }

    #[test]
    fn test_long_content_truncates_then_expands() {
        let text = "b".repeat(INITIAL_CONTENT_LIMIT + 1);
        let mut card = ResultCard::new(&DiagnosticResult::success("x", text.clone()));
        assert_eq!(card.displayed(), format!("{}...", "b".repeat(INITIAL_CONTENT_LIMIT)));
        assert!(card.show_more());

        card.expand();
        assert!(card.is_expanded());
        assert_eq!(card.displayed(), text);
        assert!(!card.show_more());

        card.expand();
        assert_eq!(card.displayed(), text);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let text = "é".repeat(INITIAL_CONTENT_LIMIT);
        let card = ResultCard::new(&DiagnosticResult::success("x", text.clone()));
        assert_eq!(card.displayed(), text);
        assert!(!card.show_more());
    }

    #[test]
    fn test_empty_content() {
        let card = ResultCard::new(&DiagnosticResult::success("x", ""));
        assert_eq!(card.displayed(), "");
        assert!(!card.show_more());
    }
}
