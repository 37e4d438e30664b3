//! HTML rendering of diagnostic results
//!
//! The page carries the server results and loads the client cards from
//! `/diag/client` once it is shown, so slow client probes never hold it up.

use minijinja::{context, Environment};

use super::aggregator::DiagError;
use super::card::{CardView, ResultCard};
use super::result::DiagnosticResult;

const PAGE_TEMPLATE: &str = "page.html";
const CARDS_TEMPLATE: &str = "cards.html";
const ERROR_TEMPLATE: &str = "error.html";

/// Renders pages and card fragments from the bundled templates
#[derive(Debug)]
pub struct PageRenderer {
    env: Environment<'static>,
}

impl PageRenderer {
    pub fn new() -> Result<Self, DiagError> {
        let mut env = Environment::new();
        env.add_template(PAGE_TEMPLATE, include_str!("templates/page.html"))?;
        env.add_template(CARDS_TEMPLATE, include_str!("templates/cards.html"))?;
        env.add_template(ERROR_TEMPLATE, include_str!("templates/error.html"))?;
        Ok(Self { env })
    }

    /// Full page with a heading, the optional build id and one card per result
    pub fn render_page(
        &self,
        results: &[DiagnosticResult],
        build_id: Option<&str>,
    ) -> Result<String, DiagError> {
        let template = self.env.get_template(PAGE_TEMPLATE)?;
        Ok(template.render(context! {
            build_id => build_id,
            cards => card_views(results),
        })?)
    }

    /// Card fragments only, appended to an already rendered page
    pub fn render_cards(&self, results: &[DiagnosticResult]) -> Result<String, DiagError> {
        let template = self.env.get_template(CARDS_TEMPLATE)?;
        Ok(template.render(context! { cards => card_views(results) })?)
    }

    /// Page shown when the run itself failed, with the whole error chain
    pub fn render_error_page(
        &self,
        error: &(dyn std::error::Error + 'static),
        build_id: Option<&str>,
    ) -> Result<String, DiagError> {
        let template = self.env.get_template(ERROR_TEMPLATE)?;
        Ok(template.render(context! {
            build_id => build_id,
            error => error_chain(error),
        })?)
    }
}

fn card_views(results: &[DiagnosticResult]) -> Vec<CardView> {
    results.iter().map(|r| ResultCard::new(r).view()).collect()
}

/// An error and its sources, joined with `: `
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PageRenderer {
        PageRenderer::new().unwrap()
    }

    #[test]
    fn test_empty_page_has_only_heading() {
        let html = renderer().render_page(&[], None).unwrap();
        assert!(html.contains("<h1>Diagnostics</h1>"));
        assert!(!html.contains("Build Id"));
        assert!(!html.contains("class=\"card "));
    }

    #[test]
    fn test_page_shows_build_id_and_cards() {
        let results = vec![
            DiagnosticResult::success("Azure Storage Table", "Found 3 records..."),
            DiagnosticResult::from_error("Job Queue", &anyhow::anyhow!("denied")),
        ];
        let html = renderer().render_page(&results, Some("20240101.1")).unwrap();
        assert!(html.contains("Build Id: 20240101.1"));
        assert!(html.contains("Azure Storage Table"));
        assert!(html.contains("Found 3 records..."));
        assert!(html.contains("class=\"card failure\""));
        assert!(html.contains("/diag/client"));
    }

    #[test]
    fn test_cards_escape_content() {
        let results = vec![DiagnosticResult::success("x", "<script>alert(1)</script>")];
        let html = renderer().render_cards(&results).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_long_content_gets_show_more() {
        let long = "c".repeat(60);
        let results = vec![DiagnosticResult::success("x", long.clone())];
        let html = renderer().render_cards(&results).unwrap();
        assert!(html.contains("Show more"));
        assert!(html.contains(&format!("{}...", "c".repeat(50))));
        assert!(html.contains(&long));

        let short = renderer()
            .render_cards(&[DiagnosticResult::success("x", "short")])
            .unwrap();
        assert!(!short.contains("Show more"));
    }

    #[test]
    fn test_empty_cards_fragment() {
        assert_eq!(renderer().render_cards(&[]).unwrap().trim(), "");
    }

    #[test]
    fn test_error_page_includes_chain() {
        let error = DiagError::Provisioning {
            resource: "table chats".to_string(),
            source: anyhow::anyhow!("403 AuthenticationFailed"),
        };
        let html = renderer().render_error_page(&error, None).unwrap();
        assert!(html.contains("failed to provision table chats: 403 AuthenticationFailed"));
    }
}
