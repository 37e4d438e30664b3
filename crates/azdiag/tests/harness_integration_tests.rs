//! Integration tests for the diagnostic harness
//!
//! - Results come back in declaration order whatever the completion order
//! - Failures and panics stay inside their own result
//! - Provisioning gates every server probe
//! - Slow probes are cut off by the probe timeout

use anyhow::anyhow;
use async_trait::async_trait;
use azdiag::diagnostics::{
    DiagError, DiagnosticResult, Diagnostics, PageRenderer, Probe, ProvisionStep,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sleeping_probe(name: String, delay: Duration) -> Probe {
    let text = format!("{} done", name);
    Probe::new(
        name,
        move || async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(())
        },
        move |_: ()| text.clone(),
    )
}

struct FailingStep;

#[async_trait]
impl ProvisionStep for FailingStep {
    fn resource(&self) -> String {
        "table chats".to_string()
    }

    async fn ensure(&self) -> anyhow::Result<()> {
        Err(anyhow!("403 AuthenticationFailed"))
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_results_follow_declaration_order() {
    let count = 6u64;
    let mut diagnostics = Diagnostics::new();
    for i in 0..count {
        // the first declared probe finishes last
        let delay = Duration::from_millis((count - i) * 10);
        diagnostics = diagnostics.with_server_probe(sleeping_probe(format!("probe {}", i), delay));
    }

    let results = diagnostics.run_server().await.unwrap();
    let names: Vec<&str> = results.iter().map(DiagnosticResult::name).collect();
    let expected: Vec<String> = (0..count).map(|i| format!("probe {}", i)).collect();
    assert_eq!(names, expected);
    assert!(results.iter().all(DiagnosticResult::is_success));
}

#[tokio::test]
async fn test_probes_run_concurrently() {
    let diagnostics = (0..5).fold(Diagnostics::new(), |d, i| {
        d.with_server_probe(sleeping_probe(format!("p{}", i), Duration::from_millis(100)))
    });

    let started = std::time::Instant::now();
    diagnostics.run_server().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn test_failures_and_panics_are_contained() {
    let diagnostics = Diagnostics::new()
        .with_server_probe(Probe::new(
            "fails",
            || async { Err::<(), _>(anyhow!("boom")) },
            |_: ()| String::new(),
        ))
        .with_server_probe(Probe::new(
            "panics",
            || async { Ok::<_, anyhow::Error>(1) },
            |_: i32| -> String { panic!("bad projection") },
        ))
        .with_server_probe(Probe::new(
            "works",
            || async { Ok::<_, anyhow::Error>(2) },
            |n: i32| format!("got {}", n),
        ));

    let results = diagnostics.run_server().await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0],
        DiagnosticResult::Failure {
            name: "fails".to_string(),
            error_message: "boom".to_string(),
            error_string: "boom".to_string(),
        }
    );
    assert_eq!(
        results[1],
        DiagnosticResult::Failure {
            name: "panics".to_string(),
            error_message: "bad projection".to_string(),
            error_string: "bad projection".to_string(),
        }
    );
    assert_eq!(results[2], DiagnosticResult::success("works", "got 2"));
}

#[tokio::test]
async fn test_zero_probes_render_heading_only() {
    let results = Diagnostics::new().run_server().await.unwrap();
    assert!(results.is_empty());

    let page = PageRenderer::new().unwrap().render_page(&results, None).unwrap();
    assert!(page.contains("<h1>Diagnostics</h1>"));
    assert!(!page.contains("class=\"card "));
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provisioning_failure_runs_nothing() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let diagnostics = Diagnostics::new()
        .with_provisioning(FailingStep)
        .with_server_probe(Probe::new(
            "never",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            },
            |_: ()| String::new(),
        ));

    let err = diagnostics.run_server().await.unwrap_err();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    match &err {
        DiagError::Provisioning { resource, source } => {
            assert_eq!(resource, "table chats");
            assert_eq!(source.to_string(), "403 AuthenticationFailed");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(diagnostics.run_all().await.is_err());

    let page = PageRenderer::new()
        .unwrap()
        .render_error_page(&err, Some("build-7"))
        .unwrap();
    assert!(page.contains("failed to provision table chats: 403 AuthenticationFailed"));
    assert!(page.contains("build-7"));
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_slow_probe_times_out_without_affecting_siblings() {
    let diagnostics = Diagnostics::new()
        .with_probe_timeout(Some(Duration::from_millis(50)))
        .with_server_probe(sleeping_probe("slow".to_string(), Duration::from_secs(5)))
        .with_server_probe(sleeping_probe("fast".to_string(), Duration::from_millis(1)));

    let results = diagnostics.run_server().await.unwrap();
    match &results[0] {
        DiagnosticResult::Failure { error_message, .. } => {
            assert_eq!(error_message, "Operation timed out after 50ms");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(results[1], DiagnosticResult::success("fast", "fast done"));
}
