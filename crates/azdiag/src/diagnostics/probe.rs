//! Probes and the probe runner
//!
//! A probe wraps one external call behind a uniform shape: fetch some data,
//! turn it into a summary string. Running a probe always yields a
//! [`DiagnosticResult`]; errors and panics are folded into a failure.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::result::{DiagnosticResult, ErrorReport};
use crate::network::with_timeout;

type RunFn = dyn Fn() -> BoxFuture<'static, DiagnosticResult> + Send + Sync;

/// A named diagnostic check
#[derive(Clone)]
pub struct Probe {
    name: String,
    run: Arc<RunFn>,
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe").field("name", &self.name).finish()
    }
}

impl Probe {
    /// Create a probe from a data source and an infallible projection
    pub fn new<T, E, F, Fut, B>(name: impl Into<String>, get_data: F, build_result: B) -> Self
    where
        T: Send + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        B: Fn(T) -> String + Send + Sync + 'static,
    {
        Self::try_new(name, get_data, move |data| Ok(build_result(data)))
    }

    /// Create a probe whose projection can fail
    pub fn try_new<T, E, F, Fut, B>(name: impl Into<String>, get_data: F, build_result: B) -> Self
    where
        T: Send + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        B: Fn(T) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        let name = name.into();
        debug_assert!(!name.is_empty(), "probe name must not be empty");

        let get_data = Arc::new(get_data);
        let build_result = Arc::new(build_result);
        let probe_name = name.clone();

        let run = move || {
            let name = probe_name.clone();
            let get_data = Arc::clone(&get_data);
            let build_result = Arc::clone(&build_result);
            async move {
                let attempt = async {
                    let data = get_data().await.map_err(Into::into)?;
                    build_result(data)
                };
                match AssertUnwindSafe(attempt).catch_unwind().await {
                    Ok(Ok(summary)) => DiagnosticResult::success(name, summary),
                    Ok(Err(error)) => DiagnosticResult::from_error(name, &error),
                    Err(payload) => {
                        DiagnosticResult::failure(name, ErrorReport::from_panic(payload.as_ref()))
                    }
                }
            }
            .boxed()
        };

        Self {
            name,
            run: Arc::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the probe to completion
    pub async fn run(&self) -> DiagnosticResult {
        self.run_with_timeout(None).await
    }

    /// Run the probe, turning an overrun of `limit` into a failure
    pub async fn run_with_timeout(&self, limit: Option<Duration>) -> DiagnosticResult {
        let started = Instant::now();
        let result = match limit {
            Some(limit) => match with_timeout((self.run)(), limit).await {
                Ok(result) => result,
                Err(timeout) => {
                    DiagnosticResult::from_error(self.name.clone(), &anyhow::Error::new(timeout))
                }
            },
            None => (self.run)().await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            DiagnosticResult::Success { .. } => {
                debug!(probe = %self.name, elapsed_ms, "probe succeeded");
            }
            DiagnosticResult::Failure { error_message, .. } => {
                warn!(probe = %self.name, elapsed_ms, error = %error_message, "probe failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::result::{UNKNOWN_ERROR_MESSAGE, UNKNOWN_ERROR_STRING};
    use std::fmt;

    #[derive(Debug)]
    struct Silent;

    impl fmt::Display for Silent {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Ok(())
        }
    }

    impl std::error::Error for Silent {}

    #[tokio::test]
    async fn test_probe_success_uses_build_result() {
        let probe = Probe::new(
            "Vector",
            || async { Ok::<_, anyhow::Error>(vec![0.1, 0.2, 0.3]) },
            |v: Vec<f64>| format!("Got vector of length {}", v.len()),
        );
        assert_eq!(
            probe.run().await,
            DiagnosticResult::success("Vector", "Got vector of length 3")
        );
    }

    #[tokio::test]
    async fn test_probe_error_becomes_failure() {
        let probe = Probe::new(
            "Boom",
            || async { Err::<(), _>(anyhow::anyhow!("boom")) },
            |_| String::new(),
        );
        match probe.run().await {
            DiagnosticResult::Failure {
                name,
                error_message,
                error_string,
            } => {
                assert_eq!(name, "Boom");
                assert_eq!(error_message, "boom");
                assert_eq!(error_string, "boom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_error_without_text_defaults() {
        let probe = Probe::new("Silent", || async { Err::<(), _>(Silent) }, |_| String::new());
        match probe.run().await {
            DiagnosticResult::Failure {
                error_message,
                error_string,
                ..
            } => {
                assert_eq!(error_message, UNKNOWN_ERROR_MESSAGE);
                assert_eq!(error_string, UNKNOWN_ERROR_STRING);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_build_result_error_becomes_failure() {
        let probe = Probe::try_new(
            "Completion",
            || async { Ok::<_, anyhow::Error>(Vec::<String>::new()) },
            |choices: Vec<String>| {
                choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("no choices returned"))
            },
        );
        let result = probe.run().await;
        assert!(!result.is_success());
        assert_eq!(result.content(), "no choices returned");
    }

    #[tokio::test]
    async fn test_probe_panic_is_contained() {
        let probe = Probe::new(
            "Panics",
            || async { Ok::<_, anyhow::Error>(()) },
            |_| panic!("projection exploded"),
        );
        let result = probe.run().await;
        assert_eq!(result.name(), "Panics");
        assert_eq!(result.content(), "projection exploded");
    }

    #[tokio::test]
    async fn test_probe_timeout_becomes_failure() {
        let probe = Probe::new(
            "Hung",
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, anyhow::Error>(())
            },
            |_| "done".to_string(),
        );
        let result = probe.run_with_timeout(Some(Duration::from_millis(20))).await;
        match result {
            DiagnosticResult::Failure { error_message, .. } => {
                assert_eq!(error_message, "Operation timed out after 20ms");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_can_run_repeatedly() {
        let probe = Probe::new("Dummy", || async { Ok::<_, anyhow::Error>(()) }, |_| {
            "Dummy complete".to_string()
        });
        let cloned = probe.clone();
        assert_eq!(probe.run().await, cloned.run().await);
    }
}
