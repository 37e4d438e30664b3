//! One-shot terminal run

use anyhow::Result;
use azdiag::diagnostics::{format_report, Diagnostics, DiagnosticsReport, ReportOptions};
use azdiag::telemetry::{Properties, TelemetryClient};
use std::time::Instant;
use tracing::warn;

/// Run server then client probes and print the report.
///
/// A provisioning failure is returned as an error so the process exits
/// non-zero.
pub async fn run(
    diagnostics: &Diagnostics,
    build_id: Option<String>,
    telemetry: &TelemetryClient,
    options: &ReportOptions,
) -> Result<()> {
    let started = Instant::now();
    let results = match diagnostics.run_all().await {
        Ok(results) => results,
        Err(err) => {
            telemetry.track_exception(&err, Properties::new());
            flush(telemetry).await;
            return Err(err.into());
        }
    };
    telemetry.track_duration_metric("diagnostics.duration", started, Properties::new());

    let report = DiagnosticsReport::new(results, build_id);
    println!("{}", format_report(&report, options));
    flush(telemetry).await;
    Ok(())
}

async fn flush(telemetry: &TelemetryClient) {
    if let Err(e) = telemetry.flush().await {
        warn!(error = %e, "telemetry flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azdiag::diagnostics::{Probe, ProvisionStep};

    struct Missing;

    #[async_trait::async_trait]
    impl ProvisionStep for Missing {
        fn resource(&self) -> String {
            "queue queue".to_string()
        }

        async fn ensure(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("STORAGE_ACCOUNT_NAME is not configured"))
        }
    }

    #[tokio::test]
    async fn test_run_succeeds_with_failing_probes() {
        let diagnostics = Diagnostics::new().with_server_probe(Probe::new(
            "Job Queue",
            || async { Err::<(), _>(anyhow::anyhow!("down")) },
            |_: ()| String::new(),
        ));
        let options = ReportOptions::default();
        assert!(run(&diagnostics, None, &TelemetryClient::disabled(), &options)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_run_fails_when_provisioning_fails() {
        let diagnostics = Diagnostics::new().with_provisioning(Missing);
        let err = run(
            &diagnostics,
            None,
            &TelemetryClient::disabled(),
            &ReportOptions::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "failed to provision queue queue: STORAGE_ACCOUNT_NAME is not configured"
        );
    }
}
