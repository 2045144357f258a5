use std::sync::Arc;

use budgex_core::coherence::Severity;
use budgex_core::config::{AppConfig, LoadOptions};
use budgex_db::repositories::{
    SqlActivityRepository, SqlBudgetLineRepository, SqlStageRecordRepository,
};
use budgex_db::connect_with_settings;
use budgex_engine::CoherenceChecker;

use crate::commands::CommandResult;

pub fn run(year: i32, quick: bool, json: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "check",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "check",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let checker = CoherenceChecker::new(
            Arc::new(SqlActivityRepository::new(pool.clone())),
            Arc::new(SqlBudgetLineRepository::new(pool.clone())),
            Arc::new(SqlStageRecordRepository::new(pool.clone())),
        );
        let report = if quick { checker.quick(year).await } else { checker.run(year).await }
            .map_err(|error| ("coherence_sweep", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(report)
    });

    let report = match result {
        Ok(report) => report,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("check", error_class, message, exit_code);
        }
    };

    let exit_code = u8::from(report.errors > 0);
    let output = if json {
        serde_json::to_string_pretty(&report)
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn render_human(report: &budgex_core::coherence::CoherenceReport) -> String {
    let mut lines = vec![format!(
        "coherence {}: {} error(s), {} warning(s), {} info(s)",
        report.fiscal_year, report.errors, report.warnings, report.infos
    )];
    for anomaly in &report.anomalies {
        let marker = match anomaly.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "warn",
            Severity::Info => "info",
        };
        lines.push(format!(
            "  [{marker}] {} {} {}: {}",
            anomaly.code.as_str(),
            anomaly.entity_kind,
            anomaly.entity_id,
            anomaly.message
        ));
    }
    if report.is_clean() {
        lines.push("  no anomalies".to_string());
    }
    lines.join("\n")
}
