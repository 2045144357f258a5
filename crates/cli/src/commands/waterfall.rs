use budgex_core::config::{AppConfig, LoadOptions};
use budgex_core::domain::budget_line::WaterfallRow;
use budgex_db::connect_with_settings;
use budgex_db::repositories::{
    BudgetLineRepository, RollupDimension, SqlBudgetLineRepository,
};

use crate::commands::CommandResult;
use crate::RollupBy;

pub fn run(year: i32, by: Option<RollupBy>, json: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "waterfall",
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
                "waterfall",
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

        let lines = SqlBudgetLineRepository::new(pool.clone());
        let rows = match by {
            None => lines.waterfall_by_line(year).await,
            Some(dimension) => lines.waterfall_rollup(year, dimension.into()).await,
        }
        .map_err(|error| ("waterfall_query", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(rows)
    });

    let rows = match result {
        Ok(rows) => rows,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("waterfall", error_class, message, exit_code);
        }
    };

    let output = if json {
        serde_json::to_string_pretty(&rows)
            .unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
    } else {
        render_table(year, &rows)
    };
    CommandResult { exit_code: 0, output }
}

impl From<RollupBy> for RollupDimension {
    fn from(by: RollupBy) -> Self {
        match by {
            RollupBy::Direction => RollupDimension::Direction,
            RollupBy::Mission => RollupDimension::Mission,
            RollupBy::Objectif => RollupDimension::Objectif,
            RollupBy::Nomenclature => RollupDimension::Nomenclature,
        }
    }
}

fn render_table(year: i32, rows: &[WaterfallRow]) -> String {
    let mut lines = vec![
        format!("execution waterfall {year}"),
        format!(
            "{:<24} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
            "key", "dotation", "engage", "liquide", "ordonnance", "paye", "disponible"
        ),
    ];
    for row in rows {
        lines.push(format!(
            "{:<24} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
            row.key,
            row.dotation,
            row.engage,
            row.liquide,
            row.ordonnance,
            row.paye,
            row.disponible()
        ));
    }
    if rows.is_empty() {
        lines.push("  (no budget lines for this fiscal year)".to_string());
    }
    lines.join("\n")
}
