use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    FiscalModel, Scenario, SimulationError, SimulationResult, Termination, run_simulation,
};

#[derive(Parser, Debug)]
#[command(
    name = "patrimoine",
    about = "Year-by-year household wealth projection (cash flow, taxes, successions)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate a scenario file and print the yearly statement.
    Run {
        #[arg(long, help = "Path to a JSON scenario")]
        scenario: PathBuf,
        #[arg(long, default_value_t = false, help = "Print the full result as JSON")]
        json: bool,
    },
    /// Start the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn scenario_from_json(json: &str) -> Result<Scenario, String> {
    let scenario = serde_json::from_str::<Scenario>(json)
        .map_err(|e| format!("Invalid scenario JSON: {e}"))?;
    scenario.validate()?;
    Ok(scenario)
}

fn load_scenario(path: &Path) -> Result<Scenario, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    scenario_from_json(&json)
}

pub fn run_command(scenario: &Path, json: bool) -> Result<String, String> {
    let scenario = load_scenario(scenario)?;
    let result = run_simulation(&scenario).map_err(|e| e.to_string())?;
    if json {
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    } else {
        Ok(render_table(&result))
    }
}

fn render_table(result: &SimulationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>14} {:>14} {:>14} {:>16}",
        "year", "revenues", "taxes", "net cash flow", "net worth"
    );
    for (line, sheet) in result.cash_flow.iter().zip(&result.balance_sheet) {
        let _ = writeln!(
            out,
            "{:>6} {:>14.2} {:>14.2} {:>14.2} {:>16.2}",
            line.year,
            line.total_revenue,
            line.taxes.total(),
            line.net_cash_flow,
            sheet.net
        );
    }
    let outcome = match &result.outcome {
        Termination::Completed => "completed".to_string(),
        Termination::CashExhausted { year, missing } => {
            format!("cash exhausted in {year} ({missing:.2} missing)")
        }
        Termination::HouseholdExtinct { year } => format!("household extinct in {year}"),
    };
    let _ = writeln!(out, "\noutcome: {outcome}");
    let _ = writeln!(
        out,
        "net worth: {:.2} -> {:.2} (min {:.2}), succession taxes: {:.2}",
        result.kpis.initial_net_worth,
        result.kpis.final_net_worth,
        result.kpis.min_net_worth,
        result.kpis.total_succession_taxes
    );
    out
}

fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_post_handler))
        .route("/api/fiscal-model/default", get(default_fiscal_model_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "patrimoine HTTP API listening");
    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn default_fiscal_model_handler() -> Response {
    json_response(StatusCode::OK, FiscalModel::default())
}

async fn simulate_post_handler(body: String) -> Response {
    simulate_handler_impl(&body)
}

fn simulate_handler_impl(body: &str) -> Response {
    let scenario = match scenario_from_json(body) {
        Ok(scenario) => scenario,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match run_simulation(&scenario) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(e @ SimulationError::InvalidOwnershipTopology { .. }) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string())
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AssetKind, SpouseOption};
    use serde_json::Value;

    const FAMILY: &str = include_str!("../../demos/family.json");

    const MINIMAL: &str = r#"{
        "firstYear": 2025,
        "lastYear": 2027,
        "household": {
            "members": [
                { "name": "Ann", "birthYear": 1980, "deathYear": 2080, "isAdult": true,
                  "incomes": [{ "kind": "workIncome", "from": 2020, "to": 2030, "net": 30000, "taxable": 27000 }] }
            ],
            "expenses": [{ "name": "living", "amount": 20000 }]
        },
        "patrimony": {
            "assets": [
                { "name": "pea", "ownership": { "mode": "full", "owners": [{ "name": "Ann", "fraction": 1.0 }] },
                  "kind": { "category": "freeInvestment", "investmentType": { "type": "pea" },
                            "interestRate": 0.03, "initialValue": 10000 } }
            ]
        }
    }"#;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn scenario_from_json_parses_camel_case_keys() {
        let scenario = scenario_from_json(FAMILY).expect("valid demo scenario");
        assert_eq!(scenario.first_year, 2025);
        assert_eq!(scenario.household.members.len(), 3);
        assert_eq!(scenario.spouse_option, SpouseOption::FullOwnershipQuarter);
        assert!(matches!(
            scenario.patrimony.asset("scpi").map(|a| &a.kind),
            Some(AssetKind::Scpi(s)) if s.held_by_sci
        ));
        let li = scenario.patrimony.asset("life insurance Ann").expect("contract");
        assert!(li.is_life_insurance());
        assert_eq!(scenario.fiscal, FiscalModel::default());
    }

    #[test]
    fn partial_fiscal_override_keeps_other_defaults() {
        let json = MINIMAL.replacen(
            "\"firstYear\": 2025,",
            "\"firstYear\": 2025, \"fiscal\": { \"socialLeviesRate\": 0.1 },",
            1,
        );
        let scenario = scenario_from_json(&json).expect("valid scenario");
        assert_eq!(scenario.fiscal.social_levies_rate, 0.1);
        assert_eq!(
            scenario.fiscal.income_tax,
            FiscalModel::default().income_tax
        );
    }

    #[test]
    fn scenario_from_json_rejects_unknown_owner() {
        let json = MINIMAL.replace("{ \"name\": \"Ann\", \"fraction\": 1.0 }", "{ \"name\": \"Zoe\", \"fraction\": 1.0 }");
        let err = scenario_from_json(&json).expect_err("unknown owner");
        assert!(err.contains("Zoe"));
    }

    #[test]
    fn scenario_from_json_rejects_bad_shares() {
        let json = MINIMAL.replace("\"fraction\": 1.0", "\"fraction\": 0.6");
        let err = scenario_from_json(&json).expect_err("shares must sum to one");
        assert!(err.contains("sum"));
    }

    #[test]
    fn scenario_from_json_reports_syntax_errors() {
        let err = scenario_from_json("{ not json").expect_err("syntax error");
        assert!(err.starts_with("Invalid scenario JSON"));
    }

    #[test]
    fn demo_scenario_runs_and_records_first_death() {
        let scenario = scenario_from_json(FAMILY).expect("valid demo scenario");
        let result = run_simulation(&scenario).expect("simulation runs");
        assert!(!result.cash_flow.is_empty());
        let decedents: Vec<&str> = result
            .successions
            .iter()
            .map(|s| s.decedent.as_str())
            .collect();
        assert!(decedents.contains(&"Ann"));
        let ann_li = result
            .life_insurance_successions
            .iter()
            .find(|s| s.decedent == "Ann")
            .expect("life insurance succession for Ann");
        assert_eq!(ann_li.inheritances[0].heir, "Bob");
        let table = render_table(&result);
        assert!(table.contains("outcome:"));
    }

    #[test]
    fn simulate_response_uses_camel_case_fields() {
        let scenario = scenario_from_json(MINIMAL).expect("valid scenario");
        let result = run_simulation(&scenario).expect("simulation runs");
        let value = serde_json::to_value(&result).expect("serializable");
        for key in [
            "cashFlow",
            "balanceSheet",
            "successions",
            "lifeInsuranceSuccessions",
            "outcome",
            "kpis",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["outcome"]["reason"], "completed");
        let first = &value["cashFlow"][0];
        assert_eq!(first["year"], 2025);
        assert!(first["revenues"]["credited"]["workIncome"].is_object());
        assert!(first.get("carriedTaxableRevenueToNextYear").is_some());
        assert!(first.get("netCashFlow").is_some());
    }

    #[tokio::test]
    async fn simulate_handler_returns_result_with_no_store() {
        let response = simulate_handler_impl(MINIMAL);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        let body = body_json(response).await;
        assert_eq!(body["cashFlow"].as_array().map(Vec::len), Some(3));
        assert_eq!(body["kpis"]["lastYear"], 2027);
    }

    #[tokio::test]
    async fn simulate_handler_rejects_invalid_scenarios() {
        let json = MINIMAL.replace("\"lastYear\": 2027", "\"lastYear\": 2000");
        let response = simulate_handler_impl(&json);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().is_some_and(|e| e.contains("lastYear")));
    }

    #[tokio::test]
    async fn default_fiscal_model_is_served() {
        let response = default_fiscal_model_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["socialLeviesRate"], 0.172);
        assert!(body["incomeTax"]["brackets"].is_array());
    }
}
