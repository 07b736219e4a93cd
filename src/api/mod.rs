use axum::{
    Router,
    extract::{
        Json, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tracing::{debug, info};

mod cache;
mod error;

pub use cache::{DEFAULT_CACHE_CAPACITY, ProjectionCache, input_key};
pub use error::InputError;

use crate::core::{
    DEFAULT_RA_DEDUCTION_CEILING, DEFAULT_TFSA_LIFETIME_LIMIT, DEFAULT_TFSA_MONTHLY_LIMIT,
    DepletionOrder, IncomeGrowth, Inputs, ProgressiveTable, ProjectionResult, TaxRegime,
    run_projection,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliDepletionOrder {
    TfsaFirst,
    RaFirst,
}

impl From<CliDepletionOrder> for DepletionOrder {
    fn from(value: CliDepletionOrder) -> Self {
        match value {
            CliDepletionOrder::TfsaFirst => DepletionOrder::TfsaFirst,
            CliDepletionOrder::RaFirst => DepletionOrder::RaFirst,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliTaxMode {
    Progressive,
    Flat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliIncomeGrowth {
    Inflation,
    Custom,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiDepletionOrder {
    #[serde(alias = "tfsaFirst", alias = "tfsa_first", alias = "tfsa")]
    TfsaFirst,
    #[serde(alias = "raFirst", alias = "ra_first", alias = "ra")]
    RaFirst,
}

impl From<ApiDepletionOrder> for CliDepletionOrder {
    fn from(value: ApiDepletionOrder) -> Self {
        match value {
            ApiDepletionOrder::TfsaFirst => CliDepletionOrder::TfsaFirst,
            ApiDepletionOrder::RaFirst => CliDepletionOrder::RaFirst,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiTaxMode {
    #[serde(alias = "brackets", alias = "sliding-scale", alias = "slidingScale")]
    Progressive,
    #[serde(alias = "flatRate", alias = "flat_rate", alias = "flat-rate")]
    Flat,
}

impl From<ApiTaxMode> for CliTaxMode {
    fn from(value: ApiTaxMode) -> Self {
        match value {
            ApiTaxMode::Progressive => CliTaxMode::Progressive,
            ApiTaxMode::Flat => CliTaxMode::Flat,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiIncomeGrowth {
    #[serde(alias = "cpi")]
    Inflation,
    Custom,
}

impl From<ApiIncomeGrowth> for CliIncomeGrowth {
    fn from(value: ApiIncomeGrowth) -> Self {
        match value {
            ApiIncomeGrowth::Inflation => CliIncomeGrowth::Inflation,
            ApiIncomeGrowth::Custom => CliIncomeGrowth::Custom,
        }
    }
}

/// A numeric field as a form sends it: a JSON number or free text such as
/// `"R 1 500 000"`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn resolve(&self, fallback: f64) -> f64 {
        match self {
            Amount::Number(v) if v.is_finite() => *v,
            Amount::Number(_) => fallback,
            Amount::Text(text) => parse_amount(text).unwrap_or(fallback),
        }
    }

    fn resolve_age(&self, fallback: u32) -> u32 {
        let age = self.resolve(fallback as f64);
        if age <= 0.0 {
            0
        } else {
            age.round().min(u32::MAX as f64) as u32
        }
    }
}

/// Reads a user-typed amount. Thousands separators, spaces and currency
/// symbols are dropped. Without a `.`, a last comma followed by one or two
/// digits is the decimal separator (`"1 234,56"`). `None` when nothing
/// numeric remains or the separators are ambiguous.
pub fn parse_amount(text: &str) -> Option<f64> {
    let text = text.trim();
    let decimal_comma = !text.contains('.')
        && text.rfind(',').is_some_and(|idx| {
            let tail = text[idx + 1..].trim_end_matches(|c: char| !c.is_ascii_digit());
            (1..=2).contains(&tail.len()) && tail.chars().all(|c| c.is_ascii_digit())
        });

    let cleaned: String = text
        .chars()
        .filter_map(|c| match c {
            '0'..='9' | '.' | '-' => Some(c),
            ',' if decimal_comma => Some('.'),
            _ => None,
        })
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectionPayload {
    current_age: Option<Amount>,
    retirement_age: Option<Amount>,
    life_expectancy: Option<Amount>,

    #[serde(alias = "raStart")]
    ra_balance: Option<Amount>,
    #[serde(alias = "tfsaStart")]
    tfsa_balance: Option<Amount>,
    tfsa_contributed_to_date: Option<Amount>,
    tfsa_monthly_contribution: Option<Amount>,
    tfsa_monthly_limit: Option<Amount>,
    tfsa_lifetime_limit: Option<Amount>,

    #[serde(alias = "targetNetMonthlyIncome")]
    target_monthly_income: Option<Amount>,
    pre_retirement_return: Option<Amount>,
    post_retirement_return: Option<Amount>,
    inflation_rate: Option<Amount>,
    #[serde(alias = "contributionEscalationRate")]
    contribution_escalation: Option<Amount>,

    gross_annual_income: Option<Amount>,
    income_growth: Option<ApiIncomeGrowth>,
    custom_income_growth: Option<Amount>,
    ra_deduction_percent: Option<Amount>,
    ra_deduction_ceiling: Option<Amount>,

    depletion_order: Option<ApiDepletionOrder>,
    tax_mode: Option<ApiTaxMode>,
    flat_tax_rate: Option<Amount>,
    reinvest_tax_saving: Option<bool>,
    index_tax_brackets: Option<bool>,
}

#[derive(Parser, Debug)]
#[command(
    name = "fundplan",
    about = "Retirement funding planner (retirement annuity + tax-free savings, progressive tax)"
)]
pub struct App {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Solve for the required monthly contribution and print the projection as JSON
    Project {
        #[command(flatten)]
        cli: Cli,
        #[arg(long, help = "Pretty-print the JSON output")]
        pretty: bool,
    },
    /// Serve projections over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Cli {
    #[arg(long, default_value_t = 30)]
    pub current_age: u32,
    #[arg(long, default_value_t = 65)]
    pub retirement_age: u32,
    #[arg(long, default_value_t = 90, help = "Age the capital has to last until")]
    pub life_expectancy: u32,
    #[arg(long, default_value_t = 0.0, help = "Current retirement annuity balance")]
    pub ra_balance: f64,
    #[arg(long, default_value_t = 0.0, help = "Current tax-free savings balance")]
    pub tfsa_balance: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Tax-free savings contributions already counted against the lifetime cap"
    )]
    pub tfsa_contributed_to_date: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_TFSA_MONTHLY_LIMIT,
        help = "Part of each monthly contribution earmarked for the tax-free account"
    )]
    pub tfsa_monthly_contribution: f64,
    #[arg(long, default_value_t = DEFAULT_TFSA_MONTHLY_LIMIT)]
    pub tfsa_monthly_limit: f64,
    #[arg(long, default_value_t = DEFAULT_TFSA_LIFETIME_LIMIT)]
    pub tfsa_lifetime_limit: f64,
    #[arg(long, help = "Desired net monthly income in retirement, in today's money")]
    pub target_monthly_income: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Annual return before retirement in percent, may be negative"
    )]
    pub pre_retirement_return: f64,
    #[arg(long, default_value_t = 8.0, help = "Annual return in retirement in percent")]
    pub post_retirement_return: f64,
    #[arg(long, default_value_t = 5.0, help = "Expected annual inflation in percent")]
    pub inflation_rate: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Yearly increase of the monthly contribution in percent"
    )]
    pub contribution_escalation: f64,
    #[arg(long, default_value_t = 0.0, help = "Gross annual taxable income today")]
    pub gross_annual_income: f64,
    #[arg(long, value_enum, default_value_t = CliIncomeGrowth::Inflation)]
    pub income_growth: CliIncomeGrowth,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Income growth in percent, used when --income-growth=custom"
    )]
    pub custom_income_growth: f64,
    #[arg(
        long,
        default_value_t = 27.5,
        help = "Deductible retirement annuity contributions as percent of income"
    )]
    pub ra_deduction_percent: f64,
    #[arg(long, default_value_t = DEFAULT_RA_DEDUCTION_CEILING)]
    pub ra_deduction_ceiling: f64,
    #[arg(long, value_enum, default_value_t = CliDepletionOrder::TfsaFirst)]
    pub depletion_order: CliDepletionOrder,
    #[arg(long, value_enum, default_value_t = CliTaxMode::Progressive)]
    pub tax_mode: CliTaxMode,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Flat tax rate in percent, used when --tax-mode=flat"
    )]
    pub flat_tax_rate: f64,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub reinvest_tax_saving: bool,
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Grow tax brackets with inflation"
    )]
    pub index_tax_brackets: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Clone, Default)]
struct AppState {
    cache: Arc<Mutex<ProjectionCache>>,
}

pub fn build_inputs(cli: Cli) -> Result<Inputs, InputError> {
    if cli.retirement_age <= cli.current_age {
        return Err(InputError::AgeOrder {
            earlier: "--current-age",
            later: "--retirement-age",
        });
    }

    if cli.life_expectancy <= cli.retirement_age {
        return Err(InputError::AgeOrder {
            earlier: "--retirement-age",
            later: "--life-expectancy",
        });
    }

    for (flag, value) in [
        ("--ra-balance", cli.ra_balance),
        ("--tfsa-balance", cli.tfsa_balance),
        ("--tfsa-contributed-to-date", cli.tfsa_contributed_to_date),
        ("--tfsa-monthly-contribution", cli.tfsa_monthly_contribution),
        ("--tfsa-monthly-limit", cli.tfsa_monthly_limit),
        ("--tfsa-lifetime-limit", cli.tfsa_lifetime_limit),
        ("--target-monthly-income", cli.target_monthly_income),
        ("--inflation-rate", cli.inflation_rate),
        ("--contribution-escalation", cli.contribution_escalation),
        ("--gross-annual-income", cli.gross_annual_income),
        ("--custom-income-growth", cli.custom_income_growth),
        ("--ra-deduction-ceiling", cli.ra_deduction_ceiling),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(InputError::OutOfRange {
                flag,
                requirement: ">= 0",
            });
        }
    }

    for (flag, value) in [
        ("--pre-retirement-return", cli.pre_retirement_return),
        ("--post-retirement-return", cli.post_retirement_return),
    ] {
        if !value.is_finite() || value <= -100.0 {
            return Err(InputError::OutOfRange {
                flag,
                requirement: "> -100",
            });
        }
    }

    if !(0.0..=100.0).contains(&cli.ra_deduction_percent) {
        return Err(InputError::OutOfRange {
            flag: "--ra-deduction-percent",
            requirement: "between 0 and 100",
        });
    }

    if !(0.0..100.0).contains(&cli.flat_tax_rate) {
        return Err(InputError::OutOfRange {
            flag: "--flat-tax-rate",
            requirement: "at least 0 and below 100",
        });
    }

    let tax_regime = match cli.tax_mode {
        CliTaxMode::Progressive => TaxRegime::Progressive(ProgressiveTable::default()),
        CliTaxMode::Flat => TaxRegime::Flat {
            rate: cli.flat_tax_rate / 100.0,
        },
    };
    let income_growth = match cli.income_growth {
        CliIncomeGrowth::Inflation => IncomeGrowth::Inflation,
        CliIncomeGrowth::Custom => IncomeGrowth::Custom(cli.custom_income_growth / 100.0),
    };

    Ok(Inputs {
        current_age: cli.current_age,
        retirement_age: cli.retirement_age,
        life_expectancy: cli.life_expectancy,
        ra_start: cli.ra_balance,
        tfsa_start: cli.tfsa_balance,
        tfsa_contributed_to_date: cli.tfsa_contributed_to_date,
        tfsa_monthly_contribution: cli.tfsa_monthly_contribution,
        tfsa_monthly_limit: cli.tfsa_monthly_limit,
        tfsa_lifetime_limit: cli.tfsa_lifetime_limit,
        target_net_monthly_income: cli.target_monthly_income,
        pre_retirement_return: cli.pre_retirement_return / 100.0,
        post_retirement_return: cli.post_retirement_return / 100.0,
        inflation_rate: cli.inflation_rate / 100.0,
        contribution_escalation_rate: cli.contribution_escalation / 100.0,
        gross_annual_income: cli.gross_annual_income,
        income_growth,
        ra_deduction_fraction: cli.ra_deduction_percent / 100.0,
        ra_deduction_ceiling: cli.ra_deduction_ceiling,
        depletion_order: cli.depletion_order.into(),
        tax_regime,
        reinvest_tax_saving: cli.reinvest_tax_saving,
        index_tax_brackets: cli.index_tax_brackets,
    })
}

pub fn render_projection(result: &ProjectionResult, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    }
}

pub fn router() -> Router {
    Router::new()
        .route(
            "/api/projection",
            get(projection_get_handler).post(projection_post_handler),
        )
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(AppState::default())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "fundplan HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/projection");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn projection_get_handler(
    State(state): State<AppState>,
    payload: Result<Query<ProjectionPayload>, QueryRejection>,
) -> Response {
    match payload {
        Ok(Query(payload)) => projection_handler_impl(&state, payload),
        Err(rejection) => input_error_response(InputError::Payload(rejection.body_text())),
    }
}

async fn projection_post_handler(
    State(state): State<AppState>,
    payload: Result<Json<ProjectionPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => projection_handler_impl(&state, payload),
        Err(rejection) => input_error_response(InputError::Payload(rejection.body_text())),
    }
}

fn projection_handler_impl(state: &AppState, payload: ProjectionPayload) -> Response {
    let inputs = match inputs_from_payload(payload) {
        Ok(inputs) => inputs,
        Err(err) => return input_error_response(err),
    };

    let (result, cached) = project_cached(&state.cache, &inputs);
    debug!(
        cached,
        required_monthly_contribution = result.required_monthly_contribution,
        feasible = result.feasible,
        "projection request"
    );
    json_response(StatusCode::OK, result.as_ref())
}

fn project_cached(
    cache: &Mutex<ProjectionCache>,
    inputs: &Inputs,
) -> (Arc<ProjectionResult>, bool) {
    let hit = lock_cache(cache).get(inputs);
    if let Some(result) = hit {
        return (result, true);
    }

    let result = Arc::new(run_projection(inputs));
    lock_cache(cache).insert(inputs, Arc::clone(&result));
    (result, false)
}

fn lock_cache(cache: &Mutex<ProjectionCache>) -> MutexGuard<'_, ProjectionCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn input_error_response(err: InputError) -> Response {
    error_response(err.status(), &err.to_string())
}

#[cfg(test)]
fn inputs_from_json(json: &str) -> Result<Inputs, InputError> {
    let payload = serde_json::from_str::<ProjectionPayload>(json)
        .map_err(|e| InputError::Payload(e.to_string()))?;
    inputs_from_payload(payload)
}

fn inputs_from_payload(payload: ProjectionPayload) -> Result<Inputs, InputError> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.current_age {
        cli.current_age = v.resolve_age(cli.current_age);
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v.resolve_age(cli.retirement_age);
    }
    if let Some(v) = payload.life_expectancy {
        cli.life_expectancy = v.resolve_age(cli.life_expectancy);
    }

    if let Some(v) = payload.ra_balance {
        cli.ra_balance = v.resolve(cli.ra_balance);
    }
    if let Some(v) = payload.tfsa_balance {
        cli.tfsa_balance = v.resolve(cli.tfsa_balance);
    }
    if let Some(v) = payload.tfsa_contributed_to_date {
        cli.tfsa_contributed_to_date = v.resolve(cli.tfsa_contributed_to_date);
    }
    if let Some(v) = payload.tfsa_monthly_contribution {
        cli.tfsa_monthly_contribution = v.resolve(cli.tfsa_monthly_contribution);
    }
    if let Some(v) = payload.tfsa_monthly_limit {
        cli.tfsa_monthly_limit = v.resolve(cli.tfsa_monthly_limit);
    }
    if let Some(v) = payload.tfsa_lifetime_limit {
        cli.tfsa_lifetime_limit = v.resolve(cli.tfsa_lifetime_limit);
    }

    if let Some(v) = payload.target_monthly_income {
        cli.target_monthly_income = v.resolve(cli.target_monthly_income);
    }
    if let Some(v) = payload.pre_retirement_return {
        cli.pre_retirement_return = v.resolve(cli.pre_retirement_return);
    }
    if let Some(v) = payload.post_retirement_return {
        cli.post_retirement_return = v.resolve(cli.post_retirement_return);
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v.resolve(cli.inflation_rate);
    }
    if let Some(v) = payload.contribution_escalation {
        cli.contribution_escalation = v.resolve(cli.contribution_escalation);
    }

    if let Some(v) = payload.gross_annual_income {
        cli.gross_annual_income = v.resolve(cli.gross_annual_income);
    }
    if let Some(v) = payload.income_growth {
        cli.income_growth = v.into();
    }
    if let Some(v) = payload.custom_income_growth {
        cli.custom_income_growth = v.resolve(cli.custom_income_growth);
    }
    if let Some(v) = payload.ra_deduction_percent {
        cli.ra_deduction_percent = v.resolve(cli.ra_deduction_percent);
    }
    if let Some(v) = payload.ra_deduction_ceiling {
        cli.ra_deduction_ceiling = v.resolve(cli.ra_deduction_ceiling);
    }

    if let Some(v) = payload.depletion_order {
        cli.depletion_order = v.into();
    }
    if let Some(v) = payload.tax_mode {
        cli.tax_mode = v.into();
    }
    if let Some(v) = payload.flat_tax_rate {
        cli.flat_tax_rate = v.resolve(cli.flat_tax_rate);
    }
    if let Some(v) = payload.reinvest_tax_saving {
        cli.reinvest_tax_saving = v;
    }
    if let Some(v) = payload.index_tax_brackets {
        cli.index_tax_brackets = v;
    }

    build_inputs(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        current_age: 30,
        retirement_age: 65,
        life_expectancy: 90,
        ra_balance: 0.0,
        tfsa_balance: 0.0,
        tfsa_contributed_to_date: 0.0,
        tfsa_monthly_contribution: DEFAULT_TFSA_MONTHLY_LIMIT,
        tfsa_monthly_limit: DEFAULT_TFSA_MONTHLY_LIMIT,
        tfsa_lifetime_limit: DEFAULT_TFSA_LIFETIME_LIMIT,
        target_monthly_income: 30_000.0,
        pre_retirement_return: 10.0,
        post_retirement_return: 8.0,
        inflation_rate: 5.0,
        contribution_escalation: 5.0,
        gross_annual_income: 500_000.0,
        income_growth: CliIncomeGrowth::Inflation,
        custom_income_growth: 0.0,
        ra_deduction_percent: 27.5,
        ra_deduction_ceiling: DEFAULT_RA_DEDUCTION_CEILING,
        depletion_order: CliDepletionOrder::TfsaFirst,
        tax_mode: CliTaxMode::Progressive,
        flat_tax_rate: 30.0,
        reinvest_tax_saving: true,
        index_tax_brackets: true,
    }
}
