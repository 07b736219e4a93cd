use super::engine::target_monthly_at_retirement;
use super::solver::{SolverConfig, solve_contribution_with};
use super::tax::BracketIndexing;
use super::types::{
    AccumulationYear, CapitalPoint, DecumulationYear, Inputs, Phase, ProjectionResult,
};

/// Compute the full funding plan. Pure: the same inputs always produce a
/// bit-identical result.
pub fn run_projection(inputs: &Inputs) -> ProjectionResult {
    run_projection_with(inputs, SolverConfig::default())
}

pub fn run_projection_with(inputs: &Inputs, config: SolverConfig) -> ProjectionResult {
    let inputs = inputs.sanitized();
    let solution = solve_contribution_with(&inputs, config);
    let accumulation = solution.trial.accumulation;
    let decumulation = solution.trial.decumulation;

    let deflator = growth(inputs.inflation_rate, inputs.years_to_retirement());
    let capital_at_retirement = accumulation.ra_end + accumulation.tfsa_end;

    let (year1_gross_withdrawal, year1_net_income, year1_tax) = decumulation
        .year_one
        .map(|year| (year.gross, year.net, year.tax))
        .unwrap_or((0.0, 0.0, 0.0));

    let total_contributions: f64 = accumulation
        .ledger
        .iter()
        .map(|year| year.total_contribution)
        .sum();
    let total_contributions_today: f64 = accumulation
        .ledger
        .iter()
        .map(|year| year.total_contribution / growth(inputs.inflation_rate, year.year_index))
        .sum();
    let total_tax_saving_reinvested: f64 = accumulation
        .ledger
        .iter()
        .map(|year| year.tax_saving_reinvested)
        .sum();
    let total_gross_withdrawn: f64 = decumulation
        .ledger
        .iter()
        .map(|year| year.gross_withdrawal)
        .sum();
    let total_net_delivered: f64 = decumulation
        .ledger
        .iter()
        .map(|year| year.net_income_delivered)
        .sum();
    let total_retirement_tax: f64 = decumulation
        .ledger
        .iter()
        .map(|year| year.tax_paid)
        .sum();

    let capital_trajectory = capital_trajectory(&accumulation.ledger, &decumulation.ledger);

    ProjectionResult {
        required_monthly_contribution: solution.monthly_contribution,
        feasible: solution.feasible,
        life_expectancy: inputs.life_expectancy,
        exhaustion_age: decumulation.exhaustion_age,
        shortfall_years: inputs
            .life_expectancy
            .saturating_sub(decumulation.exhaustion_age),
        target_monthly_at_retirement: target_monthly_at_retirement(&inputs),
        ra_at_retirement: accumulation.ra_end,
        tfsa_at_retirement: accumulation.tfsa_end,
        capital_at_retirement,
        capital_at_retirement_today: capital_at_retirement / deflator,
        year1_gross_withdrawal,
        year1_net_income,
        year1_tax,
        year1_drawdown_ratio: ratio(year1_gross_withdrawal, capital_at_retirement),
        year1_effective_tax_rate: ratio(year1_tax, year1_gross_withdrawal),
        tax_saving: max_annual_tax_saving(&inputs),
        working_effective_tax_rate: ratio(
            inputs.tax_regime.tax_payable(
                inputs.gross_annual_income,
                inputs.current_age,
                BracketIndexing::NONE,
            ),
            inputs.gross_annual_income,
        ),
        retirement_effective_tax_rate: ratio(total_retirement_tax, total_gross_withdrawn),
        total_contributions,
        total_contributions_today,
        total_tax_saving_reinvested,
        total_gross_withdrawn,
        total_net_delivered,
        total_retirement_tax,
        accumulation: accumulation.ledger,
        decumulation: decumulation.ledger,
        capital_trajectory,
    }
}

/// Tax saved this year at today's brackets by contributing the full
/// deductible amount to the RA.
pub fn max_annual_tax_saving(inputs: &Inputs) -> f64 {
    let income = inputs.gross_annual_income;
    let deduction = inputs.ra_deduction_limit(income);
    let regime = &inputs.tax_regime;
    let before = regime.tax_payable(income, inputs.current_age, BracketIndexing::NONE);
    let after = regime.tax_payable(income - deduction, inputs.current_age, BracketIndexing::NONE);
    before - after
}

fn capital_trajectory(
    accumulation: &[AccumulationYear],
    decumulation: &[DecumulationYear],
) -> Vec<CapitalPoint> {
    let pre = accumulation.iter().map(|year| CapitalPoint {
        age: year.age,
        phase: Phase::Accumulation,
        ra: year.ra_end,
        tfsa: year.tfsa_end,
        total: year.ra_end + year.tfsa_end,
    });
    let post = decumulation.iter().map(|year| CapitalPoint {
        age: year.age,
        phase: Phase::Decumulation,
        ra: year.ra_end,
        tfsa: year.tfsa_end,
        total: year.ra_end + year.tfsa_end,
    });
    pre.chain(post).collect()
}

fn growth(rate: f64, years: u32) -> f64 {
    (1.0 + rate).powi(years as i32)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
