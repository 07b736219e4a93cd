mod engine;
mod projection;
mod solver;
mod tax;
mod types;

pub use engine::{
    Accumulation, Decumulation, MonthlySplit, SHORTFALL_TOLERANCE, YearOneWithdrawal,
    accumulate, decumulate, monthly_rate, ra_contribution_tax_saving,
    split_monthly_contribution, target_monthly_at_retirement,
};
pub use projection::{max_annual_tax_saving, run_projection, run_projection_with};
pub use solver::{Solution, SolverConfig, Trial, solve_contribution, solve_contribution_with};
pub use tax::{BracketIndexing, GROSS_UP_ITERATIONS, GrossUp};
pub use types::{
    AccumulationYear, CapitalPoint, DEFAULT_RA_DEDUCTION_CEILING, DEFAULT_RA_DEDUCTION_FRACTION,
    DEFAULT_TFSA_LIFETIME_LIMIT, DEFAULT_TFSA_MONTHLY_LIMIT, DecumulationYear, DepletionOrder,
    IncomeGrowth, Inputs, MAX_FLAT_TAX_RATE, Phase, ProgressiveTable, ProjectionResult, Rebates,
    TaxBracket, TaxRegime,
};
