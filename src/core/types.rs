use serde::Serialize;

pub const DEFAULT_TFSA_MONTHLY_LIMIT: f64 = 3_000.0;
pub const DEFAULT_TFSA_LIFETIME_LIMIT: f64 = 500_000.0;
pub const DEFAULT_RA_DEDUCTION_FRACTION: f64 = 0.275;
pub const DEFAULT_RA_DEDUCTION_CEILING: f64 = 350_000.0;

/// Highest flat rate accepted; a 100% rate would make every gross-up diverge.
pub const MAX_FLAT_TAX_RATE: f64 = 0.99;
const MIN_RETURN: f64 = -0.99;
const MAX_AGE: u32 = 130;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DepletionOrder {
    TfsaFirst,
    RaFirst,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IncomeGrowth {
    Inflation,
    Custom(f64),
}

/// One row of a progressive table. `base_tax` is the tax payable at the
/// upper limit of the previous bracket.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaxBracket {
    pub upper_limit: f64,
    pub base_tax: f64,
    pub marginal_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Rebates {
    pub primary: f64,
    /// Added from age 65.
    pub secondary: f64,
    /// Added from age 75.
    pub tertiary: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressiveTable {
    pub brackets: Vec<TaxBracket>,
    pub rebates: Rebates,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaxRegime {
    Progressive(ProgressiveTable),
    Flat { rate: f64 },
}

impl Default for TaxRegime {
    fn default() -> Self {
        TaxRegime::Progressive(ProgressiveTable::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    pub ra_start: f64,
    pub tfsa_start: f64,
    pub tfsa_contributed_to_date: f64,
    pub tfsa_monthly_contribution: f64,
    pub tfsa_monthly_limit: f64,
    pub tfsa_lifetime_limit: f64,
    pub target_net_monthly_income: f64,
    pub pre_retirement_return: f64,
    pub post_retirement_return: f64,
    pub inflation_rate: f64,
    pub contribution_escalation_rate: f64,
    pub gross_annual_income: f64,
    pub income_growth: IncomeGrowth,
    pub ra_deduction_fraction: f64,
    pub ra_deduction_ceiling: f64,
    pub depletion_order: DepletionOrder,
    pub tax_regime: TaxRegime,
    pub reinvest_tax_saving: bool,
    pub index_tax_brackets: bool,
}

impl Default for Inputs {
    fn default() -> Self {
        Self {
            current_age: 30,
            retirement_age: 65,
            life_expectancy: 90,
            ra_start: 0.0,
            tfsa_start: 0.0,
            tfsa_contributed_to_date: 0.0,
            tfsa_monthly_contribution: DEFAULT_TFSA_MONTHLY_LIMIT,
            tfsa_monthly_limit: DEFAULT_TFSA_MONTHLY_LIMIT,
            tfsa_lifetime_limit: DEFAULT_TFSA_LIFETIME_LIMIT,
            target_net_monthly_income: 30_000.0,
            pre_retirement_return: 0.10,
            post_retirement_return: 0.08,
            inflation_rate: 0.05,
            contribution_escalation_rate: 0.05,
            gross_annual_income: 500_000.0,
            income_growth: IncomeGrowth::Inflation,
            ra_deduction_fraction: DEFAULT_RA_DEDUCTION_FRACTION,
            ra_deduction_ceiling: DEFAULT_RA_DEDUCTION_CEILING,
            depletion_order: DepletionOrder::TfsaFirst,
            tax_regime: TaxRegime::default(),
            reinvest_tax_saving: true,
            index_tax_brackets: true,
        }
    }
}

impl Inputs {
    /// Clamp every field into a range the simulators can consume without
    /// producing NaN. Never fails: bad values fall back to safe defaults.
    pub fn sanitized(&self) -> Inputs {
        let defaults = Inputs::default();

        let current_age = self.current_age.min(MAX_AGE - 2);
        let retirement_age = self.retirement_age.clamp(current_age + 1, MAX_AGE - 1);
        let life_expectancy = self.life_expectancy.clamp(retirement_age + 1, MAX_AGE);

        let tfsa_monthly_limit = non_negative(self.tfsa_monthly_limit, defaults.tfsa_monthly_limit);
        let tfsa_lifetime_limit =
            non_negative(self.tfsa_lifetime_limit, defaults.tfsa_lifetime_limit);

        let income_growth = match self.income_growth {
            IncomeGrowth::Inflation => IncomeGrowth::Inflation,
            IncomeGrowth::Custom(rate) => IncomeGrowth::Custom(non_negative(rate, 0.0)),
        };

        let tax_regime = match &self.tax_regime {
            TaxRegime::Flat { rate } => TaxRegime::Flat {
                rate: finite_or(*rate, 0.0).clamp(0.0, MAX_FLAT_TAX_RATE),
            },
            TaxRegime::Progressive(table) if table.is_usable() => {
                TaxRegime::Progressive(table.clone())
            }
            TaxRegime::Progressive(_) => TaxRegime::default(),
        };

        Inputs {
            current_age,
            retirement_age,
            life_expectancy,
            ra_start: non_negative(self.ra_start, 0.0),
            tfsa_start: non_negative(self.tfsa_start, 0.0),
            tfsa_contributed_to_date: non_negative(self.tfsa_contributed_to_date, 0.0)
                .min(tfsa_lifetime_limit),
            tfsa_monthly_contribution: non_negative(self.tfsa_monthly_contribution, 0.0)
                .min(tfsa_monthly_limit),
            tfsa_monthly_limit,
            tfsa_lifetime_limit,
            target_net_monthly_income: non_negative(self.target_net_monthly_income, 0.0),
            pre_retirement_return: finite_or(
                self.pre_retirement_return,
                defaults.pre_retirement_return,
            )
            .max(MIN_RETURN),
            post_retirement_return: finite_or(
                self.post_retirement_return,
                defaults.post_retirement_return,
            )
            .max(MIN_RETURN),
            inflation_rate: non_negative(self.inflation_rate, defaults.inflation_rate),
            contribution_escalation_rate: non_negative(self.contribution_escalation_rate, 0.0),
            gross_annual_income: non_negative(self.gross_annual_income, 0.0),
            income_growth,
            ra_deduction_fraction: non_negative(
                self.ra_deduction_fraction,
                defaults.ra_deduction_fraction,
            )
            .min(1.0),
            ra_deduction_ceiling: non_negative(
                self.ra_deduction_ceiling,
                defaults.ra_deduction_ceiling,
            ),
            depletion_order: self.depletion_order,
            tax_regime,
            reinvest_tax_saving: self.reinvest_tax_saving,
            index_tax_brackets: self.index_tax_brackets,
        }
    }

    pub fn years_to_retirement(&self) -> u32 {
        self.retirement_age.saturating_sub(self.current_age)
    }

    pub fn years_in_retirement(&self) -> u32 {
        self.life_expectancy.saturating_sub(self.retirement_age)
    }

    pub fn income_growth_rate(&self) -> f64 {
        match self.income_growth {
            IncomeGrowth::Inflation => self.inflation_rate,
            IncomeGrowth::Custom(rate) => rate,
        }
    }

    /// Statutory RA deduction for a given gross income.
    pub fn ra_deduction_limit(&self, gross_income: f64) -> f64 {
        (self.ra_deduction_fraction * gross_income.max(0.0)).min(self.ra_deduction_ceiling)
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

fn non_negative(value: f64, fallback: f64) -> f64 {
    finite_or(value, fallback).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationYear {
    pub year_index: u32,
    pub age: u32,
    pub ra_start: f64,
    pub ra_end: f64,
    pub tfsa_start: f64,
    pub tfsa_end: f64,
    pub total_contribution: f64,
    pub ra_contribution: f64,
    pub tfsa_contribution: f64,
    pub tfsa_overflow: f64,
    pub gross_income: f64,
    pub tax_saving_reinvested: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecumulationYear {
    pub year_index: u32,
    pub age: u32,
    pub ra_start: f64,
    pub ra_end: f64,
    pub tfsa_start: f64,
    pub tfsa_end: f64,
    pub net_income_required: f64,
    pub net_income_delivered: f64,
    pub tfsa_withdrawal: f64,
    pub ra_gross_withdrawal: f64,
    pub gross_withdrawal: f64,
    pub tax_paid: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Accumulation,
    Decumulation,
}

/// End-of-year balances at `age`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalPoint {
    pub age: u32,
    pub phase: Phase,
    pub ra: f64,
    pub tfsa: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub required_monthly_contribution: f64,
    pub feasible: bool,
    pub life_expectancy: u32,
    pub exhaustion_age: u32,
    pub shortfall_years: u32,
    pub target_monthly_at_retirement: f64,
    pub ra_at_retirement: f64,
    pub tfsa_at_retirement: f64,
    pub capital_at_retirement: f64,
    pub capital_at_retirement_today: f64,
    pub year1_gross_withdrawal: f64,
    pub year1_net_income: f64,
    pub year1_tax: f64,
    pub year1_drawdown_ratio: f64,
    pub year1_effective_tax_rate: f64,
    pub tax_saving: f64,
    pub working_effective_tax_rate: f64,
    pub retirement_effective_tax_rate: f64,
    pub total_contributions: f64,
    pub total_contributions_today: f64,
    pub total_tax_saving_reinvested: f64,
    pub total_gross_withdrawn: f64,
    pub total_net_delivered: f64,
    pub total_retirement_tax: f64,
    pub accumulation: Vec<AccumulationYear>,
    pub decumulation: Vec<DecumulationYear>,
    pub capital_trajectory: Vec<CapitalPoint>,
}
