use tracing::debug;

use super::engine::{Accumulation, Decumulation, accumulate, decumulate};
use super::types::Inputs;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    pub initial_upper_bound: f64,
    /// Cap on how often the upper bound doubles before giving up.
    pub max_doublings: u32,
    pub bisection_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            initial_upper_bound: 50_000.0,
            max_doublings: 10,
            bisection_iterations: 30,
        }
    }
}

/// One full accumulate-then-decumulate run for a candidate contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub monthly_contribution: f64,
    pub accumulation: Accumulation,
    pub decumulation: Decumulation,
}

impl Trial {
    pub fn run(inputs: &Inputs, monthly_contribution: f64) -> Self {
        let accumulation = accumulate(inputs, monthly_contribution);
        let decumulation = decumulate(inputs, accumulation.ra_end, accumulation.tfsa_end);
        Self {
            monthly_contribution,
            accumulation,
            decumulation,
        }
    }

    pub fn sustains(&self, inputs: &Inputs) -> bool {
        self.decumulation.sustains(inputs.life_expectancy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub monthly_contribution: f64,
    pub feasible: bool,
    pub upper_bound: f64,
    pub doublings: u32,
    pub trial: Trial,
}

pub fn solve_contribution(inputs: &Inputs) -> Solution {
    solve_contribution_with(inputs, SolverConfig::default())
}

/// Smallest monthly contribution whose capital lasts to life expectancy.
///
/// When even the largest tried contribution runs out, that attempt is
/// returned with `feasible == false`.
pub fn solve_contribution_with(inputs: &Inputs, config: SolverConfig) -> Solution {
    let nothing = Trial::run(inputs, 0.0);
    if nothing.sustains(inputs) {
        return Solution {
            monthly_contribution: 0.0,
            feasible: true,
            upper_bound: 0.0,
            doublings: 0,
            trial: nothing,
        };
    }

    let mut upper = config.initial_upper_bound.max(1.0);
    let mut best = Trial::run(inputs, upper);
    let mut doublings = 0;
    while !best.sustains(inputs) && doublings < config.max_doublings {
        upper *= 2.0;
        doublings += 1;
        best = Trial::run(inputs, upper);
    }

    if !best.sustains(inputs) {
        debug!(
            upper,
            doublings,
            exhaustion_age = best.decumulation.exhaustion_age,
            "contribution search exhausted its upper bound"
        );
        return Solution {
            monthly_contribution: upper,
            feasible: false,
            upper_bound: upper,
            doublings,
            trial: best,
        };
    }

    let mut lo = 0.0;
    let mut hi = upper;
    for _ in 0..config.bisection_iterations {
        let mid = (lo + hi) * 0.5;
        let trial = Trial::run(inputs, mid);
        if trial.sustains(inputs) {
            hi = mid;
            best = trial;
        } else {
            lo = mid;
        }
    }

    Solution {
        monthly_contribution: hi,
        feasible: true,
        upper_bound: upper,
        doublings,
        trial: best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DepletionOrder, IncomeGrowth, TaxRegime};
    use proptest::prelude::{prop_assert, proptest};

    fn deterministic_inputs() -> Inputs {
        Inputs {
            current_age: 30,
            retirement_age: 31,
            life_expectancy: 32,
            ra_start: 0.0,
            tfsa_start: 0.0,
            tfsa_contributed_to_date: 0.0,
            tfsa_monthly_contribution: 0.0,
            target_net_monthly_income: 1_000.0,
            pre_retirement_return: 0.0,
            post_retirement_return: 0.0,
            inflation_rate: 0.0,
            contribution_escalation_rate: 0.0,
            gross_annual_income: 0.0,
            income_growth: IncomeGrowth::Inflation,
            depletion_order: DepletionOrder::TfsaFirst,
            tax_regime: TaxRegime::Flat { rate: 0.0 },
            reinvest_tax_saving: false,
            index_tax_brackets: false,
            ..Inputs::default()
        }
    }

    #[test]
    fn solver_finds_hand_calculated_contribution() {
        // 12 months of contributions must fund 12 000 of net income.
        let inputs = deterministic_inputs();
        let solution = solve_contribution(&inputs);
        assert!(solution.feasible);
        assert!((solution.monthly_contribution - 1_000.0).abs() < 0.01);
        assert!(solution.trial.sustains(&inputs));
    }

    #[test]
    fn solver_result_is_minimal() {
        let mut inputs = deterministic_inputs();
        inputs.retirement_age = 40;
        inputs.life_expectancy = 60;
        inputs.pre_retirement_return = 0.07;
        inputs.post_retirement_return = 0.05;
        inputs.inflation_rate = 0.04;
        inputs.tax_regime = TaxRegime::default();

        let solution = solve_contribution(&inputs);
        assert!(solution.feasible);
        let slightly_less = Trial::run(&inputs, solution.monthly_contribution - 0.01);
        assert!(!slightly_less.sustains(&inputs));
    }

    #[test]
    fn sufficient_existing_capital_needs_no_contribution() {
        let mut inputs = deterministic_inputs();
        inputs.tfsa_start = 12_000.0;
        let solution = solve_contribution(&inputs);
        assert!(solution.feasible);
        assert_eq!(solution.monthly_contribution, 0.0);
        assert_eq!(solution.doublings, 0);
    }

    #[test]
    fn zero_target_needs_no_contribution() {
        let mut inputs = deterministic_inputs();
        inputs.target_net_monthly_income = 0.0;
        let solution = solve_contribution(&inputs);
        assert_eq!(solution.monthly_contribution, 0.0);
        assert!(solution.feasible);
    }

    #[test]
    fn upper_bound_doubles_until_target_is_reachable() {
        let mut inputs = deterministic_inputs();
        inputs.target_net_monthly_income = 120_000.0;
        let solution = solve_contribution(&inputs);
        assert!(solution.feasible);
        assert_eq!(solution.doublings, 2);
        assert_eq!(solution.upper_bound, 200_000.0);
        assert!((solution.monthly_contribution - 120_000.0).abs() < 1.0);
    }

    #[test]
    fn impossible_target_returns_best_effort_not_error() {
        let mut inputs = deterministic_inputs();
        inputs.target_net_monthly_income = 1.0e9;
        let config = SolverConfig {
            max_doublings: 3,
            ..SolverConfig::default()
        };
        let solution = solve_contribution_with(&inputs, config);
        assert!(!solution.feasible);
        assert_eq!(solution.doublings, 3);
        assert_eq!(solution.monthly_contribution, 400_000.0);
        assert!(solution.trial.decumulation.exhaustion_age < inputs.life_expectancy);
    }

    #[test]
    fn rerunning_solver_is_bit_identical() {
        let mut inputs = deterministic_inputs();
        inputs.retirement_age = 55;
        inputs.life_expectancy = 85;
        inputs.pre_retirement_return = 0.09;
        inputs.post_retirement_return = 0.06;
        inputs.inflation_rate = 0.05;
        inputs.tax_regime = TaxRegime::default();
        inputs.gross_annual_income = 600_000.0;
        inputs.reinvest_tax_saving = true;
        inputs.index_tax_brackets = true;

        let a = solve_contribution(&inputs);
        let b = solve_contribution(&inputs);
        assert_eq!(a.monthly_contribution.to_bits(), b.monthly_contribution.to_bits());
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_higher_target_never_lowers_contribution(
            base in 1_000u32..40_000,
            bump in 500u32..20_000,
            years_to_retire in 1u32..30,
            retired_years in 1u32..30
        ) {
            let mut inputs = deterministic_inputs();
            inputs.retirement_age = inputs.current_age + years_to_retire;
            inputs.life_expectancy = inputs.retirement_age + retired_years;
            inputs.pre_retirement_return = 0.08;
            inputs.post_retirement_return = 0.05;
            inputs.inflation_rate = 0.03;
            inputs.tax_regime = TaxRegime::default();

            inputs.target_net_monthly_income = base as f64;
            let lower = solve_contribution(&inputs);
            inputs.target_net_monthly_income = (base + bump) as f64;
            let higher = solve_contribution(&inputs);

            prop_assert!(higher.monthly_contribution >= lower.monthly_contribution);
        }
    }
}
