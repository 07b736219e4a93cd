use super::types::{ProgressiveTable, Rebates, TaxBracket, TaxRegime};

/// Halvings used when grossing up a net amount. Fixed so that results are
/// reproducible to the cent regardless of input scale.
pub const GROSS_UP_ITERATIONS: u32 = 40;

const SECONDARY_REBATE_AGE: u32 = 65;
const TERTIARY_REBATE_AGE: u32 = 75;
const MAX_EFFECTIVE_MARGINAL_RATE: f64 = 0.99;

/// Inflation scaling applied to limits, bases and rebates ("bracket creep").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketIndexing {
    pub years: u32,
    pub inflation_rate: f64,
    pub enabled: bool,
}

impl BracketIndexing {
    pub const NONE: BracketIndexing = BracketIndexing {
        years: 0,
        inflation_rate: 0.0,
        enabled: false,
    };

    pub fn new(years: u32, inflation_rate: f64, enabled: bool) -> Self {
        Self {
            years,
            inflation_rate,
            enabled,
        }
    }

    pub fn factor(self) -> f64 {
        if self.enabled && self.years > 0 && self.inflation_rate > 0.0 {
            (1.0 + self.inflation_rate).powi(self.years as i32)
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrossUp {
    pub gross: f64,
    pub tax: f64,
    pub net: f64,
}

impl GrossUp {
    pub const ZERO: GrossUp = GrossUp {
        gross: 0.0,
        tax: 0.0,
        net: 0.0,
    };
}

impl Default for ProgressiveTable {
    /// 2024/25 South African individual income tax table.
    fn default() -> Self {
        let brackets = [
            (237_100.0, 0.0, 0.18),
            (370_500.0, 42_678.0, 0.26),
            (512_800.0, 77_362.0, 0.31),
            (673_000.0, 121_475.0, 0.36),
            (857_900.0, 179_147.0, 0.39),
            (1_817_000.0, 251_258.0, 0.41),
            (f64::INFINITY, 644_489.0, 0.45),
        ]
        .into_iter()
        .map(|(upper_limit, base_tax, marginal_rate)| TaxBracket {
            upper_limit,
            base_tax,
            marginal_rate,
        })
        .collect();

        Self {
            brackets,
            rebates: Rebates {
                primary: 17_235.0,
                secondary: 9_444.0,
                tertiary: 3_145.0,
            },
        }
    }
}

impl ProgressiveTable {
    /// True when the brackets ascend, end at infinity and every base equals
    /// the tax at the previous upper limit (within a cent).
    pub fn is_consistent(&self) -> bool {
        let Some(last) = self.brackets.last() else {
            return false;
        };
        if last.upper_limit != f64::INFINITY {
            return false;
        }
        if self.brackets[0].base_tax.abs() > 0.01 {
            return false;
        }

        let mut previous_upper = 0.0;
        let mut expected_base = 0.0;
        for bracket in &self.brackets {
            if bracket.upper_limit <= previous_upper {
                return false;
            }
            if (bracket.base_tax - expected_base).abs() > 0.01 {
                return false;
            }
            expected_base += (bracket.upper_limit - previous_upper) * bracket.marginal_rate;
            previous_upper = bracket.upper_limit;
        }
        true
    }

    /// Consistent, with every marginal rate in `[0, 1)` and finite,
    /// non-negative rebates. Anything less breaks the gross-up, which needs
    /// `gross - tax(gross)` to rise with `gross`.
    pub fn is_usable(&self) -> bool {
        let rates_ok = self
            .brackets
            .iter()
            .all(|bracket| {
                (0.0..1.0).contains(&bracket.marginal_rate)
                    && bracket.base_tax.is_finite()
                    && !bracket.upper_limit.is_nan()
            });
        let rebates = self.rebates;
        let rebates_ok = [rebates.primary, rebates.secondary, rebates.tertiary]
            .iter()
            .all(|rebate| rebate.is_finite() && *rebate >= 0.0);
        rates_ok && rebates_ok && self.is_consistent()
    }

    fn tax_before_rebates(&self, income: f64, factor: f64) -> f64 {
        let mut previous_upper = 0.0;
        for (idx, bracket) in self.brackets.iter().enumerate() {
            let upper = bracket.upper_limit * factor;
            if income <= upper || idx + 1 == self.brackets.len() {
                if idx == 0 {
                    return income * bracket.marginal_rate;
                }
                return bracket.base_tax * factor + (income - previous_upper) * bracket.marginal_rate;
            }
            previous_upper = upper;
        }
        0.0
    }

    fn rebate_for_age(&self, age: u32, factor: f64) -> f64 {
        let mut rebate = self.rebates.primary;
        if age >= SECONDARY_REBATE_AGE {
            rebate += self.rebates.secondary;
        }
        if age >= TERTIARY_REBATE_AGE {
            rebate += self.rebates.tertiary;
        }
        rebate * factor
    }
}

impl TaxRegime {
    pub fn tax_payable(&self, taxable_income: f64, age: u32, indexing: BracketIndexing) -> f64 {
        if taxable_income.is_nan() || taxable_income <= 0.0 {
            return 0.0;
        }
        match self {
            TaxRegime::Flat { rate } => (taxable_income * rate).max(0.0),
            TaxRegime::Progressive(table) => {
                let factor = indexing.factor();
                let tax = table.tax_before_rebates(taxable_income, factor);
                (tax - table.rebate_for_age(age, factor)).max(0.0)
            }
        }
    }

    /// Highest marginal rate the regime can charge, kept below 100%.
    pub fn top_marginal_rate(&self) -> f64 {
        let rate = match self {
            TaxRegime::Flat { rate } => *rate,
            TaxRegime::Progressive(table) => table
                .brackets
                .iter()
                .map(|bracket| bracket.marginal_rate)
                .fold(0.0, f64::max),
        };
        rate.clamp(0.0, MAX_EFFECTIVE_MARGINAL_RATE)
    }

    /// Find the gross amount whose after-tax value is `net_target`.
    pub fn gross_up(&self, net_target: f64, age: u32, indexing: BracketIndexing) -> GrossUp {
        if net_target.is_nan() || net_target <= 0.0 {
            return GrossUp::ZERO;
        }

        let net_of = |gross: f64| gross - self.tax_payable(gross, age, indexing);

        let mut lo = net_target;
        let mut hi = net_target / (1.0 - self.top_marginal_rate());

        for _ in 0..GROSS_UP_ITERATIONS {
            let mid = (lo + hi) * 0.5;
            if net_of(mid) < net_target {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        self.settle(hi, age, indexing)
    }

    /// Tax and net for a gross amount that is already fixed.
    pub fn settle(&self, gross: f64, age: u32, indexing: BracketIndexing) -> GrossUp {
        if gross.is_nan() || gross <= 0.0 {
            return GrossUp::ZERO;
        }
        let tax = self.tax_payable(gross, age, indexing);
        GrossUp {
            gross,
            tax,
            net: gross - tax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn progressive() -> TaxRegime {
        TaxRegime::default()
    }

    #[test]
    fn default_table_is_internally_consistent() {
        assert!(ProgressiveTable::default().is_consistent());
    }

    #[test]
    fn table_with_wrong_base_is_inconsistent() {
        let mut table = ProgressiveTable::default();
        table.brackets[2].base_tax += 100.0;
        assert!(!table.is_consistent());
    }

    #[test]
    fn table_without_open_top_bracket_is_inconsistent() {
        let mut table = ProgressiveTable::default();
        table.brackets.pop();
        assert!(!table.is_consistent());
    }

    #[test]
    fn usable_table_rejects_punitive_rates_and_negative_rebates() {
        assert!(ProgressiveTable::default().is_usable());

        let mut punitive = ProgressiveTable::default();
        punitive.brackets[6].marginal_rate = 1.0;
        assert!(!punitive.is_usable());

        let mut negative_rebate = ProgressiveTable::default();
        negative_rebate.rebates.primary = -1_000.0;
        assert!(!negative_rebate.is_usable());

        let mut unsorted = ProgressiveTable::default();
        unsorted.brackets.swap(1, 2);
        assert!(!unsorted.is_usable());
    }

    #[test]
    fn non_positive_income_has_no_tax() {
        let regime = progressive();
        for income in [0.0, -1.0, -250_000.0, f64::NAN] {
            assert_eq!(regime.tax_payable(income, 40, BracketIndexing::NONE), 0.0);
        }
        let flat = TaxRegime::Flat { rate: 0.3 };
        assert_eq!(flat.tax_payable(-10.0, 40, BracketIndexing::NONE), 0.0);
    }

    #[test]
    fn first_bracket_has_no_base_or_offset() {
        let regime = progressive();
        // 200 000 * 18% - 17 235
        let tax = regime.tax_payable(200_000.0, 40, BracketIndexing::NONE);
        assert_approx_tol(tax, 18_765.0, 1e-6);
    }

    #[test]
    fn middle_bracket_adds_base_and_marginal_portion() {
        let regime = progressive();
        // 121 475 + (600 000 - 512 800) * 36% - 17 235
        let tax = regime.tax_payable(600_000.0, 40, BracketIndexing::NONE);
        assert_approx_tol(tax, 135_632.0, 1e-6);
    }

    #[test]
    fn top_bracket_is_open_ended() {
        let regime = progressive();
        // 644 489 + (2 000 000 - 1 817 000) * 45% - 17 235
        let tax = regime.tax_payable(2_000_000.0, 40, BracketIndexing::NONE);
        assert_approx_tol(tax, 709_604.0, 1e-6);
    }

    #[test]
    fn exact_boundary_belongs_to_lower_bracket() {
        let regime = progressive();
        let at_limit = regime.tax_payable(370_500.0, 40, BracketIndexing::NONE);
        assert_approx_tol(at_limit, 77_362.0 - 17_235.0, 1e-6);
        let just_above = regime.tax_payable(370_501.0, 40, BracketIndexing::NONE);
        assert_approx_tol(just_above - at_limit, 0.31, 1e-6);
    }

    #[test]
    fn rebates_cannot_create_a_refund() {
        let regime = progressive();
        assert_eq!(regime.tax_payable(50_000.0, 80, BracketIndexing::NONE), 0.0);
    }

    #[test]
    fn rebate_thresholds_reduce_tax_at_65_and_75() {
        let regime = progressive();
        let income = 450_000.0;
        let at_64 = regime.tax_payable(income, 64, BracketIndexing::NONE);
        let at_65 = regime.tax_payable(income, 65, BracketIndexing::NONE);
        let at_74 = regime.tax_payable(income, 74, BracketIndexing::NONE);
        let at_75 = regime.tax_payable(income, 75, BracketIndexing::NONE);
        assert!(at_65 < at_64);
        assert_approx_tol(at_64 - at_65, 9_444.0, 1e-6);
        assert_eq!(at_65, at_74);
        assert!(at_75 < at_74);
        assert_approx_tol(at_74 - at_75, 3_145.0, 1e-6);
    }

    #[test]
    fn indexing_scales_limits_bases_and_rebates() {
        let regime = progressive();
        let indexing = BracketIndexing::new(10, 0.05, true);
        let factor = indexing.factor();
        let base_income = 600_000.0;

        let today = regime.tax_payable(base_income, 40, BracketIndexing::NONE);
        let future = regime.tax_payable(base_income * factor, 40, indexing);
        assert_approx_tol(future, today * factor, 1e-6);
    }

    #[test]
    fn indexing_is_inert_when_disabled_or_zero() {
        assert_eq!(BracketIndexing::new(10, 0.05, false).factor(), 1.0);
        assert_eq!(BracketIndexing::new(0, 0.05, true).factor(), 1.0);
        assert_eq!(BracketIndexing::new(10, 0.0, true).factor(), 1.0);
    }

    #[test]
    fn flat_regime_ignores_age_and_indexing() {
        let flat = TaxRegime::Flat { rate: 0.25 };
        let indexing = BracketIndexing::new(20, 0.06, true);
        assert_approx_tol(flat.tax_payable(100_000.0, 80, indexing), 25_000.0, 1e-9);
    }

    #[test]
    fn gross_up_of_zero_is_zero() {
        assert_eq!(
            progressive().gross_up(0.0, 40, BracketIndexing::NONE),
            GrossUp::ZERO
        );
        assert_eq!(
            progressive().gross_up(-5.0, 40, BracketIndexing::NONE),
            GrossUp::ZERO
        );
    }

    #[test]
    fn flat_gross_up_matches_closed_form() {
        let flat = TaxRegime::Flat { rate: 0.3 };
        let result = flat.gross_up(70_000.0, 66, BracketIndexing::NONE);
        assert_approx_tol(result.gross, 100_000.0, 1e-3);
        assert_approx_tol(result.tax, 30_000.0, 1e-3);
        assert_approx_tol(result.net, 70_000.0, 1e-3);
    }

    #[test]
    fn gross_up_below_rebate_threshold_is_tax_free() {
        let result = progressive().gross_up(60_000.0, 70, BracketIndexing::NONE);
        assert_approx_tol(result.gross, 60_000.0, 1e-6);
        assert_eq!(result.tax, 0.0);
    }

    #[test]
    fn gross_up_never_undershoots_target() {
        let regime = progressive();
        let indexing = BracketIndexing::new(25, 0.05, true);
        for net in [1.0, 99_999.0, 360_000.0, 1_250_000.0] {
            let result = regime.gross_up(net, 67, indexing);
            assert!(result.net >= net - 1e-6, "net {net} gave {}", result.net);
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_gross_up_recovers_net_within_one_unit(
            net_cents in 0u64..1_000_000_000,
            age in 18u32..100,
            years in 0u32..40,
            inflation_bp in 0u32..1000,
            indexed in proptest::bool::ANY
        ) {
            let net = net_cents as f64 / 100.0;
            let regime = progressive();
            let indexing = BracketIndexing::new(years, inflation_bp as f64 / 10_000.0, indexed);
            let result = regime.gross_up(net, age, indexing);
            let realised = result.gross - regime.tax_payable(result.gross, age, indexing);
            prop_assert!((realised - net).abs() <= 1.0);
            prop_assert!(result.gross >= net);
        }

        #[test]
        fn prop_tax_is_non_negative_and_below_income(
            income in 0u32..5_000_000,
            age in 0u32..110
        ) {
            let income = income as f64;
            let tax = progressive().tax_payable(income, age, BracketIndexing::NONE);
            prop_assert!(tax >= 0.0);
            prop_assert!(tax <= income * 0.45 + 1e-9);
        }

        #[test]
        fn prop_crossing_rebate_ages_strictly_lowers_tax(
            income in 400_000u32..3_000_000
        ) {
            let regime = progressive();
            let income = income as f64;
            let young = regime.tax_payable(income, 60, BracketIndexing::NONE);
            let senior = regime.tax_payable(income, 65, BracketIndexing::NONE);
            let elder = regime.tax_payable(income, 75, BracketIndexing::NONE);
            prop_assert!(senior < young);
            prop_assert!(elder < senior);
        }
    }
}
