use super::tax::{BracketIndexing, GrossUp};
use super::types::{AccumulationYear, DecumulationYear, DepletionOrder, Inputs};

const MONTHS_PER_YEAR: u32 = 12;

/// Net income left unmet after both pools are tried that still counts as met.
pub const SHORTFALL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulation {
    pub ra_end: f64,
    pub tfsa_end: f64,
    pub tfsa_contributed_to_date: f64,
    pub ledger: Vec<AccumulationYear>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearOneWithdrawal {
    pub gross: f64,
    pub net: f64,
    pub tax: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decumulation {
    pub exhaustion_age: u32,
    pub year_one: Option<YearOneWithdrawal>,
    pub ledger: Vec<DecumulationYear>,
}

impl Decumulation {
    pub fn sustains(&self, life_expectancy: u32) -> bool {
        self.exhaustion_age >= life_expectancy
    }
}

/// How one month's contribution lands in the two pools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlySplit {
    pub tfsa: f64,
    pub overflow: f64,
    pub ra: f64,
}

/// Split a month's contribution. The TFSA takes its earmark up to the
/// remaining lifetime headroom; whatever it cannot take goes to the RA in
/// the same month on top of the RA's own share.
pub fn split_monthly_contribution(
    monthly_total: f64,
    tfsa_desired: f64,
    tfsa_headroom: f64,
) -> MonthlySplit {
    let monthly_total = monthly_total.max(0.0);
    let tfsa_desired = tfsa_desired.clamp(0.0, monthly_total);
    let tfsa = tfsa_desired.min(tfsa_headroom.max(0.0));
    let overflow = tfsa_desired - tfsa;
    let ra_planned = monthly_total - tfsa_desired;
    MonthlySplit {
        tfsa,
        overflow,
        ra: ra_planned + overflow,
    }
}

pub fn monthly_rate(annual_rate: f64) -> f64 {
    (1.0 + annual_rate).powf(1.0 / MONTHS_PER_YEAR as f64) - 1.0
}

fn growth_factor(rate: f64, years: u32) -> f64 {
    (1.0 + rate).powi(years as i32)
}

pub fn accumulate(inputs: &Inputs, monthly_contribution: f64) -> Accumulation {
    let years = inputs.years_to_retirement();
    let rate = monthly_rate(inputs.pre_retirement_return);
    let mut ra = inputs.ra_start;
    let mut tfsa = inputs.tfsa_start;
    let mut tfsa_contributed = inputs.tfsa_contributed_to_date;
    let mut ledger = Vec::with_capacity(years as usize);

    for year_index in 0..years {
        let age = inputs.current_age + year_index;
        let ra_start = ra;
        let tfsa_start = tfsa;

        let monthly_total = monthly_contribution.max(0.0)
            * growth_factor(inputs.contribution_escalation_rate, year_index);
        let tfsa_desired = inputs.tfsa_monthly_contribution.min(monthly_total);

        let mut ra_contribution = 0.0;
        let mut tfsa_contribution = 0.0;
        let mut tfsa_overflow = 0.0;
        for _ in 0..MONTHS_PER_YEAR {
            let headroom = inputs.tfsa_lifetime_limit - tfsa_contributed;
            let split = split_monthly_contribution(monthly_total, tfsa_desired, headroom);

            ra += split.ra;
            tfsa += split.tfsa;
            tfsa_contributed += split.tfsa;

            ra_contribution += split.ra;
            tfsa_contribution += split.tfsa;
            tfsa_overflow += split.overflow;

            ra *= 1.0 + rate;
            tfsa *= 1.0 + rate;
        }

        let gross_income =
            inputs.gross_annual_income * growth_factor(inputs.income_growth_rate(), year_index);
        let tax_saving_reinvested = if inputs.reinvest_tax_saving {
            let indexing =
                BracketIndexing::new(year_index, inputs.inflation_rate, inputs.index_tax_brackets);
            ra_contribution_tax_saving(inputs, gross_income, ra_contribution, age, indexing)
        } else {
            0.0
        };
        ra += tax_saving_reinvested;

        ledger.push(AccumulationYear {
            year_index,
            age,
            ra_start,
            ra_end: ra,
            tfsa_start,
            tfsa_end: tfsa,
            total_contribution: ra_contribution + tfsa_contribution,
            ra_contribution,
            tfsa_contribution,
            tfsa_overflow,
            gross_income,
            tax_saving_reinvested,
        });
    }

    Accumulation {
        ra_end: ra,
        tfsa_end: tfsa,
        tfsa_contributed_to_date: tfsa_contributed,
        ledger,
    }
}

/// Tax saved by deducting an RA contribution (capped at the statutory
/// deduction limit) from a year's gross income.
pub fn ra_contribution_tax_saving(
    inputs: &Inputs,
    gross_income: f64,
    ra_contribution: f64,
    age: u32,
    indexing: BracketIndexing,
) -> f64 {
    let deduction = ra_contribution
        .max(0.0)
        .min(inputs.ra_deduction_limit(gross_income));
    if deduction <= 0.0 {
        return 0.0;
    }
    let regime = &inputs.tax_regime;
    let before = regime.tax_payable(gross_income, age, indexing);
    let after = regime.tax_payable(gross_income - deduction, age, indexing);
    (before - after).max(0.0)
}

/// Nominal monthly net income needed in the first retirement year.
pub fn target_monthly_at_retirement(inputs: &Inputs) -> f64 {
    inputs.target_net_monthly_income
        * growth_factor(inputs.inflation_rate, inputs.years_to_retirement())
}

#[derive(Debug, Clone, Copy, Default)]
struct YearDraw {
    tfsa: f64,
    ra_gross: f64,
    tax: f64,
    net: f64,
}

/// Draw the inflated need each retirement year until life expectancy.
///
/// A year is funded when the net delivered is within `SHORTFALL_TOLERANCE`
/// of the need, even if it leaves both pools at zero. Exhaustion is then
/// recorded at the next age, when capital is zero and income is still
/// needed. A year that ends with a larger shortfall is itself the
/// exhaustion age and gets no ledger row.
pub fn decumulate(inputs: &Inputs, ra_start: f64, tfsa_start: f64) -> Decumulation {
    let years = inputs.years_in_retirement();
    let annual_need_at_retirement = target_monthly_at_retirement(inputs) * MONTHS_PER_YEAR as f64;
    let growth = 1.0 + inputs.post_retirement_return;

    let mut ra = ra_start.max(0.0);
    let mut tfsa = tfsa_start.max(0.0);
    let mut ledger = Vec::with_capacity(years as usize);
    let mut exhaustion_age = inputs.life_expectancy;
    let mut year_one = None;

    for year_index in 0..years {
        let age = inputs.retirement_age + year_index;
        let need = annual_need_at_retirement * growth_factor(inputs.inflation_rate, year_index);

        if need > 0.0 && ra + tfsa <= 0.0 {
            exhaustion_age = age;
            break;
        }

        let indexing = BracketIndexing::new(
            inputs.years_to_retirement() + year_index,
            inputs.inflation_rate,
            inputs.index_tax_brackets,
        );

        let ra_before = ra;
        let tfsa_before = tfsa;
        let draw = withdraw_for_year(inputs, need, age, indexing, &mut ra, &mut tfsa);

        if year_index == 0 {
            year_one = Some(YearOneWithdrawal {
                gross: draw.tfsa + draw.ra_gross,
                net: draw.net,
                tax: draw.tax,
            });
        }

        if need - draw.net > SHORTFALL_TOLERANCE {
            exhaustion_age = age;
            break;
        }

        ra = (ra * growth).max(0.0);
        tfsa = (tfsa * growth).max(0.0);

        ledger.push(DecumulationYear {
            year_index,
            age,
            ra_start: ra_before,
            ra_end: ra,
            tfsa_start: tfsa_before,
            tfsa_end: tfsa,
            net_income_required: need,
            net_income_delivered: draw.net,
            tfsa_withdrawal: draw.tfsa,
            ra_gross_withdrawal: draw.ra_gross,
            gross_withdrawal: draw.tfsa + draw.ra_gross,
            tax_paid: draw.tax,
        });
    }

    Decumulation {
        exhaustion_age,
        year_one,
        ledger,
    }
}

fn withdraw_for_year(
    inputs: &Inputs,
    need: f64,
    age: u32,
    indexing: BracketIndexing,
    ra: &mut f64,
    tfsa: &mut f64,
) -> YearDraw {
    let mut draw = YearDraw::default();
    let mut remaining = need.max(0.0);

    match inputs.depletion_order {
        DepletionOrder::TfsaFirst => {
            draw_from_tfsa(&mut draw, &mut remaining, tfsa);
            draw_from_ra(inputs, &mut draw, &mut remaining, age, indexing, ra);
        }
        DepletionOrder::RaFirst => {
            draw_from_ra(inputs, &mut draw, &mut remaining, age, indexing, ra);
            draw_from_tfsa(&mut draw, &mut remaining, tfsa);
        }
    }

    draw
}

fn draw_from_tfsa(draw: &mut YearDraw, remaining: &mut f64, tfsa: &mut f64) {
    if *remaining <= 0.0 || *tfsa <= 0.0 {
        return;
    }
    let taken = tfsa.min(*remaining);
    *tfsa -= taken;
    *remaining -= taken;
    draw.tfsa += taken;
    draw.net += taken;
}

fn draw_from_ra(
    inputs: &Inputs,
    draw: &mut YearDraw,
    remaining: &mut f64,
    age: u32,
    indexing: BracketIndexing,
    ra: &mut f64,
) {
    let settled = withdraw_from_ra_for_net(inputs, *remaining, age, indexing, ra);
    *remaining = (*remaining - settled.net).max(0.0);
    draw.ra_gross += settled.gross;
    draw.tax += settled.tax;
    draw.net += settled.net;
}

/// Gross up `target_net` against the RA. When the pool cannot cover the
/// gross, the whole balance is withdrawn and taxed instead.
fn withdraw_from_ra_for_net(
    inputs: &Inputs,
    target_net: f64,
    age: u32,
    indexing: BracketIndexing,
    ra: &mut f64,
) -> GrossUp {
    if target_net <= 0.0 || *ra <= 0.0 {
        return GrossUp::ZERO;
    }

    let regime = &inputs.tax_regime;
    let wanted = regime.gross_up(target_net, age, indexing);
    let settled = if wanted.gross > *ra {
        regime.settle(*ra, age, indexing)
    } else {
        wanted
    };
    *ra = (*ra - settled.gross).max(0.0);
    settled
}
