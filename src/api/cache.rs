use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::{DepletionOrder, IncomeGrowth, Inputs, ProjectionResult, TaxRegime};

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Memoises projections by their sanitised inputs. Projections are pure, so
/// a hit can be served without recomputation. The whole map is dropped once
/// it reaches capacity.
#[derive(Debug)]
pub struct ProjectionCache {
    capacity: usize,
    entries: HashMap<u64, (Inputs, Arc<ProjectionResult>)>,
}

impl Default for ProjectionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ProjectionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, inputs: &Inputs) -> Option<Arc<ProjectionResult>> {
        let inputs = inputs.sanitized();
        self.entries
            .get(&input_key(&inputs))
            .filter(|(stored, _)| *stored == inputs)
            .map(|(_, result)| Arc::clone(result))
    }

    pub fn insert(&mut self, inputs: &Inputs, result: Arc<ProjectionResult>) {
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
        let inputs = inputs.sanitized();
        self.entries.insert(input_key(&inputs), (inputs, result));
    }
}

pub fn input_key(inputs: &Inputs) -> u64 {
    let mut hasher = DefaultHasher::new();
    inputs.current_age.hash(&mut hasher);
    inputs.retirement_age.hash(&mut hasher);
    inputs.life_expectancy.hash(&mut hasher);
    for value in [
        inputs.ra_start,
        inputs.tfsa_start,
        inputs.tfsa_contributed_to_date,
        inputs.tfsa_monthly_contribution,
        inputs.tfsa_monthly_limit,
        inputs.tfsa_lifetime_limit,
        inputs.target_net_monthly_income,
        inputs.pre_retirement_return,
        inputs.post_retirement_return,
        inputs.inflation_rate,
        inputs.contribution_escalation_rate,
        inputs.gross_annual_income,
        inputs.ra_deduction_fraction,
        inputs.ra_deduction_ceiling,
    ] {
        value.to_bits().hash(&mut hasher);
    }
    match inputs.income_growth {
        IncomeGrowth::Inflation => 0u8.hash(&mut hasher),
        IncomeGrowth::Custom(rate) => {
            1u8.hash(&mut hasher);
            rate.to_bits().hash(&mut hasher);
        }
    }
    match inputs.depletion_order {
        DepletionOrder::TfsaFirst => 0u8.hash(&mut hasher),
        DepletionOrder::RaFirst => 1u8.hash(&mut hasher),
    }
    match &inputs.tax_regime {
        TaxRegime::Flat { rate } => {
            0u8.hash(&mut hasher);
            rate.to_bits().hash(&mut hasher);
        }
        TaxRegime::Progressive(table) => {
            1u8.hash(&mut hasher);
            for bracket in &table.brackets {
                bracket.upper_limit.to_bits().hash(&mut hasher);
                bracket.base_tax.to_bits().hash(&mut hasher);
                bracket.marginal_rate.to_bits().hash(&mut hasher);
            }
            table.rebates.primary.to_bits().hash(&mut hasher);
            table.rebates.secondary.to_bits().hash(&mut hasher);
            table.rebates.tertiary.to_bits().hash(&mut hasher);
        }
    }
    inputs.reinvest_tax_saving.hash(&mut hasher);
    inputs.index_tax_brackets.hash(&mut hasher);
    hasher.finish()
}
