use serde::{Deserialize, Serialize};

use super::error::TaxError;

/// Lower bound of a bracket and the rate applying above it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxBracket {
    pub floor: f64,
    pub rate: f64,
}

const fn bracket(floor: f64, rate: f64) -> TaxBracket {
    TaxBracket { floor, rate }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeTaxGrid {
    pub brackets: Vec<TaxBracket>,
    /// Largest tax saving granted per child half-share of family quotient.
    pub child_relief_cap_per_half_share: f64,
    pub fiscal_child_age_limit: u32,
}

impl Default for IncomeTaxGrid {
    fn default() -> Self {
        Self {
            brackets: vec![
                bracket(0.0, 0.0),
                bracket(11_294.0, 0.11),
                bracket(28_797.0, 0.30),
                bracket(82_341.0, 0.41),
                bracket(177_106.0, 0.45),
            ],
            child_relief_cap_per_half_share: 1_759.0,
            fiscal_child_age_limit: 21,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WealthTaxGrid {
    pub brackets: Vec<TaxBracket>,
    /// No tax is due below this taxable value.
    pub entry_threshold: f64,
    /// Upper bound of the decote zone.
    pub decote_ceiling: f64,
    pub decote_base: f64,
    pub decote_rate: f64,
    pub main_residence_allowance: f64,
}

impl Default for WealthTaxGrid {
    fn default() -> Self {
        Self {
            brackets: vec![
                bracket(0.0, 0.0),
                bracket(800_000.0, 0.005),
                bracket(1_300_000.0, 0.007),
                bracket(2_570_000.0, 0.01),
                bracket(5_000_000.0, 0.0125),
                bracket(10_000_000.0, 0.015),
            ],
            entry_threshold: 1_300_000.0,
            decote_ceiling: 1_400_000.0,
            decote_base: 17_500.0,
            decote_rate: 0.0125,
            main_residence_allowance: 0.30,
        }
    }
}

/// Allowance deducted from each share before a progressive schedule applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceSchedule {
    pub allowance: f64,
    pub brackets: Vec<TaxBracket>,
}

impl InheritanceSchedule {
    pub fn direct_line() -> Self {
        Self {
            allowance: 100_000.0,
            brackets: vec![
                bracket(0.0, 0.05),
                bracket(8_072.0, 0.10),
                bracket(12_109.0, 0.15),
                bracket(15_932.0, 0.20),
                bracket(552_324.0, 0.30),
                bracket(902_838.0, 0.40),
                bracket(1_805_677.0, 0.45),
            ],
        }
    }

    pub fn life_insurance() -> Self {
        Self {
            allowance: 152_500.0,
            brackets: vec![bracket(0.0, 0.20), bracket(700_000.0, 0.3125)],
        }
    }
}

/// Usufruct value as a fraction of full ownership, by age of the usufructuary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemembermentTable {
    /// `(max_age_exclusive, usufruct_fraction)` in increasing age order.
    pub steps: Vec<(u32, f64)>,
    pub last_fraction: f64,
}

impl Default for DemembermentTable {
    fn default() -> Self {
        Self {
            steps: vec![
                (21, 0.9),
                (31, 0.8),
                (41, 0.7),
                (51, 0.6),
                (61, 0.5),
                (71, 0.4),
                (81, 0.3),
                (91, 0.2),
            ],
            last_fraction: 0.1,
        }
    }
}

impl DemembermentTable {
    pub fn usufruct_fraction(&self, age: u32) -> f64 {
        self.steps
            .iter()
            .find(|(limit, _)| age < *limit)
            .map(|(_, fraction)| *fraction)
            .unwrap_or(self.last_fraction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FiscalModel {
    pub income_tax: IncomeTaxGrid,
    pub wealth_tax: WealthTaxGrid,
    pub corporate_tax: Vec<TaxBracket>,
    pub social_levies_rate: f64,
    /// Share of gross rent that is not taxable.
    pub rental_allowance: f64,
    pub real_estate_capital_gain_rate: f64,
    pub direct_line_inheritance: InheritanceSchedule,
    pub life_insurance_inheritance: InheritanceSchedule,
    /// Yearly per-person allowance on life-insurance gains.
    pub life_insurance_rebate: f64,
    pub demembrement: DemembermentTable,
}

impl Default for FiscalModel {
    fn default() -> Self {
        Self {
            income_tax: IncomeTaxGrid::default(),
            wealth_tax: WealthTaxGrid::default(),
            corporate_tax: vec![bracket(0.0, 0.15), bracket(42_500.0, 0.25)],
            social_levies_rate: 0.172,
            rental_allowance: 0.30,
            real_estate_capital_gain_rate: 0.19,
            direct_line_inheritance: InheritanceSchedule::direct_line(),
            life_insurance_inheritance: InheritanceSchedule::life_insurance(),
            life_insurance_rebate: 4_600.0,
            demembrement: DemembermentTable::default(),
        }
    }
}

impl FiscalModel {
    pub fn validate(&self) -> Result<(), TaxError> {
        validate_brackets("income tax", &self.income_tax.brackets)?;
        validate_brackets("wealth tax", &self.wealth_tax.brackets)?;
        validate_brackets("corporate tax", &self.corporate_tax)?;
        validate_brackets("inheritance", &self.direct_line_inheritance.brackets)?;
        validate_brackets(
            "life insurance inheritance",
            &self.life_insurance_inheritance.brackets,
        )?;
        if !(0.0..=1.0).contains(&self.social_levies_rate) {
            return Err(TaxError::InvalidSchedule(
                "social levies rate must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rental_allowance) {
            return Err(TaxError::InvalidSchedule(
                "rental allowance must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn social_levies(&self, gain: f64) -> f64 {
        // a loss yields no levy
        gain.max(0.0) * self.social_levies_rate
    }
}

fn validate_brackets(label: &str, brackets: &[TaxBracket]) -> Result<(), TaxError> {
    if brackets.is_empty() {
        return Err(TaxError::InvalidSchedule(format!("{label}: no bracket")));
    }
    if brackets[0].floor != 0.0 {
        return Err(TaxError::InvalidSchedule(format!(
            "{label}: first bracket must start at 0"
        )));
    }
    for pair in brackets.windows(2) {
        if pair[1].floor <= pair[0].floor {
            return Err(TaxError::InvalidSchedule(format!(
                "{label}: bracket floors must increase"
            )));
        }
    }
    if brackets.iter().any(|b| !(0.0..=1.0).contains(&b.rate)) {
        return Err(TaxError::InvalidSchedule(format!(
            "{label}: rates must be between 0 and 1"
        )));
    }
    Ok(())
}

fn check_amount(amount: f64) -> Result<f64, TaxError> {
    if !amount.is_finite() {
        return Err(TaxError::NonFinite);
    }
    if amount < 0.0 {
        return Err(TaxError::NegativeAmount(amount));
    }
    Ok(amount)
}

fn bracket_slices(amount: f64, brackets: &[TaxBracket]) -> Vec<f64> {
    brackets
        .iter()
        .enumerate()
        .map(|(idx, b)| {
            let ceiling = brackets.get(idx + 1).map(|next| next.floor);
            let upper = ceiling.map_or(amount, |c| amount.min(c));
            (upper - b.floor).max(0.0)
        })
        .collect()
}

pub fn progressive_tax(amount: f64, brackets: &[TaxBracket]) -> f64 {
    bracket_slices(amount, brackets)
        .iter()
        .zip(brackets)
        .map(|(slice, b)| slice * b.rate)
        .sum()
}

fn marginal_rate(amount: f64, brackets: &[TaxBracket]) -> f64 {
    brackets
        .iter()
        .rev()
        .find(|b| amount > b.floor)
        .map(|b| b.rate)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketBreakdown {
    pub floor: f64,
    pub rate: f64,
    pub statutory: f64,
    pub with_children: f64,
    pub without_children: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTax {
    pub amount: f64,
    pub marginal_rate: f64,
    pub average_rate: f64,
    pub family_quotient: f64,
    pub bracket_breakdown: Vec<BracketBreakdown>,
}

/// Family quotient: one share per adult, half a share for each of the first two
/// children and a full share from the third on.
pub fn family_quotient(nb_adults: usize, nb_children: usize) -> f64 {
    let adults = nb_adults.clamp(1, 2) as f64;
    let first_two = nb_children.min(2) as f64 * 0.5;
    let others = nb_children.saturating_sub(2) as f64;
    adults + first_two + others
}

pub fn income_tax(
    taxable_income: f64,
    nb_adults: usize,
    nb_children: usize,
    grid: &IncomeTaxGrid,
) -> Result<IncomeTax, TaxError> {
    let income = check_amount(taxable_income)?;
    let brackets = &grid.brackets;

    let quotient_with = family_quotient(nb_adults, nb_children);
    let quotient_without = family_quotient(nb_adults, 0);

    let tax_with = progressive_tax(income / quotient_with, brackets) * quotient_with;
    let tax_without = progressive_tax(income / quotient_without, brackets) * quotient_without;

    let child_half_shares = (quotient_with - quotient_without) * 2.0;
    let relief_cap = child_half_shares * grid.child_relief_cap_per_half_share;
    let capped = tax_without - relief_cap;

    let (amount, family_quotient, applied_quotient) = if capped > tax_with {
        (capped, quotient_with, quotient_without)
    } else {
        (tax_with, quotient_with, quotient_with)
    };

    let statutory = bracket_slices(income, brackets);
    let with_children = bracket_slices(income / quotient_with, brackets);
    let without_children = bracket_slices(income / quotient_without, brackets);
    let bracket_breakdown = brackets
        .iter()
        .enumerate()
        .map(|(idx, b)| BracketBreakdown {
            floor: b.floor,
            rate: b.rate,
            statutory: statutory[idx] * b.rate,
            with_children: with_children[idx] * b.rate * quotient_with,
            without_children: without_children[idx] * b.rate * quotient_without,
        })
        .collect();

    let amount = amount.max(0.0);
    Ok(IncomeTax {
        amount,
        marginal_rate: marginal_rate(income / applied_quotient, brackets),
        average_rate: if income > 0.0 { amount / income } else { 0.0 },
        family_quotient,
        bracket_breakdown,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WealthTax {
    pub amount: f64,
    pub taxable: f64,
}

pub fn wealth_tax(taxable_real_estate: f64, grid: &WealthTaxGrid) -> Result<WealthTax, TaxError> {
    let taxable = check_amount(taxable_real_estate)?;
    if taxable < grid.entry_threshold {
        return Ok(WealthTax {
            amount: 0.0,
            taxable,
        });
    }
    let mut amount = progressive_tax(taxable, &grid.brackets);
    if taxable < grid.decote_ceiling {
        amount -= grid.decote_base - grid.decote_rate * taxable;
    }
    Ok(WealthTax {
        amount: amount.max(0.0),
        taxable,
    })
}

/// Corporate tax on the SCI profit; losses pay nothing.
pub fn corporate_tax(profit: f64, brackets: &[TaxBracket]) -> Result<f64, TaxError> {
    if !profit.is_finite() {
        return Err(TaxError::NonFinite);
    }
    Ok(progressive_tax(profit.max(0.0), brackets))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceTax {
    pub net_amount: f64,
    pub tax: f64,
}

impl InheritanceSchedule {
    pub fn tax(&self, gross_share: f64) -> Result<InheritanceTax, TaxError> {
        let gross = check_amount(gross_share)?;
        let taxable = (gross - self.allowance).max(0.0);
        let tax = progressive_tax(taxable, &self.brackets);
        Ok(InheritanceTax {
            net_amount: gross - tax,
            tax,
        })
    }
}

/// The surviving spouse inherits tax free.
pub fn heritage_to_spouse(gross_share: f64) -> Result<InheritanceTax, TaxError> {
    let gross = check_amount(gross_share)?;
    Ok(InheritanceTax {
        net_amount: gross,
        tax: 0.0,
    })
}

pub fn heritage_of_child(
    gross_share: f64,
    schedule: &InheritanceSchedule,
) -> Result<InheritanceTax, TaxError> {
    schedule.tax(gross_share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn toy_grid() -> IncomeTaxGrid {
        IncomeTaxGrid {
            brackets: vec![bracket(0.0, 0.0), bracket(10_000.0, 0.20)],
            child_relief_cap_per_half_share: 1_000.0,
            fiscal_child_age_limit: 21,
        }
    }

    #[test]
    fn single_adult_toy_schedule() {
        let tax = income_tax(40_000.0, 1, 0, &toy_grid()).expect("valid income");
        assert_approx(tax.amount, 6_000.0);
        assert_approx(tax.marginal_rate, 0.20);
        assert_approx(tax.average_rate, 0.15);
        assert_approx(tax.family_quotient, 1.0);
        assert_eq!(tax.bracket_breakdown.len(), 2);
        assert_approx(tax.bracket_breakdown[1].statutory, 6_000.0);
    }

    #[test]
    fn couple_splits_income_over_two_shares() {
        // 2 shares: 2 * (20_000 - 10_000) * 0.2 = 4_000
        let tax = income_tax(40_000.0, 2, 0, &toy_grid()).expect("valid income");
        assert_approx(tax.amount, 4_000.0);
        assert_approx(tax.family_quotient, 2.0);
    }

    #[test]
    fn child_relief_is_capped() {
        // Uncapped with 2 children (3 shares): 3 * (40_000 - 10_000) * 0.2 = 18_000.
        // Without children (2 shares): 2 * (60_000 - 10_000) * 0.2 = 20_000.
        // Saving 2_000 exceeds the cap of 2 half-shares * 500 = 1_000 -> 19_000.
        let mut grid = toy_grid();
        grid.child_relief_cap_per_half_share = 500.0;
        let tax = income_tax(120_000.0, 2, 2, &grid).expect("valid income");
        assert_approx(tax.amount, 19_000.0);
        assert_approx(tax.family_quotient, 3.0);

        grid.child_relief_cap_per_half_share = 5_000.0;
        let tax = income_tax(120_000.0, 2, 2, &grid).expect("valid income");
        assert_approx(tax.amount, 18_000.0);
    }

    #[test]
    fn family_quotient_steps() {
        assert_approx(family_quotient(1, 0), 1.0);
        assert_approx(family_quotient(2, 1), 2.5);
        assert_approx(family_quotient(2, 2), 3.0);
        assert_approx(family_quotient(2, 3), 4.0);
        assert_approx(family_quotient(0, 0), 1.0);
    }

    #[test]
    fn negative_income_is_a_domain_error() {
        let err = income_tax(-1.0, 1, 0, &toy_grid()).expect_err("must reject");
        assert_eq!(err, TaxError::NegativeAmount(-1.0));
    }

    #[test]
    fn wealth_tax_below_threshold_is_zero() {
        let tax = wealth_tax(1_000_000.0, &WealthTaxGrid::default()).expect("valid");
        assert_approx(tax.amount, 0.0);
        assert_approx(tax.taxable, 1_000_000.0);
    }

    #[test]
    fn wealth_tax_applies_decote_then_brackets() {
        let grid = WealthTaxGrid::default();
        // 1_350_000: 500_000 * 0.5% + 50_000 * 0.7% = 2_850; decote 17_500 - 16_875 = 625
        let tax = wealth_tax(1_350_000.0, &grid).expect("valid");
        assert_approx(tax.amount, 2_225.0);
        // 2_000_000: 2_500 + 700_000 * 0.7% = 7_400, no decote
        let tax = wealth_tax(2_000_000.0, &grid).expect("valid");
        assert_approx(tax.amount, 7_400.0);
    }

    #[test]
    fn corporate_tax_two_rates() {
        let brackets = FiscalModel::default().corporate_tax;
        assert_approx(corporate_tax(100_000.0, &brackets).expect("valid"), 20_750.0);
        assert_approx(corporate_tax(-5_000.0, &brackets).expect("valid"), 0.0);
    }

    #[test]
    fn losses_carry_no_levy() {
        let fiscal = FiscalModel::default();
        assert_approx(fiscal.social_levies(-1_000.0), 0.0);
        assert_approx(fiscal.social_levies(1_000.0), 172.0);
    }

    #[test]
    fn spouse_schedule_rejects_negative_share_like_children() {
        assert_eq!(
            heritage_to_spouse(-1.0).expect_err("negative share"),
            TaxError::NegativeAmount(-1.0)
        );
        assert_eq!(
            heritage_of_child(-1.0, &InheritanceSchedule::direct_line()).expect_err("negative share"),
            TaxError::NegativeAmount(-1.0)
        );
        let spouse = heritage_to_spouse(250_000.0).expect("valid");
        assert_approx(spouse.tax, 0.0);
        assert_approx(spouse.net_amount, 250_000.0);
    }

    #[test]
    fn child_inheritance_uses_allowance_then_brackets() {
        let schedule = InheritanceSchedule::direct_line();
        let under = heritage_of_child(90_000.0, &schedule).expect("valid");
        assert_approx(under.tax, 0.0);
        assert_approx(under.net_amount, 90_000.0);

        // 20_000 above allowance: 8_072*5% + 4_037*10% + 3_823*15% + 4_068*20%
        let over = heritage_of_child(120_000.0, &schedule).expect("valid");
        let expected = 8_072.0 * 0.05 + 4_037.0 * 0.10 + 3_823.0 * 0.15 + 4_068.0 * 0.20;
        assert_approx(over.tax, expected);
        assert_approx(over.net_amount, 120_000.0 - expected);
    }

    #[test]
    fn child_inheritance_rejects_negative_share() {
        let err = heritage_of_child(-10.0, &InheritanceSchedule::direct_line())
            .expect_err("must reject");
        assert_eq!(err, TaxError::NegativeAmount(-10.0));
    }

    #[test]
    fn spouse_inherits_tax_free() {
        let spouse = heritage_to_spouse(500_000.0).expect("valid");
        assert_approx(spouse.tax, 0.0);
        assert_approx(spouse.net_amount, 500_000.0);
    }

    #[test]
    fn life_insurance_beneficiary_schedule() {
        let schedule = InheritanceSchedule::life_insurance();
        let taxed = schedule.tax(252_500.0).expect("valid");
        assert_approx(taxed.tax, 20_000.0);
    }

    #[test]
    fn usufruct_fraction_by_age() {
        let table = DemembermentTable::default();
        assert_approx(table.usufruct_fraction(20), 0.9);
        assert_approx(table.usufruct_fraction(21), 0.8);
        assert_approx(table.usufruct_fraction(65), 0.4);
        assert_approx(table.usufruct_fraction(95), 0.1);
    }

    #[test]
    fn default_fiscal_model_is_valid() {
        FiscalModel::default().validate().expect("defaults must validate");
    }

    proptest! {
        #[test]
        fn prop_income_tax_is_monotonic_and_below_income(
            income in 0u32..2_000_000,
            extra in 1u32..100_000,
            adults in 1usize..3,
            children in 0usize..5
        ) {
            let grid = IncomeTaxGrid::default();
            let low = income_tax(income as f64, adults, children, &grid).expect("valid");
            let high = income_tax((income + extra) as f64, adults, children, &grid).expect("valid");
            prop_assert!(high.amount + 1e-6 >= low.amount);
            prop_assert!(low.amount <= income as f64);
        }
    }
}
