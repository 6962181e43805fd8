use serde::{Deserialize, Serialize};

use super::error::SimulationError;
use super::ownership::{BeneficiaryClause, EvaluationMethod, Ownership, Valuation};
use super::tax::FiscalModel;
use super::types::Year;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetCategory {
    RealEstate,
    Scpi,
    PeriodicInvestment,
    FreeInvestment,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiabilityCategory {
    Loan,
    Debt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidatedValue {
    pub revenue: f64,
    pub taxable_interests: f64,
    pub social_taxes: f64,
    pub net_revenue: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyRevenue {
    pub revenue: f64,
    pub taxable_irpp: f64,
    pub social_taxes: f64,
}

fn compound(value: f64, rate: f64, years: i32) -> f64 {
    value * (1.0 + rate).powi(years.max(0))
}

fn held_during(buying_year: Year, selling_year: Option<Year>, year: Year) -> bool {
    year >= buying_year && selling_year.is_none_or(|s| year <= s)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub from: Year,
    pub to: Year,
    pub yearly_rent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealEstate {
    pub buying_year: Year,
    pub buying_price: f64,
    #[serde(default)]
    pub appreciation_rate: f64,
    #[serde(default)]
    pub selling_year: Option<Year>,
    #[serde(default)]
    pub is_main_residence: bool,
    #[serde(default)]
    pub yearly_local_taxes: f64,
    #[serde(default)]
    pub rental: Option<Rental>,
}

impl RealEstate {
    fn price(&self, year: Year) -> f64 {
        compound(self.buying_price, self.appreciation_rate, year - self.buying_year)
    }

    pub fn value(&self, year: Year) -> f64 {
        let sold = self.selling_year.is_some_and(|s| year >= s);
        if year < self.buying_year || sold {
            0.0
        } else {
            self.price(year)
        }
    }

    pub fn yearly_rent(&self, year: Year, fiscal: &FiscalModel) -> YearlyRevenue {
        let Some(rental) = &self.rental else {
            return YearlyRevenue::default();
        };
        if !held_during(self.buying_year, self.selling_year, year)
            || !(rental.from..=rental.to).contains(&year)
        {
            return YearlyRevenue::default();
        }
        let taxable = rental.yearly_rent * (1.0 - fiscal.rental_allowance);
        YearlyRevenue {
            revenue: rental.yearly_rent,
            taxable_irpp: taxable,
            social_taxes: fiscal.social_levies(taxable),
        }
    }

    pub fn yearly_local_taxes(&self, year: Year) -> f64 {
        if held_during(self.buying_year, self.selling_year, year) {
            self.yearly_local_taxes
        } else {
            0.0
        }
    }

    pub fn liquidated_value(&self, year: Year, fiscal: &FiscalModel) -> Option<LiquidatedValue> {
        if self.selling_year != Some(year) || year < self.buying_year {
            return None;
        }
        let price = self.price(year);
        let gain = (price - self.buying_price).max(0.0);
        if self.is_main_residence {
            return Some(LiquidatedValue {
                revenue: price,
                taxable_interests: 0.0,
                social_taxes: 0.0,
                net_revenue: price,
            });
        }
        let social_taxes = fiscal.social_levies(gain);
        let capital_gain_tax = gain * fiscal.real_estate_capital_gain_rate;
        Some(LiquidatedValue {
            revenue: price,
            taxable_interests: gain,
            social_taxes,
            net_revenue: price - social_taxes - capital_gain_tax,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scpi {
    pub buying_year: Year,
    pub buying_price: f64,
    pub dividend_rate: f64,
    #[serde(default)]
    pub appreciation_rate: f64,
    #[serde(default)]
    pub selling_year: Option<Year>,
    #[serde(default)]
    pub held_by_sci: bool,
}

impl Scpi {
    fn price(&self, year: Year) -> f64 {
        compound(self.buying_price, self.appreciation_rate, year - self.buying_year)
    }

    pub fn value(&self, year: Year) -> f64 {
        let sold = self.selling_year.is_some_and(|s| year >= s);
        if year < self.buying_year || sold {
            0.0
        } else {
            self.price(year)
        }
    }

    pub fn yearly_revenue(&self, year: Year, fiscal: &FiscalModel) -> YearlyRevenue {
        if !held_during(self.buying_year, self.selling_year, year) {
            return YearlyRevenue::default();
        }
        let dividends = self.price(year) * self.dividend_rate;
        let social_taxes = if self.held_by_sci {
            0.0
        } else {
            fiscal.social_levies(dividends)
        };
        YearlyRevenue {
            revenue: dividends,
            taxable_irpp: dividends,
            social_taxes,
        }
    }

    pub fn liquidated_value(&self, year: Year, fiscal: &FiscalModel) -> Option<LiquidatedValue> {
        if self.selling_year != Some(year) || year < self.buying_year {
            return None;
        }
        let price = self.price(year);
        let gain = (price - self.buying_price).max(0.0);
        if self.held_by_sci {
            // the holding company pays corporate tax on the gain instead
            return Some(LiquidatedValue {
                revenue: price,
                taxable_interests: gain,
                social_taxes: 0.0,
                net_revenue: price,
            });
        }
        let social_taxes = fiscal.social_levies(gain);
        let capital_gain_tax = gain * fiscal.real_estate_capital_gain_rate;
        Some(LiquidatedValue {
            revenue: price,
            taxable_interests: gain,
            social_taxes,
            net_revenue: price - social_taxes - capital_gain_tax,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicInvestment {
    pub first_year: Year,
    pub last_contribution_year: Year,
    pub yearly_payment: f64,
    pub interest_rate: f64,
    /// Value at the end of the year before `first_year`.
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default)]
    pub initial_interests: f64,
    #[serde(default)]
    pub liquidation_year: Option<Year>,
}

impl PeriodicInvestment {
    pub fn contribution(&self, year: Year) -> f64 {
        let liquidated = self.liquidation_year.is_some_and(|l| year > l);
        if (self.first_year..=self.last_contribution_year).contains(&year) && !liquidated {
            self.yearly_payment
        } else {
            0.0
        }
    }

    fn accrued(&self, year: Year) -> (f64, f64) {
        let mut value = self.initial_value;
        let mut invested = self.initial_value - self.initial_interests;
        for y in self.first_year..=year {
            value = value * (1.0 + self.interest_rate) + self.contribution(y);
            invested += self.contribution(y);
        }
        (value, invested)
    }

    pub fn value(&self, year: Year) -> f64 {
        if self.liquidation_year.is_some_and(|l| year >= l) {
            return 0.0;
        }
        self.accrued(year).0
    }

    pub fn liquidated_value(&self, year: Year, fiscal: &FiscalModel) -> Option<LiquidatedValue> {
        if self.liquidation_year != Some(year) {
            return None;
        }
        let (value, invested) = self.accrued(year);
        let interests = (value - invested).max(0.0);
        let social_taxes = fiscal.social_levies(interests);
        Some(LiquidatedValue {
            revenue: value,
            taxable_interests: interests,
            social_taxes,
            net_revenue: value - social_taxes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InvestmentType {
    Pea,
    #[serde(rename_all = "camelCase")]
    LifeInsurance {
        /// Social levies are taken every year on interests rather than at withdrawal.
        #[serde(default)]
        periodic_social_taxes: bool,
        #[serde(default)]
        clause: BeneficiaryClause,
    },
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentState {
    pub year: Year,
    pub value: f64,
    pub interests: f64,
    /// Value at the end of `year - 1`.
    pub previous_value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub revenue: f64,
    pub gross: f64,
    pub interests: f64,
    pub social_taxes: f64,
    pub social_taxes_withheld: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeInvestment {
    pub investment_type: InvestmentType,
    pub interest_rate: f64,
    /// Value at the end of the year before the simulation starts.
    pub initial_value: f64,
    #[serde(default)]
    pub initial_interests: f64,
    #[serde(skip)]
    pub state: InvestmentState,
}

impl FreeInvestment {
    pub fn new(investment_type: InvestmentType, interest_rate: f64, initial_value: f64) -> Self {
        Self {
            investment_type,
            interest_rate,
            initial_value,
            initial_interests: 0.0,
            state: InvestmentState::default(),
        }
    }

    pub fn reset(&mut self, first_year: Year) {
        self.state = InvestmentState {
            year: first_year - 1,
            value: self.initial_value,
            interests: self.initial_interests,
            previous_value: self.initial_value,
        };
    }

    pub fn is_life_insurance(&self) -> bool {
        matches!(self.investment_type, InvestmentType::LifeInsurance { .. })
    }

    pub fn clause(&self) -> Option<&BeneficiaryClause> {
        match &self.investment_type {
            InvestmentType::LifeInsurance { clause, .. } => Some(clause),
            _ => None,
        }
    }

    fn has_periodic_social_taxes(&self) -> bool {
        matches!(
            self.investment_type,
            InvestmentType::LifeInsurance {
                periodic_social_taxes: true,
                ..
            }
        )
    }

    fn net_rate(&self, social_rate: f64) -> f64 {
        if self.has_periodic_social_taxes() {
            self.interest_rate * (1.0 - social_rate)
        } else {
            self.interest_rate
        }
    }

    pub fn value(&self, year: Year) -> f64 {
        if year == self.state.year {
            self.state.value
        } else if year < self.state.year {
            self.state.previous_value
        } else {
            compound(self.state.value, self.interest_rate, year - self.state.year)
        }
    }

    /// Compounds the balance up to the end of `year`; returns the interests credited.
    pub fn capitalize(&mut self, year: Year, social_rate: f64) -> f64 {
        let rate = self.net_rate(social_rate);
        let mut credited = 0.0;
        while self.state.year < year {
            let gain = self.state.value * rate;
            self.state.previous_value = self.state.value;
            self.state.value += gain;
            self.state.interests += gain;
            self.state.year += 1;
            credited += gain;
        }
        credited
    }

    pub fn deposit(&mut self, amount: f64) {
        self.state.value += amount;
    }

    /// Takes out enough to deliver `net_amount` once social levies are paid, or
    /// everything if the balance is short.
    pub fn remove(&mut self, net_amount: f64, social_rate: f64) -> Removal {
        let value = self.state.value;
        if net_amount <= 0.0 || value <= 0.0 {
            return Removal::default();
        }
        let interest_ratio = (self.state.interests / value).clamp(0.0, 1.0);
        let (withheld, levy_ratio) = match self.investment_type {
            InvestmentType::LifeInsurance {
                periodic_social_taxes: true,
                ..
            } => (true, 0.0),
            InvestmentType::Pea | InvestmentType::LifeInsurance { .. } => {
                (true, interest_ratio * social_rate)
            }
            InvestmentType::Other => (false, interest_ratio * social_rate),
        };

        // levies not withheld are paid separately, so the gross still covers them
        let gross = (net_amount / (1.0 - levy_ratio)).min(value);
        let social_taxes = gross * levy_ratio;
        let interests = gross * interest_ratio;
        self.state.value -= gross;
        self.state.interests = (self.state.interests - interests).max(0.0);

        Removal {
            revenue: if withheld { gross - social_taxes } else { gross },
            gross,
            interests,
            social_taxes,
            social_taxes_withheld: withheld,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum AssetKind {
    RealEstate(RealEstate),
    Scpi(Scpi),
    PeriodicInvestment(PeriodicInvestment),
    FreeInvestment(FreeInvestment),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub name: String,
    pub ownership: Ownership,
    pub kind: AssetKind,
}

impl Asset {
    pub fn category(&self) -> AssetCategory {
        match self.kind {
            AssetKind::RealEstate(_) => AssetCategory::RealEstate,
            AssetKind::Scpi(_) => AssetCategory::Scpi,
            AssetKind::PeriodicInvestment(_) => AssetCategory::PeriodicInvestment,
            AssetKind::FreeInvestment(_) => AssetCategory::FreeInvestment,
        }
    }

    pub fn value(&self, year: Year) -> f64 {
        match &self.kind {
            AssetKind::RealEstate(r) => r.value(year),
            AssetKind::Scpi(s) => s.value(year),
            AssetKind::PeriodicInvestment(p) => p.value(year),
            AssetKind::FreeInvestment(f) => f.value(year),
        }
    }

    pub fn owned_value(
        &self,
        name: &str,
        year: Year,
        method: EvaluationMethod,
        valuation: &Valuation<'_>,
    ) -> Result<f64, SimulationError> {
        self.ownership
            .owned_value(name, self.value(year), method, valuation)
    }

    pub fn is_life_insurance(&self) -> bool {
        matches!(&self.kind, AssetKind::FreeInvestment(f) if f.is_life_insurance())
    }

    pub fn free_investment(&self) -> Option<&FreeInvestment> {
        match &self.kind {
            AssetKind::FreeInvestment(f) => Some(f),
            _ => None,
        }
    }

    pub fn free_investment_mut(&mut self) -> Option<&mut FreeInvestment> {
        match &mut self.kind {
            AssetKind::FreeInvestment(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub first_year: Year,
    pub last_year: Year,
    pub principal: f64,
    pub interest_rate: f64,
}

impl Loan {
    fn nb_of_payments(&self) -> i32 {
        (self.last_year - self.first_year + 1).max(1)
    }

    pub fn yearly_payment(&self) -> f64 {
        let n = self.nb_of_payments();
        let r = self.interest_rate;
        if r.abs() < 1e-12 {
            self.principal / n as f64
        } else {
            self.principal * r / (1.0 - (1.0 + r).powi(-n))
        }
    }

    pub fn payment(&self, year: Year) -> f64 {
        if (self.first_year..=self.last_year).contains(&year) {
            self.yearly_payment()
        } else {
            0.0
        }
    }

    /// Outstanding principal at the end of `year`.
    pub fn value(&self, year: Year) -> f64 {
        if year < self.first_year || year >= self.last_year {
            return 0.0;
        }
        let k = year - self.first_year + 1;
        let r = self.interest_rate;
        let pmt = self.yearly_payment();
        if r.abs() < 1e-12 {
            return (self.principal - pmt * k as f64).max(0.0);
        }
        let growth = (1.0 + r).powi(k);
        (self.principal * growth - pmt * (growth - 1.0) / r).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debt {
    pub amount: f64,
    #[serde(default)]
    pub repayment_year: Option<Year>,
}

impl Debt {
    pub fn payment(&self, year: Year) -> f64 {
        if self.repayment_year == Some(year) {
            self.amount
        } else {
            0.0
        }
    }

    pub fn value(&self, year: Year) -> f64 {
        if self.repayment_year.is_some_and(|r| year >= r) {
            0.0
        } else {
            self.amount
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum LiabilityKind {
    Loan(Loan),
    Debt(Debt),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liability {
    pub name: String,
    pub ownership: Ownership,
    pub kind: LiabilityKind,
}

impl Liability {
    pub fn category(&self) -> LiabilityCategory {
        match self.kind {
            LiabilityKind::Loan(_) => LiabilityCategory::Loan,
            LiabilityKind::Debt(_) => LiabilityCategory::Debt,
        }
    }

    pub fn value(&self, year: Year) -> f64 {
        match &self.kind {
            LiabilityKind::Loan(l) => l.value(year),
            LiabilityKind::Debt(d) => d.value(year),
        }
    }

    pub fn payment(&self, year: Year) -> f64 {
        match &self.kind {
            LiabilityKind::Loan(l) => l.payment(year),
            LiabilityKind::Debt(d) => d.payment(year),
        }
    }

    pub fn owned_value(
        &self,
        name: &str,
        year: Year,
        method: EvaluationMethod,
        valuation: &Valuation<'_>,
    ) -> Result<f64, SimulationError> {
        self.ownership
            .owned_value(name, self.value(year), method, valuation)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patrimony {
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub liabilities: Vec<Liability>,
}

impl Patrimony {
    pub fn reset(&mut self, first_year: Year) {
        for asset in &mut self.assets {
            if let Some(investment) = asset.free_investment_mut() {
                investment.reset(first_year);
            }
        }
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for name in self
            .assets
            .iter()
            .map(|a| &a.name)
            .chain(self.liabilities.iter().map(|l| &l.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(format!("duplicate asset or liability name '{name}'"));
            }
        }
        for asset in &self.assets {
            asset
                .ownership
                .validate()
                .map_err(|e| format!("asset '{}': {e}", asset.name))?;
            if let Some(clause) = asset.free_investment().and_then(FreeInvestment::clause) {
                clause
                    .validate()
                    .map_err(|e| format!("asset '{}': {e}", asset.name))?;
            }
        }
        for liability in &self.liabilities {
            liability
                .ownership
                .validate()
                .map_err(|e| format!("liability '{}': {e}", liability.name))?;
            if let LiabilityKind::Loan(loan) = &liability.kind {
                if loan.last_year < loan.first_year {
                    return Err(format!(
                        "liability '{}': last year precedes first year",
                        liability.name
                    ));
                }
            }
        }
        Ok(())
    }
}
