use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::assets::{AssetCategory, AssetKind, LiabilityCategory, Patrimony};
use super::error::SimulationError;
use super::ledger::{NamedValueTable, ValuedLedger};
use super::net_cash_flow::{NetCashFlowAction, NetCashFlowManager};
use super::ownership::{EvaluationMethod, Valuation};
use super::succession::{OwnershipTransfer, Succession, SuccessionEngine, SpouseOption};
use super::tax::{FiscalModel, IncomeTax, corporate_tax, income_tax, wealth_tax};
use super::types::{Household, IncomeKind, Year};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevenueCategory {
    WorkIncome,
    Pension,
    LayoffCompensation,
    UnemploymentAllocation,
    Rents,
    ScpiDividends,
    RealEstateSales,
    ScpiSales,
    PeriodicInvestmentLiquidations,
    /// Interests realized last year to cover a deficit, taxed this year.
    CarriedInterests,
}

impl From<IncomeKind> for RevenueCategory {
    fn from(kind: IncomeKind) -> Self {
        match kind {
            IncomeKind::WorkIncome => RevenueCategory::WorkIncome,
            IncomeKind::Pension => RevenueCategory::Pension,
            IncomeKind::LayoffCompensation => RevenueCategory::LayoffCompensation,
            IncomeKind::UnemploymentAllocation => RevenueCategory::UnemploymentAllocation,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxCategory {
    Income,
    Wealth,
    Social,
    Local,
    Corporate,
    Succession,
    LifeInsuranceSuccession,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueLedger {
    pub credited: ValuedLedger<RevenueCategory>,
    pub taxable: ValuedLedger<RevenueCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SciCashFlow {
    pub revenues: NamedValueTable,
    pub taxable_profit: f64,
    pub corporate_tax: f64,
    pub net_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowYear {
    pub year: Year,
    pub ages: BTreeMap<String, u32>,
    pub revenues: RevenueLedger,
    pub taxes: ValuedLedger<TaxCategory>,
    pub income_tax: IncomeTax,
    pub expenses: NamedValueTable,
    pub debt_payments: NamedValueTable,
    pub investment_payments: NamedValueTable,
    pub sci_sub_account: SciCashFlow,
    pub carried_taxable_revenue_to_next_year: f64,
    pub successions: Vec<Succession>,
    pub life_insurance_successions: Vec<Succession>,
    pub ownership_transfers: Vec<OwnershipTransfer>,
    pub net_cash_flow_action: NetCashFlowAction,
    pub total_revenue: f64,
    pub total_expense: f64,
    pub net_cash_flow: f64,
}

impl CashFlowYear {
    fn revenue_total(&self) -> f64 {
        self.revenues.credited.total() + self.sci_sub_account.revenues.total()
    }

    fn expense_total(&self) -> f64 {
        self.taxes.total()
            + self.expenses.total()
            + self.debt_payments.total()
            + self.investment_payments.total()
    }

    fn settle_totals(&mut self) {
        self.total_revenue = self.revenue_total();
        self.total_expense = self.expense_total();
        self.net_cash_flow = self.total_revenue - self.total_expense;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheetYear {
    pub year: Year,
    pub assets: ValuedLedger<AssetCategory>,
    pub liabilities: ValuedLedger<LiabilityCategory>,
    pub total_assets: f64,
    pub total_liabilities: f64,
    pub net: f64,
}

impl BalanceSheetYear {
    fn snapshot(year: Year, patrimony: &Patrimony) -> Self {
        let mut assets = ValuedLedger::new();
        for asset in &patrimony.assets {
            assets.append(asset.category(), asset.name.clone(), asset.value(year));
        }
        let mut liabilities = ValuedLedger::new();
        for liability in &patrimony.liabilities {
            liabilities.append(
                liability.category(),
                liability.name.clone(),
                liability.value(year),
            );
        }
        let total_assets = assets.total();
        let total_liabilities = liabilities.total();
        Self {
            year,
            assets,
            liabilities,
            total_assets,
            total_liabilities,
            net: total_assets - total_liabilities,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub first_year: Year,
    pub last_year: Year,
    pub household: Household,
    #[serde(default)]
    pub patrimony: Patrimony,
    #[serde(default)]
    pub fiscal: FiscalModel,
    #[serde(default)]
    pub spouse_option: SpouseOption,
}

impl Scenario {
    pub fn validate(&self) -> Result<(), String> {
        if self.last_year < self.first_year {
            return Err("lastYear must be >= firstYear".to_string());
        }
        if self.household.members.is_empty() {
            return Err("the household needs at least one member".to_string());
        }
        let mut names = HashSet::new();
        for person in &self.household.members {
            if !names.insert(person.name.as_str()) {
                return Err(format!("duplicate household member '{}'", person.name));
            }
            if person.death_year < person.birth_year {
                return Err(format!("'{}' dies before being born", person.name));
            }
            if person.death_year < self.first_year {
                return Err(format!("'{}' dies before firstYear", person.name));
            }
        }
        self.patrimony.validate()?;

        let check_member = |item: &str, name: &str| {
            if names.contains(name) {
                Ok(())
            } else {
                Err(format!("'{item}' refers to '{name}' who is not a household member"))
            }
        };
        for asset in &self.patrimony.assets {
            for owner in asset.ownership.names() {
                check_member(&asset.name, owner)?;
            }
            if let Some(clause) = asset.free_investment().and_then(|f| f.clause()) {
                for recipient in clause.recipients() {
                    check_member(&asset.name, recipient)?;
                }
            }
        }
        for liability in &self.patrimony.liabilities {
            for owner in liability.ownership.names() {
                check_member(&liability.name, owner)?;
            }
        }
        self.fiscal.validate().map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Termination {
    Completed,
    CashExhausted { year: Year, missing: f64 },
    HouseholdExtinct { year: Year },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub first_year: Year,
    pub last_year: Option<Year>,
    pub initial_net_worth: f64,
    pub final_net_worth: f64,
    pub min_net_worth: f64,
    pub min_net_worth_year: Option<Year>,
    pub total_succession_taxes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub cash_flow: Vec<CashFlowYear>,
    pub balance_sheet: Vec<BalanceSheetYear>,
    pub successions: Vec<Succession>,
    pub life_insurance_successions: Vec<Succession>,
    pub outcome: Termination,
    pub kpis: Kpis,
}

pub fn run_simulation(scenario: &Scenario) -> Result<SimulationResult, SimulationError> {
    let mut patrimony = scenario.patrimony.clone();
    patrimony.reset(scenario.first_year);
    let opening = BalanceSheetYear::snapshot(scenario.first_year - 1, &patrimony);

    let simulator = YearSimulator {
        household: &scenario.household,
        fiscal: &scenario.fiscal,
        successions: SuccessionEngine::new(
            &scenario.household,
            &scenario.fiscal,
            scenario.spouse_option,
        ),
        cash: NetCashFlowManager::new(&scenario.household, &scenario.fiscal),
    };

    let mut cash_flow: Vec<CashFlowYear> = Vec::new();
    let mut balance_sheet = Vec::new();
    let mut carried_taxable = 0.0;
    let mut outcome = Termination::Completed;

    for year in scenario.first_year..=scenario.last_year {
        let line = match simulator.simulate_year(year, &mut patrimony, carried_taxable) {
            Ok(line) => line,
            Err(SimulationError::InsufficientCash { year, missing }) => {
                warn!(year, missing, "cash exhausted, simulation stopped");
                outcome = Termination::CashExhausted { year, missing };
                break;
            }
            Err(e) => return Err(e),
        };
        carried_taxable = line.carried_taxable_revenue_to_next_year;
        let sheet = BalanceSheetYear::snapshot(year, &patrimony);
        info!(
            year,
            revenue = line.total_revenue,
            expense = line.total_expense,
            net_cash_flow = line.net_cash_flow,
            net_worth = sheet.net,
            "year simulated"
        );
        cash_flow.push(line);
        balance_sheet.push(sheet);

        if !scenario.household.is_anyone_alive_at_end_of(year) {
            warn!(year, "no household member left, simulation stopped");
            outcome = Termination::HouseholdExtinct { year };
            break;
        }
    }

    let successions: Vec<Succession> = cash_flow
        .iter()
        .flat_map(|l| l.successions.iter().cloned())
        .collect();
    let life_insurance_successions: Vec<Succession> = cash_flow
        .iter()
        .flat_map(|l| l.life_insurance_successions.iter().cloned())
        .collect();
    let kpis = compute_kpis(
        scenario.first_year,
        &opening,
        &balance_sheet,
        &successions,
        &life_insurance_successions,
    );

    Ok(SimulationResult {
        cash_flow,
        balance_sheet,
        successions,
        life_insurance_successions,
        outcome,
        kpis,
    })
}

fn compute_kpis(
    first_year: Year,
    opening: &BalanceSheetYear,
    balance_sheet: &[BalanceSheetYear],
    successions: &[Succession],
    life_insurance_successions: &[Succession],
) -> Kpis {
    let min = balance_sheet
        .iter()
        .min_by(|a, b| a.net.total_cmp(&b.net));
    Kpis {
        first_year,
        last_year: balance_sheet.last().map(|s| s.year),
        initial_net_worth: opening.net,
        final_net_worth: balance_sheet.last().map_or(opening.net, |s| s.net),
        min_net_worth: min.map_or(opening.net, |s| s.net),
        min_net_worth_year: min.map(|s| s.year),
        total_succession_taxes: successions
            .iter()
            .chain(life_insurance_successions)
            .map(Succession::total_tax)
            .sum(),
    }
}

struct YearSimulator<'a> {
    household: &'a Household,
    fiscal: &'a FiscalModel,
    successions: SuccessionEngine<'a>,
    cash: NetCashFlowManager<'a>,
}

impl YearSimulator<'_> {
    fn simulate_year(
        &self,
        year: Year,
        patrimony: &mut Patrimony,
        carried_taxable: f64,
    ) -> Result<CashFlowYear, SimulationError> {
        let mut line = CashFlowYear {
            year,
            ages: BTreeMap::new(),
            revenues: RevenueLedger::default(),
            taxes: ValuedLedger::new(),
            income_tax: IncomeTax::default(),
            expenses: NamedValueTable::default(),
            debt_payments: NamedValueTable::default(),
            investment_payments: NamedValueTable::default(),
            sci_sub_account: SciCashFlow::default(),
            carried_taxable_revenue_to_next_year: 0.0,
            successions: Vec::new(),
            life_insurance_successions: Vec::new(),
            ownership_transfers: Vec::new(),
            net_cash_flow_action: NetCashFlowAction::default(),
            total_revenue: 0.0,
            total_expense: 0.0,
            net_cash_flow: 0.0,
        };
        let alive: Vec<String> = self
            .household
            .members
            .iter()
            .filter(|p| p.is_alive_during(year))
            .map(|p| p.name.clone())
            .collect();

        self.record_incomes(&mut line, carried_taxable);
        self.record_real_estate(&mut line, patrimony, &alive);
        self.record_scpi(&mut line, patrimony, &alive)?;
        self.record_periodic_investments(&mut line, patrimony, &alive);
        self.record_income_tax(&mut line)?;
        self.record_wealth_tax(&mut line, patrimony)?;
        for (name, amount) in self.household.life_expenses(year) {
            line.expenses.append(name, amount);
        }
        for liability in &patrimony.liabilities {
            let payment = liability.payment(year);
            if payment != 0.0 {
                line.debt_payments.append(liability.name.clone(), payment);
            }
        }
        self.record_successions(&mut line, patrimony)?;
        self.close_year(&mut line, patrimony, &alive)?;

        line.settle_totals();
        Ok(line)
    }

    fn record_incomes(&self, line: &mut CashFlowYear, carried_taxable: f64) {
        let year = line.year;
        for person in &self.household.members {
            if !person.is_alive_during(year) {
                continue;
            }
            line.ages.insert(person.name.clone(), person.age(year));
            if !person.is_adult {
                continue;
            }
            for kind in [
                IncomeKind::WorkIncome,
                IncomeKind::Pension,
                IncomeKind::LayoffCompensation,
                IncomeKind::UnemploymentAllocation,
            ] {
                let income = person.income(kind, year);
                if income.net == 0.0 && income.taxable == 0.0 {
                    continue;
                }
                line.revenues
                    .credited
                    .append(kind.into(), person.name.clone(), income.net);
                line.revenues
                    .taxable
                    .append(kind.into(), person.name.clone(), income.taxable);
            }
        }
        if carried_taxable > 0.0 {
            line.revenues.taxable.append(
                RevenueCategory::CarriedInterests,
                "realized interests",
                carried_taxable,
            );
        }
    }

    fn record_real_estate(&self, line: &mut CashFlowYear, patrimony: &Patrimony, alive: &[String]) {
        let year = line.year;
        for asset in &patrimony.assets {
            let AssetKind::RealEstate(estate) = &asset.kind else {
                continue;
            };
            let share = asset.ownership.revenue_share(alive);
            if share == 0.0 {
                continue;
            }
            let rent = estate.yearly_rent(year, self.fiscal);
            if rent.revenue > 0.0 {
                line.revenues
                    .credited
                    .append(RevenueCategory::Rents, asset.name.clone(), rent.revenue * share);
                line.revenues.taxable.append(
                    RevenueCategory::Rents,
                    asset.name.clone(),
                    rent.taxable_irpp * share,
                );
                line.taxes
                    .append(TaxCategory::Social, asset.name.clone(), rent.social_taxes * share);
            }
            if let Some(sale) = estate.liquidated_value(year, self.fiscal) {
                line.revenues.credited.append(
                    RevenueCategory::RealEstateSales,
                    asset.name.clone(),
                    sale.revenue * share,
                );
                let capital_gain_tax = sale.revenue - sale.social_taxes - sale.net_revenue;
                line.taxes.append(
                    TaxCategory::Income,
                    format!("capital gain {}", asset.name),
                    capital_gain_tax * share,
                );
                line.taxes.append(
                    TaxCategory::Social,
                    format!("capital gain {}", asset.name),
                    sale.social_taxes * share,
                );
            }
            let local = estate.yearly_local_taxes(year);
            if local > 0.0 {
                line.taxes
                    .append(TaxCategory::Local, asset.name.clone(), local * share);
            }
        }
    }

    fn record_scpi(
        &self,
        line: &mut CashFlowYear,
        patrimony: &Patrimony,
        alive: &[String],
    ) -> Result<(), SimulationError> {
        let year = line.year;
        let mut sci_profit = 0.0;
        for asset in &patrimony.assets {
            let AssetKind::Scpi(scpi) = &asset.kind else {
                continue;
            };
            let share = asset.ownership.revenue_share(alive);
            if share == 0.0 {
                continue;
            }
            let dividends = scpi.yearly_revenue(year, self.fiscal);
            let sale = scpi.liquidated_value(year, self.fiscal);

            if scpi.held_by_sci {
                let sci = &mut line.sci_sub_account;
                if dividends.revenue > 0.0 {
                    sci.revenues.append(asset.name.clone(), dividends.revenue * share);
                    sci_profit += dividends.taxable_irpp * share;
                }
                if let Some(sale) = sale {
                    sci.revenues
                        .append(format!("sale {}", asset.name), sale.revenue * share);
                    sci_profit += sale.taxable_interests * share;
                }
                continue;
            }

            if dividends.revenue > 0.0 {
                line.revenues.credited.append(
                    RevenueCategory::ScpiDividends,
                    asset.name.clone(),
                    dividends.revenue * share,
                );
                line.revenues.taxable.append(
                    RevenueCategory::ScpiDividends,
                    asset.name.clone(),
                    dividends.taxable_irpp * share,
                );
                line.taxes.append(
                    TaxCategory::Social,
                    asset.name.clone(),
                    dividends.social_taxes * share,
                );
            }
            if let Some(sale) = sale {
                line.revenues.credited.append(
                    RevenueCategory::ScpiSales,
                    asset.name.clone(),
                    sale.revenue * share,
                );
                let capital_gain_tax = sale.revenue - sale.social_taxes - sale.net_revenue;
                line.taxes.append(
                    TaxCategory::Income,
                    format!("capital gain {}", asset.name),
                    capital_gain_tax * share,
                );
                line.taxes.append(
                    TaxCategory::Social,
                    format!("capital gain {}", asset.name),
                    sale.social_taxes * share,
                );
            }
        }

        if !line.sci_sub_account.revenues.is_empty() {
            let tax = corporate_tax(sci_profit, &self.fiscal.corporate_tax)?;
            line.taxes.append(TaxCategory::Corporate, "SCI", tax);
            let sci = &mut line.sci_sub_account;
            sci.taxable_profit = sci_profit;
            sci.corporate_tax = tax;
            sci.net_revenue = sci.revenues.total() - tax;
        }
        Ok(())
    }

    fn record_periodic_investments(
        &self,
        line: &mut CashFlowYear,
        patrimony: &Patrimony,
        alive: &[String],
    ) {
        let year = line.year;
        for asset in &patrimony.assets {
            let AssetKind::PeriodicInvestment(plan) = &asset.kind else {
                continue;
            };
            let share = asset.ownership.revenue_share(alive);
            if share == 0.0 {
                continue;
            }
            let contribution = plan.contribution(year);
            if contribution > 0.0 {
                line.investment_payments
                    .append(asset.name.clone(), contribution * share);
            }
            if let Some(liquidation) = plan.liquidated_value(year, self.fiscal) {
                line.revenues.credited.append(
                    RevenueCategory::PeriodicInvestmentLiquidations,
                    asset.name.clone(),
                    liquidation.revenue * share,
                );
                line.revenues.taxable.append(
                    RevenueCategory::PeriodicInvestmentLiquidations,
                    asset.name.clone(),
                    liquidation.taxable_interests * share,
                );
                line.taxes.append(
                    TaxCategory::Social,
                    asset.name.clone(),
                    liquidation.social_taxes * share,
                );
            }
        }
    }

    fn record_income_tax(&self, line: &mut CashFlowYear) -> Result<(), SimulationError> {
        let year = line.year;
        let grid = &self.fiscal.income_tax;
        let computed = income_tax(
            line.revenues.taxable.total(),
            self.household.nb_of_adults_alive(year),
            self.household
                .nb_of_fiscal_children(year, grid.fiscal_child_age_limit),
            grid,
        )?;
        if computed.amount > 0.0 {
            line.taxes
                .append(TaxCategory::Income, "income tax", computed.amount);
        }
        line.income_tax = computed;
        Ok(())
    }

    fn record_wealth_tax(&self, line: &mut CashFlowYear, patrimony: &Patrimony) -> Result<(), SimulationError> {
        let year = line.year;
        let valuation = Valuation {
            household: self.household,
            demembrement: &self.fiscal.demembrement,
            year,
        };
        let allowance = self.fiscal.wealth_tax.main_residence_allowance;
        let mut base = 0.0;
        for adult in self.household.adults_alive_during(year) {
            for asset in &patrimony.assets {
                let abatement = match &asset.kind {
                    AssetKind::RealEstate(r) if r.is_main_residence => 1.0 - allowance,
                    AssetKind::RealEstate(_) | AssetKind::Scpi(_) => 1.0,
                    _ => continue,
                };
                base += abatement
                    * asset.owned_value(&adult.name, year, EvaluationMethod::WealthTax, &valuation)?;
            }
        }
        let computed = wealth_tax(base, &self.fiscal.wealth_tax)?;
        if computed.amount > 0.0 {
            line.taxes
                .append(TaxCategory::Wealth, "wealth tax", computed.amount);
        }
        Ok(())
    }

    fn record_successions(&self, line: &mut CashFlowYear, patrimony: &mut Patrimony) -> Result<(), SimulationError> {
        let year = line.year;
        let computed = self.successions.successions(year, patrimony)?;
        for succession in &computed.legal {
            let tax = succession.total_tax();
            if tax > 0.0 {
                line.taxes.append(
                    TaxCategory::Succession,
                    succession.decedent.clone(),
                    tax,
                );
            }
        }
        for succession in &computed.life_insurance {
            let tax = succession.total_tax();
            if tax > 0.0 {
                line.taxes.append(
                    TaxCategory::LifeInsuranceSuccession,
                    succession.decedent.clone(),
                    tax,
                );
            }
        }
        line.successions = computed.legal;
        line.life_insurance_successions = computed.life_insurance;
        line.ownership_transfers = self
            .successions
            .transfer_ownership_of_decedents(year, patrimony)?;
        Ok(())
    }

    fn close_year(
        &self,
        line: &mut CashFlowYear,
        patrimony: &mut Patrimony,
        alive: &[String],
    ) -> Result<(), SimulationError> {
        let year = line.year;
        let mut owners = self.household.cash_owners_at_end_of(year);
        if owners.is_empty() {
            owners = alive.to_vec();
        }
        let net_cash_flow = line.revenue_total() - line.expense_total();
        let action = self.cash.close_year(patrimony, year, net_cash_flow, &owners)?;
        for (asset, levy) in &action.social_taxes_to_post {
            line.taxes
                .append(TaxCategory::Social, format!("withdrawal {asset}"), *levy);
        }
        line.carried_taxable_revenue_to_next_year = action.taxable_interests_realized;
        line.net_cash_flow_action = action;
        Ok(())
    }
}
