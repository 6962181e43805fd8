use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::assets::{FreeInvestment, InvestmentType, Patrimony};
use super::error::SimulationError;
use super::ownership::{EvaluationMethod, Valuation};
use super::tax::FiscalModel;
use super::types::{Household, Year};

/// Amounts below half a cent are considered settled.
const CASH_TOLERANCE: f64 = 0.005;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MovementKind {
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashMovement {
    pub kind: MovementKind,
    pub asset: String,
    pub owner: Option<String>,
    pub amount: f64,
    pub gross: f64,
    pub social_taxes: f64,
    pub taxable_interests: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetCashFlowAction {
    pub capitalized_interests: f64,
    pub movements: Vec<CashMovement>,
    pub dropped_surplus: f64,
    /// Interests realized by withdrawals, taxable with next year's income.
    pub taxable_interests_realized: f64,
    pub social_taxes_to_post: Vec<(String, f64)>,
}

impl NetCashFlowAction {
    pub fn deposited(&self) -> f64 {
        self.total(MovementKind::Deposit)
    }

    pub fn withdrawn(&self) -> f64 {
        self.total(MovementKind::Withdrawal)
    }

    fn total(&self, kind: MovementKind) -> f64 {
        self.movements
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.amount)
            .sum()
    }
}

fn surplus_tier(investment: &FreeInvestment) -> u8 {
    match investment.investment_type {
        InvestmentType::LifeInsurance {
            periodic_social_taxes: true,
            ..
        } => 0,
        InvestmentType::LifeInsurance { .. } => 1,
        InvestmentType::Pea => 2,
        InvestmentType::Other => 3,
    }
}

fn withdrawal_tier(investment: &FreeInvestment) -> u8 {
    match investment.investment_type {
        InvestmentType::Pea => 0,
        InvestmentType::LifeInsurance { .. } => 1,
        InvestmentType::Other => 2,
    }
}

pub struct NetCashFlowManager<'a> {
    household: &'a Household,
    fiscal: &'a FiscalModel,
}

impl<'a> NetCashFlowManager<'a> {
    pub fn new(household: &'a Household, fiscal: &'a FiscalModel) -> Self {
        Self { household, fiscal }
    }

    pub fn capitalize_free_investments(&self, patrimony: &mut Patrimony, year: Year) -> f64 {
        patrimony
            .assets
            .iter_mut()
            .filter_map(|a| a.free_investment_mut())
            .map(|f| f.capitalize(year, self.fiscal.social_levies_rate))
            .sum()
    }

    pub fn invest_surplus(
        &self,
        patrimony: &mut Patrimony,
        amount: f64,
        owners: &[String],
    ) -> Option<CashMovement> {
        let target = patrimony
            .assets
            .iter_mut()
            .filter(|a| a.ownership.is_fully_owned_by(owners))
            .filter_map(|a| {
                let tier = surplus_tier(a.free_investment()?);
                Some((tier, a))
            })
            .min_by_key(|(tier, _)| *tier)
            .map(|(_, a)| a)?;

        let name = target.name.clone();
        let investment = target.free_investment_mut()?;
        investment.deposit(amount);
        debug!(asset = %name, amount, "surplus invested");
        Some(CashMovement {
            kind: MovementKind::Deposit,
            asset: name,
            owner: None,
            amount,
            gross: amount,
            social_taxes: 0.0,
            taxable_interests: 0.0,
        })
    }

    fn free_investment_wealth(
        &self,
        patrimony: &Patrimony,
        owner: &str,
        year: Year,
    ) -> Result<f64, SimulationError> {
        let valuation = Valuation {
            household: self.household,
            demembrement: &self.fiscal.demembrement,
            year,
        };
        let mut wealth = 0.0;
        for asset in patrimony.assets.iter().filter(|a| a.free_investment().is_some()) {
            wealth += asset.owned_value(owner, year - 1, EvaluationMethod::Patrimony, &valuation)?;
        }
        Ok(wealth)
    }

    /// Covers `amount` from the owners' free investments, richest owner first.
    pub fn withdraw_deficit(
        &self,
        patrimony: &mut Patrimony,
        year: Year,
        amount: f64,
        owners: &[String],
        action: &mut NetCashFlowAction,
    ) -> Result<(), SimulationError> {
        let mut ranked = Vec::with_capacity(owners.len());
        for owner in owners {
            ranked.push((owner.clone(), self.free_investment_wealth(patrimony, owner, year)?));
        }
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut rebates: HashMap<&str, f64> = owners
            .iter()
            .map(|o| (o.as_str(), self.fiscal.life_insurance_rebate))
            .collect();
        let social_rate = self.fiscal.social_levies_rate;
        let mut remaining = amount;

        for (owner, _) in &ranked {
            if remaining <= CASH_TOLERANCE {
                break;
            }
            let mut candidates: Vec<(u8, usize)> = patrimony
                .assets
                .iter()
                .enumerate()
                .filter(|(_, a)| !a.ownership.is_demembered() && a.ownership.has_full_owner(owner))
                .filter_map(|(idx, a)| {
                    let investment = a.free_investment()?;
                    (investment.value(year - 1) > 0.0).then(|| (withdrawal_tier(investment), idx))
                })
                .collect();
            candidates.sort_by_key(|(tier, _)| *tier);

            for (tier, idx) in candidates {
                if remaining <= CASH_TOLERANCE {
                    break;
                }
                let asset = &mut patrimony.assets[idx];
                let name = asset.name.clone();
                let Some(investment) = asset.free_investment_mut() else {
                    continue;
                };
                let removal = investment.remove(remaining, social_rate);
                if removal.gross <= 0.0 {
                    continue;
                }

                let (covered, taxable) = match tier {
                    0 => (removal.revenue, 0.0),
                    1 => {
                        let rebate = rebates.entry(owner.as_str()).or_insert(0.0);
                        let used = rebate.min(removal.interests);
                        *rebate -= used;
                        (removal.revenue, (removal.interests - used).max(0.0))
                    }
                    _ => (removal.revenue - removal.social_taxes, removal.interests),
                };
                if !removal.social_taxes_withheld && removal.social_taxes > 0.0 {
                    action
                        .social_taxes_to_post
                        .push((name.clone(), removal.social_taxes));
                }
                remaining -= covered;
                action.taxable_interests_realized += taxable;
                debug!(asset = %name, owner = %owner, amount = covered, "deficit withdrawn");
                action.movements.push(CashMovement {
                    kind: MovementKind::Withdrawal,
                    asset: name,
                    owner: Some(owner.clone()),
                    amount: covered,
                    gross: removal.gross,
                    social_taxes: removal.social_taxes,
                    taxable_interests: taxable,
                });
            }
        }

        if remaining > CASH_TOLERANCE {
            return Err(SimulationError::InsufficientCash {
                year,
                missing: remaining,
            });
        }
        Ok(())
    }

    pub fn close_year(
        &self,
        patrimony: &mut Patrimony,
        year: Year,
        net_cash_flow: f64,
        owners: &[String],
    ) -> Result<NetCashFlowAction, SimulationError> {
        let mut action = NetCashFlowAction {
            capitalized_interests: self.capitalize_free_investments(patrimony, year),
            ..NetCashFlowAction::default()
        };

        if net_cash_flow > 0.0 {
            match self.invest_surplus(patrimony, net_cash_flow, owners) {
                Some(deposit) => action.movements.push(deposit),
                None => {
                    warn!(year, amount = net_cash_flow, ?owners, "no receptacle for the surplus, dropped");
                    action.dropped_surplus = net_cash_flow;
                }
            }
        } else if net_cash_flow < 0.0 {
            self.withdraw_deficit(patrimony, year, -net_cash_flow, owners, &mut action)?;
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assets::{Asset, AssetKind};
    use crate::core::ownership::{BeneficiaryClause, Ownership};
    use crate::core::types::Person;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn couple() -> Household {
        let person = |name: &str| Person {
            name: name.to_string(),
            birth_year: 1970,
            death_year: 2070,
            is_adult: true,
            incomes: vec![],
        };
        Household {
            members: vec![person("Ann"), person("Bob")],
            expenses: vec![],
        }
    }

    fn vehicle(name: &str, owner: &str, kind: InvestmentType, value: f64) -> Asset {
        let mut investment = FreeInvestment::new(kind, 0.0, value);
        investment.reset(2030);
        Asset {
            name: name.to_string(),
            ownership: Ownership::sole(owner),
            kind: AssetKind::FreeInvestment(investment),
        }
    }

    fn life_insurance(periodic: bool) -> InvestmentType {
        InvestmentType::LifeInsurance {
            periodic_social_taxes: periodic,
            clause: BeneficiaryClause::default(),
        }
    }

    fn balance(patrimony: &Patrimony, name: &str, year: Year) -> f64 {
        patrimony.asset(name).map_or(0.0, |a| a.value(year))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn surplus_goes_to_periodic_life_insurance_first() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![
                vehicle("other", "Ann", InvestmentType::Other, 0.0),
                vehicle("pea", "Ann", InvestmentType::Pea, 0.0),
                vehicle("li", "Ann", life_insurance(true), 0.0),
            ],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, 1_000.0, &names(&["Ann"]))
            .unwrap();
        assert_approx(balance(&patrimony, "li", 2030), 1_000.0);
        assert_approx(balance(&patrimony, "pea", 2030), 0.0);
        assert_approx(balance(&patrimony, "other", 2030), 0.0);
        assert_approx(action.deposited(), 1_000.0);
    }

    #[test]
    fn surplus_without_receptacle_is_dropped() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![vehicle("pea", "Bob", InvestmentType::Pea, 0.0)],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, 500.0, &names(&["Ann"]))
            .unwrap();
        assert_approx(action.dropped_surplus, 500.0);
        assert!(action.movements.is_empty());
    }

    #[test]
    fn richest_owner_is_drawn_first() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![
                vehicle("ann-pea", "Ann", InvestmentType::Pea, 10.0),
                vehicle("bob-pea", "Bob", InvestmentType::Pea, 100.0),
            ],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, -50.0, &names(&["Ann", "Bob"]))
            .unwrap();
        assert_approx(balance(&patrimony, "bob-pea", 2030), 50.0);
        assert_approx(balance(&patrimony, "ann-pea", 2030), 10.0);
        assert_eq!(action.movements.len(), 1);
        assert_eq!(action.movements[0].owner.as_deref(), Some("Bob"));

        // once the richer owner is exhausted the poorer one pays
        manager
            .close_year(&mut patrimony, 2031, -55.0, &names(&["Ann", "Bob"]))
            .unwrap();
        assert_approx(balance(&patrimony, "bob-pea", 2031), 0.0);
        assert_approx(balance(&patrimony, "ann-pea", 2031), 5.0);
    }

    #[test]
    fn pea_is_drawn_before_life_insurance_and_other() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![
                vehicle("other", "Ann", InvestmentType::Other, 100.0),
                vehicle("li", "Ann", life_insurance(false), 100.0),
                vehicle("pea", "Ann", InvestmentType::Pea, 100.0),
            ],
            liabilities: vec![],
        };
        manager
            .close_year(&mut patrimony, 2030, -150.0, &names(&["Ann"]))
            .unwrap();
        assert_approx(balance(&patrimony, "pea", 2030), 0.0);
        assert_approx(balance(&patrimony, "li", 2030), 50.0);
        assert_approx(balance(&patrimony, "other", 2030), 100.0);
    }

    #[test]
    fn other_vehicle_levies_are_posted_and_interests_taxable() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut other = vehicle("other", "Ann", InvestmentType::Other, 1_000.0);
        if let Some(f) = other.free_investment_mut() {
            f.initial_interests = 500.0;
            f.reset(2030);
        }
        let mut patrimony = Patrimony {
            assets: vec![other],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, -100.0, &names(&["Ann"]))
            .unwrap();
        let levy_ratio = 0.5 * fiscal.social_levies_rate;
        let gross = 100.0 / (1.0 - levy_ratio);
        assert_eq!(action.social_taxes_to_post.len(), 1);
        assert_approx(action.social_taxes_to_post[0].1, gross * levy_ratio);
        assert_approx(action.taxable_interests_realized, gross * 0.5);
        assert_approx(action.withdrawn(), 100.0);
    }

    #[test]
    fn life_insurance_gains_consume_the_rebate_first() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut li = vehicle("li", "Ann", life_insurance(true), 100_000.0);
        if let Some(f) = li.free_investment_mut() {
            f.initial_interests = 100_000.0;
            f.reset(2030);
        }
        let mut patrimony = Patrimony {
            assets: vec![li],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, -10_000.0, &names(&["Ann"]))
            .unwrap();
        assert_approx(action.taxable_interests_realized, 10_000.0 - fiscal.life_insurance_rebate);
    }

    #[test]
    fn deposits_of_the_year_are_not_liquid() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![vehicle("pea", "Ann", InvestmentType::Pea, 0.0)],
            liabilities: vec![],
        };
        manager
            .close_year(&mut patrimony, 2030, 1_000.0, &names(&["Ann"]))
            .unwrap();
        let mut action = NetCashFlowAction::default();
        let err = manager
            .withdraw_deficit(&mut patrimony, 2030, 10.0, &names(&["Ann"]), &mut action)
            .unwrap_err();
        assert!(matches!(err, SimulationError::InsufficientCash { year: 2030, .. }));
        assert_approx(balance(&patrimony, "pea", 2030), 1_000.0);
    }

    #[test]
    fn insufficient_cash_reports_the_missing_amount() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut patrimony = Patrimony {
            assets: vec![vehicle("pea", "Ann", InvestmentType::Pea, 30.0)],
            liabilities: vec![],
        };
        let err = manager
            .close_year(&mut patrimony, 2030, -100.0, &names(&["Ann"]))
            .unwrap_err();
        match err {
            SimulationError::InsufficientCash { year, missing } => {
                assert_eq!(year, 2030);
                assert_approx(missing, 70.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn capitalization_happens_before_the_flow() {
        let household = couple();
        let fiscal = FiscalModel::default();
        let manager = NetCashFlowManager::new(&household, &fiscal);
        let mut asset = vehicle("pea", "Ann", InvestmentType::Pea, 1_000.0);
        if let Some(f) = asset.free_investment_mut() {
            f.interest_rate = 0.1;
            f.reset(2030);
        }
        let mut patrimony = Patrimony {
            assets: vec![asset],
            liabilities: vec![],
        };
        let action = manager
            .close_year(&mut patrimony, 2030, 500.0, &names(&["Ann"]))
            .unwrap();
        assert_approx(action.capitalized_interests, 100.0);
        assert_approx(balance(&patrimony, "pea", 2030), 1_600.0);
    }
}
