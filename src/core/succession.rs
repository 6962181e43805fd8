use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::assets::Patrimony;
use super::error::SimulationError;
use super::ownership::{
    BeneficiaryClause, Devolution, EvaluationMethod, Owner, Ownership, TransferEvent, Valuation,
};
use super::tax::{FiscalModel, InheritanceTax, heritage_of_child, heritage_to_spouse};
use super::types::{Household, Person, Year};

/// What the surviving spouse takes when children also inherit.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpouseOption {
    #[default]
    FullOwnershipQuarter,
    UsufructTotal,
    DisposableQuota,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuccessionKind {
    Legal,
    LifeInsurance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inheritance {
    pub heir: String,
    pub percent: f64,
    pub gross_share: f64,
    pub net_share: f64,
    pub tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Succession {
    pub kind: SuccessionKind,
    pub year_of_death: Year,
    pub decedent: String,
    pub taxable_value: f64,
    pub inheritances: Vec<Inheritance>,
}

impl Succession {
    fn empty(kind: SuccessionKind, year_of_death: Year, decedent: &str) -> Self {
        Self {
            kind,
            year_of_death,
            decedent: decedent.to_string(),
            taxable_value: 0.0,
            inheritances: Vec::new(),
        }
    }

    pub fn total_tax(&self) -> f64 {
        self.inheritances.iter().map(|i| i.tax).sum()
    }

    pub fn total_tax_paid_by(&self, heirs: &[String]) -> f64 {
        self.inheritances
            .iter()
            .filter(|i| heirs.contains(&i.heir))
            .map(|i| i.tax)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipTransfer {
    pub decedent: String,
    pub asset: String,
    pub before: Ownership,
    pub after: Ownership,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum HeirClass {
    Spouse,
    DirectLine,
}

#[derive(Debug, Clone)]
struct HeirShare {
    name: String,
    percent: f64,
    class: HeirClass,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSuccessions {
    pub legal: Vec<Succession>,
    pub life_insurance: Vec<Succession>,
}

pub struct SuccessionEngine<'a> {
    household: &'a Household,
    fiscal: &'a FiscalModel,
    spouse_option: SpouseOption,
}

impl<'a> SuccessionEngine<'a> {
    pub fn new(household: &'a Household, fiscal: &'a FiscalModel, spouse_option: SpouseOption) -> Self {
        Self {
            household,
            fiscal,
            spouse_option,
        }
    }

    fn valuation(&self, year: Year) -> Valuation<'a> {
        Valuation {
            household: self.household,
            demembrement: &self.fiscal.demembrement,
            year,
        }
    }

    fn survivors(&self, year: Year) -> HashSet<String> {
        self.household
            .members
            .iter()
            .filter(|p| p.is_alive_at_end_of(year))
            .map(|p| p.name.clone())
            .collect()
    }

    fn is_spouse_of(&self, decedent: &Person, heir: &str) -> bool {
        decedent.is_adult
            && heir != decedent.name
            && self.household.member(heir).is_some_and(|p| p.is_adult)
    }

    fn heir_shares(&self, decedent: &Person, year: Year) -> Vec<HeirShare> {
        let adults = self.household.adults_alive_at_end_of(year);
        if !decedent.is_adult {
            let n = adults.len() as f64;
            return adults
                .iter()
                .map(|p| HeirShare {
                    name: p.name.clone(),
                    percent: 1.0 / n,
                    class: HeirClass::DirectLine,
                })
                .collect();
        }

        let spouse = adults.iter().find(|p| p.name != decedent.name);
        let children = self.household.children_alive_at_end_of(year);
        let n = children.len() as f64;
        let child_shares = |total: f64| {
            children
                .iter()
                .map(|c| HeirShare {
                    name: c.name.clone(),
                    percent: total / n,
                    class: HeirClass::DirectLine,
                })
                .collect::<Vec<_>>()
        };

        match (spouse, children.is_empty()) {
            (None, true) => Vec::new(),
            (None, false) => child_shares(1.0),
            (Some(spouse), true) => vec![HeirShare {
                name: spouse.name.clone(),
                percent: 1.0,
                class: HeirClass::Spouse,
            }],
            (Some(spouse), false) => {
                let spouse_percent = match self.spouse_option {
                    SpouseOption::FullOwnershipQuarter => 0.25,
                    SpouseOption::DisposableQuota => match children.len() {
                        1 => 0.5,
                        2 => 1.0 / 3.0,
                        _ => 0.25,
                    },
                    SpouseOption::UsufructTotal => self
                        .fiscal
                        .demembrement
                        .usufruct_fraction(spouse.age(year)),
                };
                let mut shares = vec![HeirShare {
                    name: spouse.name.clone(),
                    percent: spouse_percent,
                    class: HeirClass::Spouse,
                }];
                shares.extend(child_shares(1.0 - spouse_percent));
                shares
            }
        }
    }

    pub fn devolution(&self, decedent: &Person, year: Year) -> Devolution {
        let shares = self.heir_shares(decedent, year);
        if shares.is_empty() {
            return Devolution::NoHeir;
        }
        if self.spouse_option == SpouseOption::UsufructTotal && decedent.is_adult {
            let spouse = shares.iter().find(|s| s.class == HeirClass::Spouse);
            let children: Vec<String> = shares
                .iter()
                .filter(|s| s.class == HeirClass::DirectLine)
                .map(|s| s.name.clone())
                .collect();
            if let (Some(spouse), false) = (spouse, children.is_empty()) {
                return Devolution::Usufruct {
                    usufructuary: spouse.name.clone(),
                    bare_owners: children,
                };
            }
        }
        self.full_ownership_devolution(decedent, year)
    }

    fn full_ownership_devolution(&self, decedent: &Person, year: Year) -> Devolution {
        let shares = self.heir_shares(decedent, year);
        if shares.is_empty() {
            return Devolution::NoHeir;
        }
        Devolution::FullOwnership(
            shares
                .into_iter()
                .map(|s| Owner::new(s.name, s.percent))
                .collect(),
        )
    }

    fn surviving_clause(&self, clause: &BeneficiaryClause, year: Year) -> Option<BeneficiaryClause> {
        clause.for_survivors(&self.survivors(year))
    }

    fn tax_share(&self, class: HeirClass, gross: f64, life_insurance: bool) -> Result<InheritanceTax, SimulationError> {
        if gross <= 0.0 {
            return Ok(InheritanceTax {
                net_amount: gross,
                tax: 0.0,
            });
        }
        let taxed = match (class, life_insurance) {
            (HeirClass::Spouse, _) => heritage_to_spouse(gross)?,
            (HeirClass::DirectLine, false) => {
                heritage_of_child(gross, &self.fiscal.direct_line_inheritance)?
            }
            (HeirClass::DirectLine, true) => {
                heritage_of_child(gross, &self.fiscal.life_insurance_inheritance)?
            }
        };
        Ok(taxed)
    }

    fn estate_value(&self, decedent: &Person, year: Year, patrimony: &Patrimony) -> Result<f64, SimulationError> {
        let before_death = year - 1;
        let valuation = self.valuation(year);
        let mut estate = 0.0;
        for asset in &patrimony.assets {
            if !asset.ownership.involves(&decedent.name) {
                continue;
            }
            if let Ownership::Demembered { bare_owners, .. } = &asset.ownership {
                // usufruct ends with its holder and is not transmitted
                if !bare_owners.contains(&decedent.name) {
                    continue;
                }
            }
            if let Some(clause) = asset.free_investment().and_then(|f| f.clause()) {
                if self.surviving_clause(clause, year).is_some() {
                    continue;
                }
            }
            estate += asset.owned_value(
                &decedent.name,
                before_death,
                EvaluationMethod::Succession,
                &valuation,
            )?;
        }
        for liability in &patrimony.liabilities {
            estate -= liability.owned_value(
                &decedent.name,
                before_death,
                EvaluationMethod::Succession,
                &valuation,
            )?;
        }
        Ok(estate)
    }

    pub fn legal_succession(
        &self,
        decedent: &Person,
        year: Year,
        patrimony: &Patrimony,
    ) -> Result<Succession, SimulationError> {
        let taxable_value = match self.estate_value(decedent, year, patrimony) {
            Ok(value) => value,
            Err(SimulationError::MissingFamilyReference { name }) => {
                warn!(
                    decedent = %decedent.name,
                    missing = %name,
                    "legal succession computed as zero: family reference missing"
                );
                return Ok(Succession::empty(SuccessionKind::Legal, year, &decedent.name));
            }
            Err(e) => return Err(e),
        };

        let shares = self.heir_shares(decedent, year);
        if shares.is_empty() {
            if taxable_value != 0.0 {
                warn!(
                    decedent = %decedent.name,
                    estate = taxable_value,
                    "no surviving heir, estate left with the deceased"
                );
            }
            return Ok(Succession::empty(SuccessionKind::Legal, year, &decedent.name));
        }

        let mut inheritances = Vec::new();
        for share in shares {
            let gross = taxable_value * share.percent;
            let taxed = self.tax_share(share.class, gross, false)?;
            inheritances.push(Inheritance {
                heir: share.name,
                percent: share.percent,
                gross_share: gross,
                net_share: taxed.net_amount,
                tax: taxed.tax,
            });
        }
        Ok(Succession {
            kind: SuccessionKind::Legal,
            year_of_death: year,
            decedent: decedent.name.clone(),
            taxable_value,
            inheritances,
        })
    }

    fn life_insurance_masses(
        &self,
        decedent: &Person,
        year: Year,
        patrimony: &Patrimony,
    ) -> Result<Vec<(String, f64)>, SimulationError> {
        let before_death = year - 1;
        let valuation = self.valuation(year);
        let mut masses: Vec<(String, f64)> = Vec::new();

        for asset in &patrimony.assets {
            let Some(clause) = asset.free_investment().and_then(|f| f.clause()) else {
                continue;
            };
            let owned = asset.owned_value(
                &decedent.name,
                before_death,
                EvaluationMethod::Succession,
                &valuation,
            )?;
            if owned == 0.0 {
                continue;
            }
            if let Ownership::Demembered { usufruct_owners, .. } = &asset.ownership {
                // the bare owners recover full ownership tax free
                if usufruct_owners.contains(&decedent.name) {
                    continue;
                }
            }
            let Some(clause) = self.surviving_clause(clause, year) else {
                continue;
            };
            let after = asset.ownership.simulate_transfer(
                &asset.name,
                TransferEvent::LifeInsuranceClaim {
                    decedent: &decedent.name,
                    clause: &clause,
                },
            )?;
            let capital = asset.value(before_death);
            for recipient in after.names() {
                let mass = after.owned_value(
                    recipient,
                    capital,
                    EvaluationMethod::Succession,
                    &valuation,
                )?;
                match masses.iter_mut().find(|(name, _)| name == recipient) {
                    Some((_, total)) => *total += mass,
                    None => masses.push((recipient.to_string(), mass)),
                }
            }
        }
        Ok(masses)
    }

    pub fn life_insurance_succession(
        &self,
        decedent: &Person,
        year: Year,
        patrimony: &Patrimony,
    ) -> Result<Succession, SimulationError> {
        let masses = match self.life_insurance_masses(decedent, year, patrimony) {
            Ok(masses) => masses,
            Err(SimulationError::MissingFamilyReference { name }) => {
                warn!(
                    decedent = %decedent.name,
                    missing = %name,
                    "life-insurance succession computed as zero: family reference missing"
                );
                return Ok(Succession::empty(
                    SuccessionKind::LifeInsurance,
                    year,
                    &decedent.name,
                ));
            }
            Err(e) => return Err(e),
        };

        let taxable_value: f64 = masses.iter().map(|(_, m)| m).sum();
        let mut inheritances = Vec::with_capacity(masses.len());
        for (heir, mass) in masses {
            let class = if self.is_spouse_of(decedent, &heir) {
                HeirClass::Spouse
            } else {
                HeirClass::DirectLine
            };
            let taxed = self.tax_share(class, mass, true)?;
            inheritances.push(Inheritance {
                percent: if taxable_value > 0.0 {
                    mass / taxable_value
                } else {
                    0.0
                },
                heir,
                gross_share: mass,
                net_share: taxed.net_amount,
                tax: taxed.tax,
            });
        }
        Ok(Succession {
            kind: SuccessionKind::LifeInsurance,
            year_of_death: year,
            decedent: decedent.name.clone(),
            taxable_value,
            inheritances,
        })
    }

    pub fn successions(&self, year: Year, patrimony: &Patrimony) -> Result<YearSuccessions, SimulationError> {
        let mut result = YearSuccessions::default();
        for decedent in self.household.deceased_during(year) {
            let legal = self.legal_succession(decedent, year, patrimony)?;
            let life_insurance = self.life_insurance_succession(decedent, year, patrimony)?;
            debug!(
                decedent = %decedent.name,
                year,
                legal = legal.taxable_value,
                life_insurance = life_insurance.taxable_value,
                "successions computed"
            );
            result.legal.push(legal);
            result.life_insurance.push(life_insurance);
        }
        Ok(result)
    }

    pub fn transfer_ownership_of_decedents(
        &self,
        year: Year,
        patrimony: &mut Patrimony,
    ) -> Result<Vec<OwnershipTransfer>, SimulationError> {
        let mut transfers = Vec::new();
        for decedent in self.household.deceased_during(year) {
            let devolution = self.devolution(decedent, year);
            let death = TransferEvent::Death {
                decedent: &decedent.name,
                devolution: &devolution,
            };
            // co-owned holdings cannot be demembered; heirs take the same shares in full
            let shared = self.full_ownership_devolution(decedent, year);
            let shared_death = TransferEvent::Death {
                decedent: &decedent.name,
                devolution: &shared,
            };
            let death_for = |ownership: &Ownership| {
                let co_owned = matches!(ownership, Ownership::Full { owners } if owners.len() > 1);
                if co_owned { shared_death } else { death }
            };

            for asset in &mut patrimony.assets {
                let clause = asset
                    .free_investment()
                    .and_then(|f| f.clause())
                    .and_then(|c| self.surviving_clause(c, year));
                let after = match &clause {
                    Some(clause) => asset.ownership.simulate_transfer(
                        &asset.name,
                        TransferEvent::LifeInsuranceClaim {
                            decedent: &decedent.name,
                            clause,
                        },
                    )?,
                    None => asset
                        .ownership
                        .simulate_transfer(&asset.name, death_for(&asset.ownership))?,
                };
                if after != asset.ownership {
                    let before = std::mem::replace(&mut asset.ownership, after.clone());
                    transfers.push(OwnershipTransfer {
                        decedent: decedent.name.clone(),
                        asset: asset.name.clone(),
                        before,
                        after,
                    });
                }
            }
            for liability in &mut patrimony.liabilities {
                let after = liability
                    .ownership
                    .simulate_transfer(&liability.name, death_for(&liability.ownership))?;
                if after != liability.ownership {
                    let before = std::mem::replace(&mut liability.ownership, after.clone());
                    transfers.push(OwnershipTransfer {
                        decedent: decedent.name.clone(),
                        asset: liability.name.clone(),
                        before,
                        after,
                    });
                }
            }
        }
        Ok(transfers)
    }
}
