use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::SimulationError;
use super::tax::DemembermentTable;
use super::types::{Household, Year};

const SHARE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub fraction: f64,
}

impl Owner {
    pub fn new(name: impl Into<String>, fraction: f64) -> Self {
        Self {
            name: name.into(),
            fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Ownership {
    Full {
        owners: Vec<Owner>,
    },
    #[serde(rename_all = "camelCase")]
    Demembered {
        usufruct_owners: Vec<String>,
        bare_owners: Vec<String>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationMethod {
    WealthTax,
    Succession,
    /// Net-worth view: a demembered asset counts in full for its bare owners.
    Patrimony,
}

#[derive(Clone, Copy)]
pub struct Valuation<'a> {
    pub household: &'a Household,
    pub demembrement: &'a DemembermentTable,
    pub year: Year,
}

impl Valuation<'_> {
    fn usufruct_fraction(&self, name: &str) -> Result<f64, SimulationError> {
        let age = self.household.age_of(name, self.year).ok_or_else(|| {
            SimulationError::MissingFamilyReference {
                name: name.to_string(),
            }
        })?;
        Ok(self.demembrement.usufruct_fraction(age))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Devolution {
    FullOwnership(Vec<Owner>),
    Usufruct {
        usufructuary: String,
        bare_owners: Vec<String>,
    },
    NoHeir,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BeneficiaryClause {
    pub is_dismembered: bool,
    pub full_recipients: Vec<Owner>,
    pub usufruct_recipient: Option<String>,
    pub bare_recipients: Vec<String>,
}

impl BeneficiaryClause {
    pub fn to_full(recipients: Vec<Owner>) -> Self {
        Self {
            full_recipients: recipients,
            ..Self::default()
        }
    }

    pub fn dismembered(usufruct: impl Into<String>, bare: Vec<String>) -> Self {
        Self {
            is_dismembered: true,
            usufruct_recipient: Some(usufruct.into()),
            bare_recipients: bare,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_dismembered {
            if self.usufruct_recipient.is_none() || self.bare_recipients.is_empty() {
                return Err(
                    "a dismembered clause needs a usufruct recipient and bare recipients"
                        .to_string(),
                );
            }
            return Ok(());
        }
        if self.full_recipients.is_empty() {
            return Err("a clause needs at least one recipient".to_string());
        }
        let total: f64 = self.full_recipients.iter().map(|o| o.fraction).sum();
        if (total - 1.0).abs() > SHARE_TOLERANCE {
            return Err(format!("clause fractions sum to {total}, expected 1"));
        }
        Ok(())
    }

    pub fn recipients(&self) -> Vec<&str> {
        if self.is_dismembered {
            self.usufruct_recipient
                .iter()
                .map(String::as_str)
                .chain(self.bare_recipients.iter().map(String::as_str))
                .collect()
        } else {
            self.full_recipients.iter().map(|o| o.name.as_str()).collect()
        }
    }

    /// The clause restricted to surviving recipients, or `None` when nobody it
    /// names survives.
    pub fn for_survivors(&self, survivors: &HashSet<String>) -> Option<BeneficiaryClause> {
        if self.is_dismembered {
            let bare: Vec<String> = self
                .bare_recipients
                .iter()
                .filter(|n| survivors.contains(*n))
                .cloned()
                .collect();
            let usufruct = self
                .usufruct_recipient
                .as_ref()
                .filter(|n| survivors.contains(*n));
            return match (usufruct, bare.is_empty()) {
                (Some(u), false) => Some(BeneficiaryClause::dismembered(u.clone(), bare)),
                (Some(u), true) => Some(BeneficiaryClause::to_full(vec![Owner::new(u, 1.0)])),
                (None, false) => Some(BeneficiaryClause::to_full(equal_owners(&bare))),
                (None, true) => None,
            };
        }
        let alive: Vec<&Owner> = self
            .full_recipients
            .iter()
            .filter(|o| survivors.contains(&o.name))
            .collect();
        let total: f64 = alive.iter().map(|o| o.fraction).sum();
        if alive.is_empty() || total <= 0.0 {
            return None;
        }
        Some(BeneficiaryClause::to_full(
            alive
                .into_iter()
                .map(|o| Owner::new(o.name.clone(), o.fraction / total))
                .collect(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TransferEvent<'a> {
    Death {
        decedent: &'a str,
        devolution: &'a Devolution,
    },
    LifeInsuranceClaim {
        decedent: &'a str,
        clause: &'a BeneficiaryClause,
    },
}

pub fn equal_owners(names: &[String]) -> Vec<Owner> {
    let n = names.len().max(1) as f64;
    names.iter().map(|name| Owner::new(name.clone(), 1.0 / n)).collect()
}

fn merge_owners(owners: Vec<Owner>) -> Vec<Owner> {
    let mut merged: Vec<Owner> = Vec::with_capacity(owners.len());
    for owner in owners {
        match merged.iter_mut().find(|o| o.name == owner.name) {
            Some(existing) => existing.fraction += owner.fraction,
            None => merged.push(owner),
        }
    }
    merged.retain(|o| o.fraction > 0.0);
    merged
}

impl Ownership {
    pub fn sole(name: impl Into<String>) -> Self {
        Ownership::Full {
            owners: vec![Owner::new(name, 1.0)],
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Ownership::Full { owners } => {
                if owners.is_empty() {
                    return Err("full ownership needs at least one owner".to_string());
                }
                if owners.iter().any(|o| o.fraction <= 0.0) {
                    return Err("owner fractions must be positive".to_string());
                }
                let total: f64 = owners.iter().map(|o| o.fraction).sum();
                if (total - 1.0).abs() > SHARE_TOLERANCE {
                    return Err(format!("owner fractions sum to {total}, expected 1"));
                }
                Ok(())
            }
            Ownership::Demembered {
                usufruct_owners,
                bare_owners,
            } => {
                if usufruct_owners.is_empty() || bare_owners.is_empty() {
                    return Err(
                        "demembered ownership needs usufruct owners and bare owners".to_string(),
                    );
                }
                Ok(())
            }
        }
    }

    pub fn is_demembered(&self) -> bool {
        matches!(self, Ownership::Demembered { .. })
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            Ownership::Full { owners } => owners.iter().map(|o| o.name.as_str()).collect(),
            Ownership::Demembered {
                usufruct_owners,
                bare_owners,
            } => usufruct_owners
                .iter()
                .chain(bare_owners)
                .map(String::as_str)
                .collect(),
        }
    }

    pub fn involves(&self, name: &str) -> bool {
        self.names().contains(&name)
    }

    pub fn full_share(&self, name: &str) -> f64 {
        match self {
            Ownership::Full { owners } => owners
                .iter()
                .filter(|o| o.name == name)
                .map(|o| o.fraction)
                .sum(),
            Ownership::Demembered { .. } => 0.0,
        }
    }

    pub fn has_full_owner(&self, name: &str) -> bool {
        self.full_share(name) > 0.0
    }

    pub fn is_fully_owned_by(&self, names: &[String]) -> bool {
        match self {
            Ownership::Full { owners } => owners.iter().all(|o| names.contains(&o.name)),
            Ownership::Demembered { .. } => false,
        }
    }

    pub fn is_part_of_patrimony_of(&self, names: &[String]) -> bool {
        self.names()
            .iter()
            .any(|n| names.iter().any(|m| m.as_str() == *n))
    }

    pub fn revenue_share(&self, names: &[String]) -> f64 {
        match self {
            Ownership::Full { owners } => owners
                .iter()
                .filter(|o| names.contains(&o.name))
                .map(|o| o.fraction)
                .sum(),
            Ownership::Demembered {
                usufruct_owners, ..
            } => {
                if usufruct_owners.iter().any(|u| names.contains(u)) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn owned_value(
        &self,
        name: &str,
        total_value: f64,
        method: EvaluationMethod,
        valuation: &Valuation<'_>,
    ) -> Result<f64, SimulationError> {
        match self {
            Ownership::Full { .. } => Ok(total_value * self.full_share(name)),
            Ownership::Demembered {
                usufruct_owners,
                bare_owners,
            } => {
                let is_usufructuary = usufruct_owners.iter().any(|u| u == name);
                let is_bare_owner = bare_owners.iter().any(|b| b == name);
                if !is_usufructuary && !is_bare_owner {
                    return Ok(0.0);
                }
                let nb_bare = bare_owners.len() as f64;
                if method == EvaluationMethod::Patrimony {
                    return Ok(if is_bare_owner {
                        total_value / nb_bare
                    } else {
                        0.0
                    });
                }

                let nb_usufruct = usufruct_owners.len() as f64;
                let mut usufruct_total = 0.0;
                let mut owned = 0.0;
                for usufructuary in usufruct_owners {
                    let part =
                        total_value * valuation.usufruct_fraction(usufructuary)? / nb_usufruct;
                    usufruct_total += part;
                    if usufructuary == name {
                        owned += part;
                    }
                }
                if is_bare_owner {
                    owned += (total_value - usufruct_total) / nb_bare;
                }
                Ok(owned)
            }
        }
    }

    /// The record after `event`, leaving `self` untouched.
    pub fn simulate_transfer(
        &self,
        asset: &str,
        event: TransferEvent<'_>,
    ) -> Result<Ownership, SimulationError> {
        let decedent = match event {
            TransferEvent::Death { decedent, .. } => decedent,
            TransferEvent::LifeInsuranceClaim { decedent, .. } => decedent,
        };
        if !self.involves(decedent) {
            return Ok(self.clone());
        }
        let topology_error = |reason: &str| SimulationError::InvalidOwnershipTopology {
            asset: asset.to_string(),
            decedent: decedent.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Ownership::Demembered {
                usufruct_owners,
                bare_owners,
            } => {
                if bare_owners.iter().any(|b| b == decedent) {
                    return Err(topology_error("the decedent is a bare owner"));
                }
                // usufruct dies with its holder and merges into bare ownership
                let remaining: Vec<String> = usufruct_owners
                    .iter()
                    .filter(|u| *u != decedent)
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    Ok(Ownership::Full {
                        owners: equal_owners(bare_owners),
                    })
                } else {
                    Ok(Ownership::Demembered {
                        usufruct_owners: remaining,
                        bare_owners: bare_owners.clone(),
                    })
                }
            }
            Ownership::Full { owners } => {
                let share = self.full_share(decedent);
                let others: Vec<Owner> = owners
                    .iter()
                    .filter(|o| o.name != decedent)
                    .cloned()
                    .collect();
                match event {
                    TransferEvent::LifeInsuranceClaim { clause, .. } => {
                        if !others.is_empty() {
                            return Err(topology_error(
                                "life insurance co-owned with a living owner",
                            ));
                        }
                        if clause.is_dismembered {
                            let usufructuary = clause
                                .usufruct_recipient
                                .clone()
                                .ok_or_else(|| topology_error("clause without usufructuary"))?;
                            Ok(Ownership::Demembered {
                                usufruct_owners: vec![usufructuary],
                                bare_owners: clause.bare_recipients.clone(),
                            })
                        } else {
                            Ok(Ownership::Full {
                                owners: merge_owners(clause.full_recipients.clone()),
                            })
                        }
                    }
                    TransferEvent::Death { devolution, .. } => match devolution {
                        Devolution::NoHeir => Ok(self.clone()),
                        Devolution::FullOwnership(heirs) => {
                            let mut next = others;
                            next.extend(
                                heirs
                                    .iter()
                                    .map(|h| Owner::new(h.name.clone(), h.fraction * share)),
                            );
                            Ok(Ownership::Full {
                                owners: merge_owners(next),
                            })
                        }
                        Devolution::Usufruct {
                            usufructuary,
                            bare_owners,
                        } => {
                            if !others.is_empty() {
                                return Err(topology_error(
                                    "co-owned asset cannot be split into usufruct and bare ownership",
                                ));
                            }
                            Ok(Ownership::Demembered {
                                usufruct_owners: vec![usufructuary.clone()],
                                bare_owners: bare_owners.clone(),
                            })
                        }
                    },
                }
            }
        }
    }
}
