use serde::{Deserialize, Serialize};

pub type Year = i32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncomeKind {
    WorkIncome,
    Pension,
    LayoffCompensation,
    UnemploymentAllocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub kind: IncomeKind,
    pub from: Year,
    pub to: Year,
    pub net: f64,
    pub taxable: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetTaxable {
    pub net: f64,
    pub taxable: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub name: String,
    pub birth_year: Year,
    /// Year during which the person dies.
    pub death_year: Year,
    pub is_adult: bool,
    #[serde(default)]
    pub incomes: Vec<IncomeStream>,
}

impl Person {
    pub fn age(&self, year: Year) -> u32 {
        (year - self.birth_year).max(0) as u32
    }

    pub fn is_born_by(&self, year: Year) -> bool {
        year >= self.birth_year
    }

    pub fn is_alive_during(&self, year: Year) -> bool {
        self.is_born_by(year) && year <= self.death_year
    }

    pub fn is_alive_at_end_of(&self, year: Year) -> bool {
        self.is_born_by(year) && year < self.death_year
    }

    pub fn dies_during(&self, year: Year) -> bool {
        year == self.death_year
    }

    pub fn income(&self, kind: IncomeKind, year: Year) -> NetTaxable {
        if !self.is_alive_during(year) {
            return NetTaxable::default();
        }
        self.incomes
            .iter()
            .filter(|stream| stream.kind == kind && (stream.from..=stream.to).contains(&year))
            .fold(NetTaxable::default(), |acc, stream| NetTaxable {
                net: acc.net + stream.net,
                taxable: acc.taxable + stream.taxable,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifeExpense {
    pub name: String,
    pub amount: f64,
    #[serde(default)]
    pub from: Option<Year>,
    #[serde(default)]
    pub to: Option<Year>,
}

impl LifeExpense {
    pub fn amount_during(&self, year: Year) -> f64 {
        let started = self.from.is_none_or(|from| year >= from);
        let running = self.to.is_none_or(|to| year <= to);
        if started && running { self.amount } else { 0.0 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Household {
    pub members: Vec<Person>,
    #[serde(default)]
    pub expenses: Vec<LifeExpense>,
}

impl Household {
    pub fn member(&self, name: &str) -> Option<&Person> {
        self.members.iter().find(|p| p.name == name)
    }

    pub fn age_of(&self, name: &str, year: Year) -> Option<u32> {
        self.member(name).map(|p| p.age(year))
    }

    pub fn adults_alive_during(&self, year: Year) -> impl Iterator<Item = &Person> {
        self.members
            .iter()
            .filter(move |p| p.is_adult && p.is_alive_during(year))
    }

    pub fn adults_alive_at_end_of(&self, year: Year) -> Vec<&Person> {
        self.members
            .iter()
            .filter(|p| p.is_adult && p.is_alive_at_end_of(year))
            .collect()
    }

    pub fn children_alive_at_end_of(&self, year: Year) -> Vec<&Person> {
        self.members
            .iter()
            .filter(|p| !p.is_adult && p.is_alive_at_end_of(year))
            .collect()
    }

    pub fn nb_of_adults_alive(&self, year: Year) -> usize {
        self.adults_alive_during(year).count()
    }

    pub fn nb_of_fiscal_children(&self, year: Year, age_limit: u32) -> usize {
        self.members
            .iter()
            .filter(|p| !p.is_adult && p.is_alive_during(year) && p.age(year) <= age_limit)
            .count()
    }

    pub fn deceased_during(&self, year: Year) -> Vec<&Person> {
        self.members.iter().filter(|p| p.dies_during(year)).collect()
    }

    pub fn is_anyone_alive_at_end_of(&self, year: Year) -> bool {
        self.members.iter().any(|p| p.is_alive_at_end_of(year))
    }

    pub fn cash_owners_at_end_of(&self, year: Year) -> Vec<String> {
        let adults = self.adults_alive_at_end_of(year);
        let people = if adults.is_empty() {
            self.children_alive_at_end_of(year)
        } else {
            adults
        };
        people.into_iter().map(|p| p.name.clone()).collect()
    }

    pub fn life_expenses(&self, year: Year) -> Vec<(String, f64)> {
        self.expenses
            .iter()
            .map(|e| (e.name.clone(), e.amount_during(year)))
            .filter(|(_, amount)| *amount != 0.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adult(name: &str, birth: Year, death: Year) -> Person {
        Person {
            name: name.to_string(),
            birth_year: birth,
            death_year: death,
            is_adult: true,
            incomes: vec![IncomeStream {
                kind: IncomeKind::WorkIncome,
                from: 2020,
                to: 2030,
                net: 30_000.0,
                taxable: 27_000.0,
            }],
        }
    }

    #[test]
    fn income_stops_after_death_year() {
        let p = adult("Ann", 1970, 2025);
        assert_eq!(p.income(IncomeKind::WorkIncome, 2025).net, 30_000.0);
        assert_eq!(p.income(IncomeKind::WorkIncome, 2026).net, 0.0);
        assert_eq!(p.income(IncomeKind::Pension, 2025).net, 0.0);
    }

    #[test]
    fn person_dying_in_year_is_alive_during_but_not_at_end() {
        let p = adult("Ann", 1970, 2025);
        assert!(p.is_alive_during(2025));
        assert!(!p.is_alive_at_end_of(2025));
        assert!(p.dies_during(2025));
    }

    #[test]
    fn cash_owners_fall_back_to_children() {
        let household = Household {
            members: vec![
                adult("Ann", 1950, 2025),
                Person {
                    name: "Kid".to_string(),
                    birth_year: 1990,
                    death_year: 2080,
                    is_adult: false,
                    incomes: vec![],
                },
            ],
            expenses: vec![],
        };
        assert_eq!(household.cash_owners_at_end_of(2024), vec!["Ann".to_string()]);
        assert_eq!(household.cash_owners_at_end_of(2025), vec!["Kid".to_string()]);
    }

    fn unborn_child(birth: Year) -> Person {
        Person {
            name: "Kid".to_string(),
            birth_year: birth,
            death_year: 2120,
            is_adult: false,
            incomes: vec![],
        }
    }

    #[test]
    fn child_born_later_is_not_alive_before_birth() {
        let kid = unborn_child(2035);
        assert!(!kid.is_alive_during(2025));
        assert!(!kid.is_alive_at_end_of(2025));
        assert!(kid.is_alive_during(2035));
        assert!(kid.is_alive_at_end_of(2035));
    }

    #[test]
    fn unborn_child_is_neither_fiscal_child_nor_survivor() {
        let household = Household {
            members: vec![adult("Ann", 1970, 2026), unborn_child(2035)],
            expenses: vec![],
        };
        assert_eq!(household.nb_of_fiscal_children(2025, 25), 0);
        assert!(household.children_alive_at_end_of(2026).is_empty());
        assert!(!household.is_anyone_alive_at_end_of(2026));
        assert!(household.cash_owners_at_end_of(2026).is_empty());
        assert_eq!(household.nb_of_fiscal_children(2036, 25), 1);
    }
}
