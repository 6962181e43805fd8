use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedValueTable {
    pub values: Vec<NamedValue>,
}

impl NamedValueTable {
    pub fn append(&mut self, name: impl Into<String>, value: f64) {
        self.values.push(NamedValue {
            name: name.into(),
            value: round_cents(value),
        });
    }

    pub fn total(&self) -> f64 {
        self.values.iter().map(|v| v.value).sum()
    }

    pub fn filtered_total(&self, names: &HashSet<String>) -> f64 {
        self.values
            .iter()
            .filter(|v| names.contains(&v.name))
            .map(|v| v.value)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Named amounts grouped by category. Totals are always derived from the entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValuedLedger<C: Ord> {
    per_category: BTreeMap<C, NamedValueTable>,
}

impl<C: Ord> Default for ValuedLedger<C> {
    fn default() -> Self {
        Self {
            per_category: BTreeMap::new(),
        }
    }
}

impl<C: Ord + Copy> ValuedLedger<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, category: C, name: impl Into<String>, value: f64) {
        self.per_category
            .entry(category)
            .or_default()
            .append(name, value);
    }

    pub fn total(&self) -> f64 {
        self.per_category.values().map(NamedValueTable::total).sum()
    }

    pub fn total_of(&self, category: C) -> f64 {
        self.per_category
            .get(&category)
            .map(NamedValueTable::total)
            .unwrap_or(0.0)
    }

    pub fn filtered_total(&self, names: &HashSet<String>) -> f64 {
        self.per_category
            .values()
            .map(|table| table.filtered_total(names))
            .sum()
    }

    pub fn category(&self, category: C) -> Option<&NamedValueTable> {
        self.per_category.get(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (C, &NamedValueTable)> {
        self.per_category.iter().map(|(c, t)| (*c, t))
    }

    pub fn entries(&self) -> impl Iterator<Item = (C, &NamedValue)> {
        self.per_category
            .iter()
            .flat_map(|(c, t)| t.values.iter().map(move |v| (*c, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    enum Cat {
        A,
        B,
    }

    #[test]
    fn totals_by_category_and_filtered_names() {
        let mut ledger = ValuedLedger::new();
        ledger.append(Cat::A, "salary Ann", 1_000.0);
        ledger.append(Cat::A, "salary Bob", 500.0);
        ledger.append(Cat::B, "rent flat", -200.0);

        assert_eq!(ledger.total(), 1_300.0);
        assert_eq!(ledger.total_of(Cat::A), 1_500.0);
        assert_eq!(ledger.total_of(Cat::B), -200.0);

        let names: HashSet<String> = ["salary Bob", "rent flat"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ledger.filtered_total(&names), 300.0);
    }

    #[test]
    fn appended_values_are_rounded_to_the_cent() {
        let mut table = NamedValueTable::default();
        table.append("x", 10.005_1);
        table.append("y", 0.333_3);
        assert_eq!(table.values[0].value, 10.01);
        assert_eq!(table.values[1].value, 0.33);
    }

    #[test]
    fn missing_category_totals_zero() {
        let ledger: ValuedLedger<Cat> = ValuedLedger::new();
        assert_eq!(ledger.total_of(Cat::B), 0.0);
        assert_eq!(ledger.total(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_total_equals_sum_of_categories_and_entries(
            values in proptest::collection::vec((0u8..2, -1_000_000i64..1_000_000), 0..40)
        ) {
            let mut ledger = ValuedLedger::new();
            for (i, (cat, cents)) in values.iter().enumerate() {
                let cat = if *cat == 0 { Cat::A } else { Cat::B };
                ledger.append(cat, format!("e{i}"), *cents as f64 / 100.0);
            }
            let by_category = ledger.total_of(Cat::A) + ledger.total_of(Cat::B);
            let by_entry: f64 = ledger.entries().map(|(_, v)| v.value).sum();
            prop_assert!((ledger.total() - by_category).abs() <= 1e-6);
            prop_assert!((ledger.total() - by_entry).abs() <= 1e-6);
        }
    }
}
