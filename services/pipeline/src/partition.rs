//! Period and destination partitioning of a normalized batch

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::records::{Destination, Transaction};

/// A (calendar year, calendar month) pair: the unit of replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

/// Distinct periods of a set of dates, in calendar order.
pub fn periods<I>(dates: I) -> BTreeSet<Period>
where
    I: IntoIterator<Item = NaiveDate>,
{
    dates.into_iter().map(Period::of).collect()
}

/// Transactions of one upload, split by destination table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionBatch {
    pub periods: BTreeSet<Period>,
    pub groups: BTreeMap<Destination, Vec<Transaction>>,
}

impl TransactionBatch {
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn group(&self, dest: Destination) -> &[Transaction] {
        self.groups.get(&dest).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn partition(txs: Vec<Transaction>) -> TransactionBatch {
    let periods = periods(txs.iter().map(|t| t.fecha));
    let mut groups: BTreeMap<Destination, Vec<Transaction>> = BTreeMap::new();
    for tx in txs {
        groups
            .entry(Destination::for_account(&tx.cuenta))
            .or_default()
            .push(tx);
    }
    TransactionBatch { periods, groups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixtures::transaction;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_periods_are_distinct_and_ordered() {
        let set = periods(vec![date(2024, 2, 10), date(2023, 12, 31), date(2024, 2, 1)]);
        let got: Vec<Period> = set.into_iter().collect();
        assert_eq!(
            got,
            vec![
                Period { year: 2023, month: 12 },
                Period { year: 2024, month: 2 }
            ]
        );
    }

    #[test]
    fn test_partition_routes_by_account() {
        let batch = partition(vec![
            transaction(date(2024, 1, 3), "BCP"),
            transaction(date(2024, 1, 4), "Personal"),
            transaction(date(2024, 2, 5), "Kilometraje"),
            transaction(date(2024, 2, 6), "Efectivo"),
        ]);

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.periods.len(), 2);
        assert_eq!(batch.group(Destination::Ledger).len(), 2);
        assert!(batch
            .group(Destination::Ledger)
            .iter()
            .all(|t| t.cuenta != "Personal" && t.cuenta != "Kilometraje"));
        assert_eq!(batch.group(Destination::Emotional)[0].cuenta, "Personal");
        assert_eq!(batch.group(Destination::Mileage)[0].cuenta, "Kilometraje");
    }

    #[test]
    fn test_partition_empty() {
        let batch = partition(vec![]);
        assert!(batch.is_empty());
        assert!(batch.periods.is_empty());
        assert!(batch.group(Destination::Emotional).is_empty());
    }
}
