use std::{collections::HashMap, fmt, hash::Hash};

use crate::access_log::AccessRecord;

/// Keys with their occurrence counts, highest count first. Equal counts keep
/// the order in which each key was first seen.
pub type FrequencyTable<K> = Vec<(K, usize)>;

pub fn total_count(records: &[AccessRecord]) -> usize {
    records.len()
}

pub fn count_by_code(records: &[AccessRecord], code: u16) -> usize {
    records.iter().filter(|record| record.status == code).count()
}

pub fn count_by_codes(records: &[AccessRecord], codes: &[u16]) -> usize {
    records
        .iter()
        .filter(|record| codes.contains(&record.status))
        .count()
}

pub fn frequency_by<'a, T, K, F>(
    records: impl IntoIterator<Item = &'a T>,
    key: F,
) -> FrequencyTable<K>
where
    T: 'a,
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut table: FrequencyTable<K> = Vec::new();
    for record in records {
        let key = key(record);
        match positions.get(&key) {
            Some(&position) => table[position].1 += 1,
            None => {
                positions.insert(key.clone(), table.len());
                table.push((key, 1));
            }
        }
    }

    // stable: ties stay in first-seen order
    table.sort_by(|a, b| b.1.cmp(&a.1));
    table
}

pub fn frequency_by_path<'a>(
    records: impl IntoIterator<Item = &'a AccessRecord>,
) -> FrequencyTable<String> {
    frequency_by(records, |record: &AccessRecord| record.path.clone())
}

pub fn frequency_by_ip<'a>(
    records: impl IntoIterator<Item = &'a AccessRecord>,
) -> FrequencyTable<String> {
    frequency_by(records, |record: &AccessRecord| record.ip_addr.clone())
}

pub fn frequency_by_code<'a>(
    records: impl IntoIterator<Item = &'a AccessRecord>,
) -> FrequencyTable<u16> {
    frequency_by(records, |record: &AccessRecord| record.status)
}

pub fn unique_count<K>(table: &FrequencyTable<K>) -> usize {
    table.len()
}

pub fn top<K>(table: &FrequencyTable<K>, n: usize) -> &[(K, usize)] {
    &table[..n.min(table.len())]
}

/// A share of a total in hundredths of a percent.
///
/// Rounding is half up, done in integer arithmetic so the rendered value never
/// depends on floating point representation: 1 of 160 is `0.63`, 1 of 8 is
/// `12.50`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Percentage {
    hundredths: u64,
}

impl Percentage {
    pub fn of(count: usize, total: usize) -> Self {
        if total == 0 {
            return Self { hundredths: 0 };
        }
        let count = count as u64;
        let total = total as u64;
        Self {
            hundredths: (count * 20_000 + total) / (2 * total),
        }
    }

    pub fn hundredths(self) -> u64 {
        self.hundredths
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.hundredths / 100, self.hundredths % 100)
    }
}
