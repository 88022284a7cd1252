use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;

use uuid::Uuid;

use crate::types::{Cell, FinalRow, KeyPart};

/// Identity of a final row in a deduplicated stream.
///
/// Built from the key parts computed while typing the row. A null component is kept distinct
/// from every string so that `NULL` never collides with the text `"NULL"`, and a value that
/// failed typing keeps its raw text instead of collapsing into null.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<KeyPart>);

/// Deduplicates final rows by primary key, keeping the row with the greatest
/// `(cursor, extracted_at)` ordering key.
///
/// When both components are equal the row seen last wins, which matches arrival order since
/// rows are always fed in extraction order.
#[derive(Debug, Clone)]
pub struct RowDeduplicator {
    cursor: Option<usize>,
}

impl RowDeduplicator {
    pub fn new(cursor: Option<usize>) -> Self {
        Self { cursor }
    }

    pub fn key(&self, row: &FinalRow) -> PrimaryKey {
        PrimaryKey(row.primary_key.clone())
    }

    /// Compares the ordering keys of two rows. A null or missing cursor sorts first.
    pub fn compare(&self, a: &FinalRow, b: &FinalRow) -> Ordering {
        let cursor_ordering = match self.cursor {
            Some(index) => cursor_cell(a, index).compare(cursor_cell(b, index)),
            None => Ordering::Equal,
        };

        cursor_ordering.then_with(|| a.extracted_at.cmp(&b.extracted_at))
    }

    /// Returns `true` if `candidate` should replace `existing`.
    pub fn supersedes(&self, candidate: &FinalRow, existing: &FinalRow) -> bool {
        candidate.raw_id == existing.raw_id || self.compare(candidate, existing) != Ordering::Less
    }

    /// Reduces a batch to one row per primary key, keeping first-seen key order.
    pub fn deduplicate(&self, rows: Vec<FinalRow>) -> Vec<FinalRow> {
        let mut positions: HashMap<PrimaryKey, usize> = HashMap::new();
        let mut deduplicated: Vec<FinalRow> = Vec::with_capacity(rows.len());

        for row in rows {
            let key = self.key(&row);
            match positions.get(&key) {
                Some(&position) => {
                    if self.supersedes(&row, &deduplicated[position]) {
                        deduplicated[position] = row;
                    }
                }
                None => {
                    positions.insert(key, deduplicated.len());
                    deduplicated.push(row);
                }
            }
        }

        deduplicated
    }

    /// Upserts `staged` into `target` and returns the number of rows inserted or replaced.
    pub fn merge_into(&self, target: &mut Vec<FinalRow>, staged: Vec<FinalRow>) -> u64 {
        let mut positions: HashMap<PrimaryKey, usize> = target
            .iter()
            .enumerate()
            .map(|(position, row)| (self.key(row), position))
            .collect();

        let mut affected = 0;
        for row in staged {
            let key = self.key(&row);
            match positions.get(&key) {
                Some(&position) => {
                    if self.supersedes(&row, &target[position]) {
                        target[position] = row;
                        affected += 1;
                    }
                }
                None => {
                    positions.insert(key, target.len());
                    target.push(row);
                    affected += 1;
                }
            }
        }

        affected
    }
}

/// Appends the staged rows whose raw id is not yet in `target`, returning how many were added.
pub fn append_into(target: &mut Vec<FinalRow>, staged: Vec<FinalRow>) -> u64 {
    let mut seen: HashSet<Uuid> = target.iter().map(|row| row.raw_id).collect();

    let mut affected = 0;
    for row in staged {
        if seen.insert(row.raw_id) {
            target.push(row);
            affected += 1;
        }
    }

    affected
}

fn cursor_cell(row: &FinalRow, index: usize) -> &Cell {
    row.values.get(index).unwrap_or(&Cell::Null)
}
