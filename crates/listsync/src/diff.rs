//! Record set comparison
//!
//! Pure functions: no I/O, no logging. Records are compared by id and an
//! opaque revision tag only; field contents are never inspected.

use std::collections::{HashMap, HashSet};

/// Changes required to bring a local record set in line with the source
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult<T> {
    pub to_insert: Vec<T>,
    pub to_update: Vec<T>,
    pub to_delete: Vec<String>,
}

impl<T> DiffResult<T> {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

impl<T> Default for DiffResult<T> {
    fn default() -> Self {
        Self {
            to_insert: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

/// Compare a full snapshot from the source against the local records.
///
/// Unknown ids are inserted, known ids with a different revision are
/// updated, and local ids missing from the snapshot are deleted.
pub fn diff_full<T, I, R>(existing: &[T], incoming: Vec<T>, id: I, revision: R) -> DiffResult<T>
where
    I: Fn(&T) -> &str,
    R: Fn(&T) -> &str,
{
    let mut known: HashMap<&str, &str> = HashMap::with_capacity(existing.len());
    for record in existing {
        known.insert(id(record), revision(record));
    }

    let mut result = DiffResult::default();
    let mut matched: HashSet<String> = HashSet::new();

    for record in last_write_wins(incoming, &id) {
        let record_id = id(&record).to_string();
        match known.get(record_id.as_str()) {
            Some(known_revision) => {
                if *known_revision != revision(&record) {
                    result.to_update.push(record);
                }
                matched.insert(record_id);
            }
            None => result.to_insert.push(record),
        }
    }

    let mut emitted: HashSet<&str> = HashSet::new();
    for record in existing {
        let record_id = id(record);
        if !matched.contains(record_id) && emitted.insert(record_id) {
            result.to_delete.push(record_id.to_string());
        }
    }

    result
}

/// Classify an incremental change set against the local records.
///
/// An empty revision is the source's deletion marker. Records absent from
/// `changes` are unchanged and never deleted.
pub fn diff_delta<T, I, R>(existing: &[T], changes: Vec<T>, id: I, revision: R) -> DiffResult<T>
where
    I: Fn(&T) -> &str,
    R: Fn(&T) -> &str,
{
    let known: HashSet<&str> = existing.iter().map(|r| id(r)).collect();
    let mut result = DiffResult::default();

    for record in last_write_wins(changes, &id) {
        if revision(&record).is_empty() {
            result.to_delete.push(id(&record).to_string());
        } else if known.contains(id(&record)) {
            result.to_update.push(record);
        } else {
            result.to_insert.push(record);
        }
    }

    result
}

/// Drop all but the last occurrence of each id, keeping input order.
fn last_write_wins<T, I>(records: Vec<T>, id: &I) -> Vec<T>
where
    I: Fn(&T) -> &str,
{
    let mut last_index: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        last_index.insert(id(record).to_string(), index);
    }

    if last_index.len() == records.len() {
        return records;
    }

    records
        .into_iter()
        .enumerate()
        .filter(|(index, record)| last_index.get(id(record)) == Some(index))
        .map(|(_, record)| record)
        .collect()
}
