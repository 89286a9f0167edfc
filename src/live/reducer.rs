//! Pure merge of change events into a collection

use crate::models::Record;
use crate::realtime::ChangeEvent;

/// Where inserted rows go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Tail of the list (chronological threads)
    Append,
    /// Head of the list, keeping at most `cap` rows (newest-first feeds)
    Prepend { cap: usize },
}

/// Apply one event; returns whether the collection changed
///
/// Inserts are dropped when the id is already present. Updates and deletes
/// for ids not present are no-ops.
pub fn apply<T: Record>(items: &mut Vec<T>, event: ChangeEvent<T>, policy: InsertPolicy) -> bool {
    match event {
        ChangeEvent::Inserted(record) => {
            if items.iter().any(|r| r.id() == record.id()) {
                return false;
            }
            match policy {
                InsertPolicy::Append => items.push(record),
                InsertPolicy::Prepend { cap } => {
                    items.insert(0, record);
                    items.truncate(cap);
                }
            }
            true
        }
        ChangeEvent::Updated(record) => match items.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        },
        ChangeEvent::Deleted(id) => {
            let before = items.len();
            items.retain(|r| r.id() != id);
            items.len() != before
        }
    }
}
