//! Parent relationships between tickets.
//!
//! A child records its parent as a `parent:<id>` entry in `related`. The
//! transitive parent graph must stay a DAG; any edit that would close a
//! cycle is refused before anything is written.

use std::collections::HashSet;

use crate::errors::FlowError;
use crate::store::TicketStore;

/// Check that making `parent_id` the parent of `child_id` keeps the graph
/// acyclic.
///
/// Walks up from the prospective parent following `parent:` edges. Seeing
/// the child (or the child-to-be, for tickets not yet written) means the
/// edit would close a cycle. A cycle among *pre-existing* tickets only
/// terminates the walk; refusing the edit for data we did not just corrupt
/// would make every edit fail forever.
pub fn ensure_no_cycle(
    store: &TicketStore,
    child_id: &str,
    parent_id: &str,
) -> Result<(), FlowError> {
    if parent_id == child_id {
        return Err(FlowError::circular_parent(child_id, parent_id));
    }

    let mut visited = HashSet::new();
    let mut current = parent_id.to_string();
    loop {
        if current == child_id {
            return Err(FlowError::circular_parent(child_id, parent_id));
        }
        if !visited.insert(current.clone()) {
            log::warn!("parent graph already contains a cycle through {current}");
            return Ok(());
        }
        let Ok(ticket) = store.get(&current) else {
            // Dangling parent reference; nothing further to walk.
            return Ok(());
        };
        match ticket.parent() {
            Some(next) => current = next.to_string(),
            None => return Ok(()),
        }
    }
}
