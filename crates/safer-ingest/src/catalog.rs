//! Work catalog: which identifiers still need a fetch
//!
//! The universe comes from a CSV file. The persisted set comes from the
//! store; when that lookup fails the run proceeds with the full universe
//! rather than aborting, trading a re-fetch for availability.

use std::collections::HashSet;
use std::path::Path;

use safer_common::SaferError;
use tracing::{info, warn};

use crate::models::Identifier;
use crate::storage::{RecordStore, StoreError};

/// Load identifiers from one column of a CSV file
///
/// Values are trimmed, blanks skipped and duplicates collapsed, keeping
/// first-seen order. A file with a single column is read regardless of
/// its header name.
pub fn load_identifiers(path: &Path, column: &str) -> safer_common::Result<Vec<Identifier>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let index = headers
        .iter()
        .position(|h| h == column)
        .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(column)))
        .or_else(|| (headers.len() == 1).then_some(0))
        .ok_or_else(|| SaferError::MissingColumn {
            column: column.to_string(),
            path: path.display().to_string(),
            available: headers.iter().collect::<Vec<_>>().join(", "),
        })?;

    let mut seen = HashSet::new();
    let mut identifiers = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(value) = row.get(index) else {
            continue;
        };
        let id = Identifier::new(value);
        if !id.is_empty() && seen.insert(id.clone()) {
            identifiers.push(id);
        }
    }

    info!(
        path = %path.display(),
        column,
        count = identifiers.len(),
        "Loaded identifier catalog"
    );
    Ok(identifiers)
}

/// `universe - persisted`, deduplicated, in first-seen order
pub fn resolve<I>(universe: I, persisted: &HashSet<Identifier>) -> Vec<Identifier>
where
    I: IntoIterator<Item = Identifier>,
{
    let mut seen = HashSet::new();
    universe
        .into_iter()
        .filter(|id| !persisted.contains(id))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Outcome of resolving the todo list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoPlan {
    pub todo: Vec<Identifier>,
    /// Distinct identifiers in the catalog
    pub universe: usize,
    /// Identifiers the store reported as already persisted
    pub persisted: usize,
    /// True when the persisted lookup failed and the full universe is used
    pub degraded: bool,
    /// Todo entries dropped by the cap
    pub truncated: usize,
}

/// Combine the universe with the persisted-set lookup and an optional cap
///
/// A failed lookup is logged and treated as an empty persisted set. The cap
/// keeps the first `limit` entries.
pub fn plan(
    universe: Vec<Identifier>,
    persisted: Result<HashSet<Identifier>, StoreError>,
    limit: Option<usize>,
) -> TodoPlan {
    let (persisted, degraded) = match persisted {
        Ok(set) => (set, false),
        Err(e) => {
            warn!(error = %e, "Could not read persisted identifiers, proceeding with the full catalog");
            (HashSet::new(), true)
        }
    };

    let universe_size = universe.iter().collect::<HashSet<_>>().len();
    let mut todo = resolve(universe, &persisted);
    let mut truncated = 0;
    if let Some(limit) = limit {
        if todo.len() > limit {
            truncated = todo.len() - limit;
            todo.truncate(limit);
            info!(limit, "Limiting todo list");
        }
    }

    info!(
        total = universe_size,
        already_done = persisted.len(),
        todo = todo.len(),
        "Resolved work catalog"
    );

    TodoPlan {
        todo,
        universe: universe_size,
        persisted: persisted.len(),
        degraded,
        truncated,
    }
}

/// Resolve the todo list using a store connection opened for this purpose
///
/// `store` is the result of opening that connection, so a failed connect
/// degrades exactly like a failed query.
pub async fn resolve_todo<S>(
    universe: Vec<Identifier>,
    store: Result<S, StoreError>,
    limit: Option<usize>,
) -> TodoPlan
where
    S: RecordStore,
{
    let persisted = match store {
        Ok(mut store) => {
            let result = store.existing_identifiers().await;
            if let Err(e) = store.close().await {
                warn!(error = %e, "Failed to close catalog connection");
            }
            result
        }
        Err(e) => Err(e),
    };

    plan(universe, persisted, limit)
}
