//! Property tests for work catalog resolution

use std::collections::HashSet;
use std::io::Write;

use proptest::prelude::*;
use safer_ingest::catalog::{load_identifiers, plan, resolve};
use safer_ingest::Identifier;
use tempfile::NamedTempFile;

fn identifier() -> impl Strategy<Value = Identifier> {
    "[0-9]{1,4}".prop_map(Identifier::new)
}

fn universe() -> impl Strategy<Value = Vec<Identifier>> {
    prop::collection::vec(identifier(), 0..200)
}

fn persisted() -> impl Strategy<Value = HashSet<Identifier>> {
    prop::collection::hash_set(identifier(), 0..100)
}

proptest! {
    #[test]
    fn resolve_is_set_difference(universe in universe(), persisted in persisted()) {
        let todo = resolve(universe.clone(), &persisted);

        let expected: HashSet<_> = universe
            .iter()
            .filter(|id| !persisted.contains(*id))
            .cloned()
            .collect();
        let actual: HashSet<_> = todo.iter().cloned().collect();

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(todo.len(), todo.iter().collect::<HashSet<_>>().len());
    }

    #[test]
    fn resolve_ignores_input_order(universe in universe(), persisted in persisted()) {
        let mut reversed = universe.clone();
        reversed.reverse();

        let forward: HashSet<_> = resolve(universe, &persisted).into_iter().collect();
        let backward: HashSet<_> = resolve(reversed, &persisted).into_iter().collect();

        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn plan_limit_takes_a_prefix(
        universe in universe(),
        persisted in persisted(),
        limit in 0usize..50,
    ) {
        let full = resolve(universe.clone(), &persisted);
        let capped = plan(universe, Ok(persisted), Some(limit));

        prop_assert_eq!(capped.todo.len(), full.len().min(limit));
        prop_assert_eq!(&capped.todo[..], &full[..capped.todo.len()]);
        prop_assert_eq!(capped.truncated, full.len() - capped.todo.len());
        prop_assert!(!capped.degraded);
    }

    #[test]
    fn csv_round_trip_dedupes_in_order(values in prop::collection::vec("[0-9]{1,6}", 1..50)) {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "DOT_NUMBER").unwrap();
        for value in &values {
            writeln!(file, " {value} ").unwrap();
        }
        file.flush().unwrap();

        let loaded = load_identifiers(file.path(), "DOT_NUMBER").unwrap();

        let mut seen = HashSet::new();
        let expected: Vec<Identifier> = values
            .iter()
            .filter(|v| seen.insert(v.to_string()))
            .map(Identifier::new)
            .collect();
        prop_assert_eq!(loaded, expected);
    }
}
