//! Policy Combination Properties
//!
//! - A row is visible iff at least one select policy grants it
//! - Adding a policy never removes a row from the result
//! - Symmetric relationships: one edge serves both endpoints

mod common;

use common::*;
use proptest::prelude::*;
use rowguard::engine::{DecisionEngine, EngineConfig, ReadOutcome};
use rowguard::policy::{Expr, Policy, PolicyRegistry, Predicate};
use rowguard::relationship::{Edge, MemoryRelationshipSource};
use rowguard::{Identity, Role, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Policy `i` grants exactly the rows whose index is in `grants[i]`
fn grant_registry(grants: &[HashSet<usize>]) -> PolicyRegistry {
    let mut registry = PolicyRegistry::new();
    for (i, granted) in grants.iter().enumerate() {
        let ids: HashSet<String> = granted.iter().map(|n| format!("r{}", n)).collect();
        registry
            .register(Policy::select(
                format!("policy_{}", i),
                "items",
                Predicate::native(format!("row in set {}", i), move |scope| {
                    Ok(ids.contains(scope.row().id()))
                }),
            ))
            .unwrap();
    }
    registry
}

fn candidates(count: usize) -> Vec<Row> {
    (0..count).map(|n| Row::new("items", format!("r{}", n))).collect()
}

fn read(engine: &DecisionEngine, rows: Vec<Row>) -> ReadOutcome {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(engine.filter_for_read(
        &Identity::new("viewer", Role::User),
        "items",
        rows,
        &CancellationToken::new(),
    ))
}

fn engine(registry: PolicyRegistry, parallel_threshold: usize) -> DecisionEngine {
    engine_with(
        registry,
        friendships(&[]),
        row_source(Vec::new()),
        EngineConfig {
            parallel_threshold,
            max_workers: 3,
            ..Default::default()
        },
    )
}

fn grants_strategy(rows: usize) -> impl Strategy<Value = Vec<HashSet<usize>>> {
    prop::collection::vec(prop::collection::hash_set(0..rows, 0..rows), 0..5)
}

proptest! {
    #[test]
    fn prop_visible_iff_some_policy_grants(
        (count, grants) in (1usize..24).prop_flat_map(|n| (Just(n), grants_strategy(n))),
        parallel_threshold in 0usize..32,
    ) {
        let outcome = read(&engine(grant_registry(&grants), parallel_threshold), candidates(count));

        let expected: Vec<String> = (0..count)
            .filter(|n| grants.iter().any(|g| g.contains(n)))
            .map(|n| format!("r{}", n))
            .collect();
        let visible: Vec<String> = outcome.rows.iter().map(|r| r.id().to_string()).collect();
        prop_assert_eq!(visible, expected);
        prop_assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn prop_adding_a_policy_never_removes_rows(
        (count, grants, extra) in (1usize..24).prop_flat_map(|n| {
            (Just(n), grants_strategy(n), prop::collection::hash_set(0..n, 0..n))
        }),
    ) {
        let before = read(&engine(grant_registry(&grants), 64), candidates(count));

        let mut widened = grants.clone();
        widened.push(extra);
        let after = read(&engine(grant_registry(&widened), 64), candidates(count));

        let after_ids: HashSet<&str> = after.rows.iter().map(|r| r.id()).collect();
        for row in &before.rows {
            prop_assert!(after_ids.contains(row.id()));
        }
    }

    #[test]
    fn prop_single_edge_serves_both_endpoints(
        a in "[a-m]{1,6}",
        b in "[n-z]{1,6}",
    ) {
        let registry = PolicyRegistry::new()
            .with_policy(Policy::select("friends", "profiles", Expr::related("friendships", "id")))
            .unwrap();
        let relationships = MemoryRelationshipSource::from_edges(vec![Edge::new("friendships", a.as_str(), b.as_str())]);
        let engine = engine_with(registry, Arc::new(relationships), row_source(Vec::new()), EngineConfig::default());
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        for (viewer, other) in [(&a, &b), (&b, &a)] {
            let outcome = runtime.block_on(engine.filter_for_read(
                &Identity::new(viewer.as_str(), Role::User),
                "profiles",
                vec![Row::new("profiles", other.as_str())],
                &CancellationToken::new(),
            ));
            prop_assert_eq!(outcome.rows.len(), 1);
        }
    }
}
