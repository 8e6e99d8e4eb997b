mod common;

use std::sync::atomic::{AtomicU64, Ordering};

use common::{linear_score, original_artifact, space_set, FakeBuilder, FakeOracle};
use evasion_core::search::QueryBudget;
use evasion_core::{
    Baseline, Label, ManipulationSpace, ModelProbe, ProbeResult, SearchConfig, SearchEngine, SearchState,
    StrategyKind, WorkerPool,
};
use evasion_types::FeatureCategory;
use tempfile::TempDir;

fn baseline(dir: &TempDir) -> Baseline {
    Baseline {
        label: Label::Malicious,
        score: 0.9,
        path: original_artifact(dir, "original.apk"),
    }
}

fn config(query_budget: u64, parallelism: usize) -> SearchConfig {
    SearchConfig {
        query_budget,
        n_features: 5,
        stagnation: 5,
        max_build_failures: 10,
        parallelism,
    }
}

#[test]
fn test_budget_twenty_scenario() {
    for strategy in [StrategyKind::Random, StrategyKind::Mutation] {
        for parallelism in [1, 4] {
            let dir = TempDir::new().unwrap();
            let builder = FakeBuilder::new(dir.path());
            let oracle = FakeOracle::new(|lines: &[String]| 0.9 - 0.004 * lines.len() as f64);
            let pool = WorkerPool::new(parallelism).unwrap();
            let space = ManipulationSpace::from_set(space_set(10, 5)).seal();
            let base = baseline(&dir);

            let engine = SearchEngine::new(&builder, &oracle, &pool, config(20, parallelism));
            let report = engine.run(&space, &base, strategy.build(7).as_mut(), &mut 0).unwrap();

            assert!(report.queries <= 20);
            assert_eq!(oracle.queries(), report.queries);
            match report.state {
                SearchState::Evaded => assert_eq!(report.best_label, Label::Benign),
                SearchState::BudgetExhausted | SearchState::Stagnated => assert!(report.best_score <= 0.9),
                other => panic!("unexpected state {other}"),
            }
        }
    }
}

#[test]
fn test_evades_and_keeps_only_best() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    let oracle = FakeOracle::new(linear_score(0.9, "urls", 0.2));
    let pool = WorkerPool::new(1).unwrap();
    let space = ManipulationSpace::from_set(space_set(10, 0)).seal();
    let base = baseline(&dir);

    let engine = SearchEngine::new(&builder, &oracle, &pool, config(100, 1));
    let report = engine.run(&space, &base, StrategyKind::Random.build(1).as_mut(), &mut 0).unwrap();

    assert_eq!(report.state, SearchState::Evaded);
    assert_eq!(report.best_label, Label::Benign);
    assert!(report.best_score < 0.5);
    assert_eq!(report.best_vector.len(), 5);
    assert!(report.best_path.exists());
    assert!(report.improved());
}

#[test]
fn test_never_worse_than_baseline() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    // Every manipulation makes detection more confident.
    let oracle = FakeOracle::new(|lines: &[String]| 0.9 + 0.01 * lines.len() as f64);
    let pool = WorkerPool::new(2).unwrap();
    let space = ManipulationSpace::from_set(space_set(6, 3)).seal();
    let base = baseline(&dir);

    let engine = SearchEngine::new(&builder, &oracle, &pool, config(30, 2));
    let report = engine.run(&space, &base, StrategyKind::Mutation.build(3).as_mut(), &mut 0).unwrap();

    assert_eq!(report.state, SearchState::Stagnated);
    assert_eq!(report.best_score, 0.9);
    assert_eq!(report.best_path, base.path);
    assert!(report.best_vector.is_empty());
    assert!(!report.improved());
    // Rejected artifacts are discarded.
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("manipulated_"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_build_failures_fail_the_search() {
    let dir = TempDir::new().unwrap();
    let set = space_set(3, 0);
    let broken: Vec<String> = set.iter().map(|c| c.to_string()).collect();
    let builder = FakeBuilder::new(dir.path()).breaking(broken);
    let oracle = FakeOracle::new(|_: &[String]| 0.9);
    let pool = WorkerPool::new(1).unwrap();
    let space = ManipulationSpace::from_set(set).seal();
    let base = baseline(&dir);

    let mut cfg = config(50, 1);
    cfg.stagnation = 100;
    cfg.max_build_failures = 4;
    let engine = SearchEngine::new(&builder, &oracle, &pool, cfg);
    let report = engine.run(&space, &base, StrategyKind::Random.build(0).as_mut(), &mut 0).unwrap();

    assert_eq!(report.state, SearchState::Failed);
    assert_eq!(report.build_failures, 4);
    assert_eq!(report.queries, 0);
    assert!(report.reason.is_some());
}

#[test]
fn test_empty_active_space_fails() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    let oracle = FakeOracle::new(|_: &[String]| 0.9);
    let pool = WorkerPool::new(1).unwrap();
    let mut space = ManipulationSpace::from_set(space_set(2, 0));
    space.disable_category(FeatureCategory::Urls);
    let base = baseline(&dir);

    let engine = SearchEngine::new(&builder, &oracle, &pool, config(10, 1));
    let report = engine.run(&space.seal(), &base, StrategyKind::Random.build(0).as_mut(), &mut 0).unwrap();
    assert_eq!(report.state, SearchState::Failed);
    assert_eq!(report.queries, 0);
    assert_eq!(builder.applies(), 0);
}

#[test]
fn test_oracle_error_aborts() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    let oracle = FakeOracle::new(|_: &[String]| 0.9).failing_on_manipulated();
    let pool = WorkerPool::new(1).unwrap();
    let space = ManipulationSpace::from_set(space_set(4, 0)).seal();
    let base = baseline(&dir);

    let engine = SearchEngine::new(&builder, &oracle, &pool, config(10, 1));
    let mut queries = 0;
    let err = engine
        .run(&space, &base, StrategyKind::Random.build(0).as_mut(), &mut queries)
        .unwrap_err();
    assert_eq!(err.kind_name(), "oracle_error");
    assert_eq!(queries, 1);
}

#[test]
fn test_oracle_error_mid_search_counts_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    // Every vector improves slightly, so a manipulated best is held when the classifier fails.
    let oracle = FakeOracle::new(linear_score(0.9, "urls", 0.001)).failing_after(4);
    let pool = WorkerPool::new(1).unwrap();
    let space = ManipulationSpace::from_set(space_set(6, 0)).seal();
    let base = baseline(&dir);

    let mut cfg = config(50, 1);
    cfg.stagnation = 100;
    let engine = SearchEngine::new(&builder, &oracle, &pool, cfg);
    let mut queries = 3;
    let err = engine
        .run(&space, &base, StrategyKind::Random.build(5).as_mut(), &mut queries)
        .unwrap_err();

    assert_eq!(err.kind_name(), "oracle_error");
    assert_eq!(oracle.queries(), 5);
    assert_eq!(queries, 3 + 5);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("manipulated_"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_probe_disables_inert_categories() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    // Only URL injections move the score.
    let oracle = FakeOracle::new(linear_score(0.9, "urls", 0.01));
    let pool = WorkerPool::new(2).unwrap();
    let mut space = ManipulationSpace::from_set(space_set(3, 3));

    let mut queries = 0;
    let report = ModelProbe::new(&builder, &oracle, &pool).run(&mut space, 0.9, &mut queries).unwrap();

    assert_eq!(report.queries, 2);
    assert_eq!(queries, 2);
    assert!(matches!(report.results[&FeatureCategory::Urls], ProbeResult::Sensitive { .. }));
    assert!(matches!(report.results[&FeatureCategory::Activities], ProbeResult::Inert { .. }));
    assert_eq!(report.disabled(), vec![FeatureCategory::Activities]);
    assert!(space.disabled_categories().contains(&FeatureCategory::Activities));

    let sealed = space.seal();
    assert_eq!(sealed.active_indices(), &[0, 1, 2]);
}

#[test]
fn test_probe_build_failure_keeps_category() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path()).breaking(["activities::com.mal.Act1"]);
    let oracle = FakeOracle::new(|_: &[String]| 0.9);
    let pool = WorkerPool::new(1).unwrap();
    let mut space = ManipulationSpace::from_set(space_set(2, 2));

    let report = ModelProbe::new(&builder, &oracle, &pool).run(&mut space, 0.9, &mut 0).unwrap();

    assert_eq!(report.queries, 1);
    assert!(matches!(
        report.results[&FeatureCategory::Activities],
        ProbeResult::BuildFailed { .. }
    ));
    assert_eq!(report.disabled(), vec![FeatureCategory::Urls]);
}

#[test]
fn test_probe_oracle_error_still_counts_queries() {
    let dir = TempDir::new().unwrap();
    let builder = FakeBuilder::new(dir.path());
    let oracle = FakeOracle::new(|_: &[String]| 0.9).failing_after(1);
    let pool = WorkerPool::new(1).unwrap();
    let mut space = ManipulationSpace::from_set(space_set(2, 2));

    let mut queries = 0;
    let err = ModelProbe::new(&builder, &oracle, &pool)
        .run(&mut space, 0.9, &mut queries)
        .unwrap_err();
    assert_eq!(err.kind_name(), "oracle_error");
    assert_eq!(queries, 2);
    assert_eq!(oracle.queries(), 2);
}

#[test]
fn test_budget_never_overshoots() {
    let budget = QueryBudget::new(25);
    let granted = AtomicU64::new(0);
    let pool = WorkerPool::new(8).unwrap();
    let items: Vec<usize> = (0..200).collect();
    pool.map(&items, |_, _| {
        if budget.try_consume() {
            granted.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(granted.load(Ordering::SeqCst), 25);
    assert_eq!(budget.consumed(), 25);
    assert!(budget.is_exhausted());
}
