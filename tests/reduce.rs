mod common;

use std::sync::Arc;

use datasieve::job::JobBuilder;
use datasieve::result::{
    AnalyzerResultReducer, COLUMN_FREQUENCY, Crosstab, CrosstabDimension, CrosstabReducer,
    CrosstabResult, DIMENSION_COLUMN, DIMENSION_MEASURE, MEASURE_LEAST_FREQUENT,
    MEASURE_MOST_FREQUENT, Number, ValueCombinationReducer, value_combination_crosstab,
};
use datasieve::{
    AnalysisJob, AnalysisRunner, AnalyzerResultRef, DistributedAnalysisRunner, EngineConfig,
    EngineError, RowSource,
};

use common::{Collect, Count, row_count, text_rows};

fn counting_job() -> Result<AnalysisJob, EngineError> {
    let mut builder = JobBuilder::new(["name"]);
    builder.analyzer(Count::default()).name("rows").input("name").register();
    builder.build()
}

fn distributed() -> DistributedAnalysisRunner {
    let config = EngineConfig {
        threads: Some(2),
        ..EngineConfig::default()
    };
    DistributedAnalysisRunner::new(AnalysisRunner::new(config).unwrap())
}

#[test]
fn test_distributed_counts_are_summed() {
    let partitions = vec![
        RowSource::from_values(["name"], text_rows(&["a", "b", "c"])),
        RowSource::from_values(["name"], text_rows(&["d", "e", "f", "g"])),
    ];

    let future = distributed().run(counting_job, partitions).unwrap();

    assert!(future.is_successful());
    let job = counting_job().unwrap();
    let (id, _, _) = job.jobs().next().unwrap();
    assert_eq!(row_count(&future.result(id).unwrap()), Some(Number::from(7)));
}

#[test]
fn test_analyzer_without_reducer_is_not_distributable() {
    let factory = || {
        let mut builder = JobBuilder::new(["name"]);
        builder.analyzer(Collect::new("name")).name("collect").input("name").register();
        builder.build()
    };
    let partitions = vec![RowSource::from_values(["name"], text_rows(&["a"]))];

    let result = distributed().run(factory, partitions);

    assert!(matches!(result, Err(EngineError::NotDistributable(name)) if name == "collect"));
}

#[test]
fn test_no_partitions() {
    assert!(matches!(
        distributed().run(counting_job, Vec::new()),
        Err(EngineError::NoPartitions)
    ));
}

fn distribution(values: &[(&str, i64)]) -> AnalyzerResultRef {
    let mut crosstab = Crosstab::new(vec![
        CrosstabDimension::with_categories(DIMENSION_COLUMN, ["name"]),
        CrosstabDimension::new("Value"),
    ])
    .unwrap();
    for (value, count) in values {
        crosstab
            .put(&[(DIMENSION_COLUMN, "name"), ("Value", *value)], *count)
            .unwrap();
    }
    Arc::new(CrosstabResult::new(crosstab))
}

#[test]
fn test_crosstab_reduction_commutes() {
    let reducer = CrosstabReducer::with_open_dimensions(["Value"]);
    let left = distribution(&[("ada", 2), ("bob", 1)]);
    let right = distribution(&[("bob", 3), ("cy", 4)]);

    let forward = reducer.reduce(&[left.clone(), right.clone()]).unwrap();
    let backward = reducer.reduce(&[right, left]).unwrap();

    let forward = forward.downcast_ref::<CrosstabResult>().unwrap().crosstab();
    let backward = backward.downcast_ref::<CrosstabResult>().unwrap().crosstab();

    for value in ["ada", "bob", "cy"] {
        let coords = [(DIMENSION_COLUMN, "name"), ("Value", value)];
        assert_eq!(forward.get(&coords), backward.get(&coords));
    }
    assert_eq!(
        forward.get(&[(DIMENSION_COLUMN, "name"), ("Value", "bob")]),
        Some(Number::from(4))
    );
}

fn combinations(rows: &[(i64, i64)]) -> AnalyzerResultRef {
    let crosstab = value_combination_crosstab(
        &["a"],
        rows.iter()
            .map(|(value, frequency)| (vec![Some(Number::from(*value))], Number::from(*frequency))),
    )
    .unwrap();
    Arc::new(CrosstabResult::new(crosstab))
}

#[test]
fn test_value_combinations_are_reranked() {
    let left = combinations(&[(1, 5), (2, 2)]);
    let right = combinations(&[(2, 4), (3, 1)]);

    let reduced = ValueCombinationReducer.reduce(&[left, right]).unwrap();
    let crosstab = reduced.downcast_ref::<CrosstabResult>().unwrap().crosstab();

    let cell = |column: &str, measure: &str| {
        crosstab.get(&[(DIMENSION_COLUMN, column), (DIMENSION_MEASURE, measure)])
    };

    // 2 appears 2 + 4 times and overtakes 1.
    assert_eq!(cell("a", MEASURE_MOST_FREQUENT), Some(Number::from(2)));
    assert_eq!(cell(COLUMN_FREQUENCY, MEASURE_MOST_FREQUENT), Some(Number::from(6)));
    assert_eq!(cell("a", "Combination 1"), Some(Number::from(1)));
    assert_eq!(cell("a", MEASURE_LEAST_FREQUENT), Some(Number::from(3)));
}
