use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CrosstabError, ReduceError};
use crate::result::reducer::crosstabs;
use crate::result::{
    AnalyzerResultReducer, AnalyzerResultRef, Crosstab, CrosstabDimension, CrosstabResult,
    DIMENSION_COLUMN, DIMENSION_MEASURE, Number,
};

pub const COLUMN_FREQUENCY: &str = "Frequency";
pub const MEASURE_MOST_FREQUENT: &str = "Most frequent";
pub const MEASURE_LEAST_FREQUENT: &str = "Least frequent";

type Combination = Vec<Option<Number>>;

/// Measure category of the combination at `rank` among `total` combinations.
pub fn combination_label(rank: usize, total: usize) -> String {
    if rank == 0 {
        MEASURE_MOST_FREQUENT.to_string()
    } else if rank + 1 == total {
        MEASURE_LEAST_FREQUENT.to_string()
    } else {
        format!("Combination {rank}")
    }
}

/// Builds a value combination crosstab: one measure category per
/// combination, ranked by descending frequency, ties in descending value
/// order. The column dimension lists `columns` followed by `Frequency`.
pub fn value_combination_crosstab<I>(columns: &[&str], combinations: I) -> Result<Crosstab, CrosstabError>
where
    I: IntoIterator<Item = (Combination, Number)>,
{
    let mut ranked: Vec<(Combination, Number)> = combinations.into_iter().collect();
    ranked.sort_by(|(a, fa), (b, fb)| fb.cmp(fa).then_with(|| b.cmp(a)));

    let column_dimension = CrosstabDimension::with_categories(
        DIMENSION_COLUMN,
        columns.iter().copied().chain([COLUMN_FREQUENCY]),
    );
    let mut crosstab = Crosstab::new(vec![
        column_dimension,
        CrosstabDimension::new(DIMENSION_MEASURE),
    ])?;

    let total = ranked.len();
    for (rank, (values, frequency)) in ranked.into_iter().enumerate() {
        let label = combination_label(rank, total);

        for (column, value) in columns.iter().zip(values) {
            if let Some(value) = value {
                crosstab.put(&[(DIMENSION_COLUMN, *column), (DIMENSION_MEASURE, label.as_str())], value)?;
            }
        }
        crosstab.put(
            &[(DIMENSION_COLUMN, COLUMN_FREQUENCY), (DIMENSION_MEASURE, label.as_str())],
            frequency,
        )?;
    }

    Ok(crosstab)
}

/// Merges "most/least frequent value combination" crosstabs.
///
/// Ranks are never carried over from the partials: combinations are summed
/// by their values and re-ranked after the merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCombinationReducer;

impl ValueCombinationReducer {
    pub fn reduce_crosstabs(&self, partials: &[&Crosstab]) -> Result<Crosstab, ReduceError> {
        let Some(first) = partials.first() else {
            return Err(ReduceError::Empty);
        };

        let established = value_columns(first)?;
        let mut frequencies: BTreeMap<Combination, Number> = BTreeMap::new();

        for partial in partials {
            let columns = value_columns(partial)?;
            if columns != established {
                return Err(ReduceError::IncompatibleDimension {
                    dimension: DIMENSION_COLUMN.to_string(),
                    established: with_frequency(&established),
                    found: with_frequency(&columns),
                });
            }

            let measure = partial
                .dimension(DIMENSION_MEASURE)
                .ok_or_else(|| ReduceError::MissingDimension(DIMENSION_MEASURE.to_string()))?;

            for category in measure.categories() {
                let at = |column: &str| {
                    partial.get(&[(DIMENSION_COLUMN, column), (DIMENSION_MEASURE, category.as_str())])
                };

                let combination: Combination = columns.iter().map(|c| at(c.as_str())).collect();
                let frequency = at(COLUMN_FREQUENCY).unwrap_or_default();

                let total = frequencies.entry(combination).or_default();
                *total = total
                    .checked_add(frequency)
                    .ok_or_else(|| CrosstabError::Overflow(format!("{COLUMN_FREQUENCY}, {category}")))?;
            }
        }

        let columns: Vec<&str> = established.iter().map(String::as_str).collect();
        Ok(value_combination_crosstab(&columns, frequencies)?)
    }
}

/// The column categories holding values, i.e. all except `Frequency`.
fn value_columns(crosstab: &Crosstab) -> Result<Vec<String>, ReduceError> {
    let dimension = crosstab
        .dimension(DIMENSION_COLUMN)
        .ok_or_else(|| ReduceError::MissingDimension(DIMENSION_COLUMN.to_string()))?;

    if !dimension.contains(COLUMN_FREQUENCY) {
        return Err(ReduceError::MissingCategory(COLUMN_FREQUENCY));
    }

    Ok(dimension
        .categories()
        .iter()
        .filter(|c| *c != COLUMN_FREQUENCY)
        .cloned()
        .collect())
}

fn with_frequency(columns: &[String]) -> Vec<String> {
    let mut all = columns.to_vec();
    all.push(COLUMN_FREQUENCY.to_string());
    all
}

impl AnalyzerResultReducer for ValueCombinationReducer {
    fn reduce(&self, partials: &[AnalyzerResultRef]) -> Result<AnalyzerResultRef, ReduceError> {
        let crosstabs = crosstabs(partials)?;
        let reduced = self.reduce_crosstabs(&crosstabs)?;
        Ok(Arc::new(CrosstabResult::new(reduced)))
    }
}
