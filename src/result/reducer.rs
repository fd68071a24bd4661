use std::sync::Arc;

use crate::error::ReduceError;
use crate::result::{AnalyzerResult, AnalyzerResultRef, Crosstab, CrosstabDimension};

/// Merges the partial results of one analyzer that ran over disjoint row
/// partitions into a single result.
pub trait AnalyzerResultReducer: Send + Sync {
    fn reduce(&self, partials: &[AnalyzerResultRef]) -> Result<AnalyzerResultRef, ReduceError>;
}

/// An analyzer result made of a single crosstab.
#[derive(Debug, Clone, PartialEq)]
pub struct CrosstabResult {
    crosstab: Crosstab,
}

impl CrosstabResult {
    pub fn new(crosstab: Crosstab) -> Self {
        Self { crosstab }
    }

    pub fn crosstab(&self) -> &Crosstab {
        &self.crosstab
    }

    pub fn into_crosstab(self) -> Crosstab {
        self.crosstab
    }
}

impl AnalyzerResult for CrosstabResult {}

pub(crate) fn crosstabs(partials: &[AnalyzerResultRef]) -> Result<Vec<&Crosstab>, ReduceError> {
    if partials.is_empty() {
        return Err(ReduceError::Empty);
    }

    partials
        .iter()
        .map(|partial| {
            partial
                .downcast_ref::<CrosstabResult>()
                .map(CrosstabResult::crosstab)
                .ok_or(ReduceError::UnexpectedResultType("CrosstabResult"))
        })
        .collect()
}

/// Dimension-aware crosstab merge.
///
/// Dimensions are unioned in first-seen order, and so are the categories of
/// each dimension. Any two partials sharing a dimension must have category
/// sets where one includes the other, unless the dimension was declared
/// open. Overlapping cells are summed.
#[derive(Debug, Clone, Default)]
pub struct CrosstabReducer {
    open: Vec<String>,
}

impl CrosstabReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensions whose categories are unioned without a compatibility check,
    /// e.g. the value dimension of a distribution.
    pub fn with_open_dimensions<I, D>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        Self {
            open: dimensions.into_iter().map(Into::into).collect(),
        }
    }

    fn is_open(&self, dimension: &str) -> bool {
        self.open.iter().any(|d| d == dimension)
    }

    pub fn reduce_crosstabs(&self, partials: &[&Crosstab]) -> Result<Crosstab, ReduceError> {
        if partials.is_empty() {
            return Err(ReduceError::Empty);
        }

        for (i, partial) in partials.iter().enumerate() {
            for dimension in partial.dimensions() {
                if self.is_open(dimension.name()) {
                    continue;
                }

                let conflict = partials[..i]
                    .iter()
                    .filter_map(|earlier| earlier.dimension(dimension.name()))
                    .find(|earlier| !earlier.is_compatible(dimension));

                if let Some(earlier) = conflict {
                    return Err(ReduceError::IncompatibleDimension {
                        dimension: dimension.name().to_string(),
                        established: earlier.categories().to_vec(),
                        found: dimension.categories().to_vec(),
                    });
                }
            }
        }

        let mut dimensions: Vec<CrosstabDimension> = Vec::new();
        for dimension in partials.iter().flat_map(|partial| partial.dimensions()) {
            match dimensions.iter_mut().find(|d| d.name() == dimension.name()) {
                None => dimensions.push(dimension.clone()),
                Some(established) => {
                    for category in dimension.categories() {
                        established.add_category(category.clone());
                    }
                }
            }
        }

        let mut reduced = Crosstab::new(dimensions)?;

        for partial in partials {
            let mut positions = Vec::with_capacity(reduced.dimensions().len());
            for dimension in reduced.dimensions() {
                match partial.dimension_index(dimension.name()) {
                    Some(index) => positions.push(index),
                    None if partial.is_empty() => break,
                    None => return Err(ReduceError::MissingDimension(dimension.name().to_string())),
                }
            }

            for (key, value) in partial.cells() {
                let mapped = positions.iter().map(|&i| key[i].clone()).collect();
                reduced.add_key(mapped, value)?;
            }
        }

        Ok(reduced)
    }
}

impl AnalyzerResultReducer for CrosstabReducer {
    fn reduce(&self, partials: &[AnalyzerResultRef]) -> Result<AnalyzerResultRef, ReduceError> {
        let crosstabs = crosstabs(partials)?;
        let reduced = self.reduce_crosstabs(&crosstabs)?;
        Ok(Arc::new(CrosstabResult::new(reduced)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{DIMENSION_COLUMN, DIMENSION_MEASURE, Number};
    use rust_decimal::Decimal;

    fn count(column: &str, value: i64) -> Crosstab {
        let mut crosstab = Crosstab::new(vec![
            CrosstabDimension::new(DIMENSION_COLUMN),
            CrosstabDimension::new(DIMENSION_MEASURE),
        ])
        .unwrap();
        crosstab
            .put(&[(DIMENSION_COLUMN, column), (DIMENSION_MEASURE, "Count")], value)
            .unwrap();
        crosstab
    }

    #[test]
    fn test_reduce_sums_overlapping_cells() {
        let a = count("X", 3);
        let b = count("X", 4);

        let reduced = CrosstabReducer::new().reduce_crosstabs(&[&a, &b]).unwrap();

        assert_eq!(reduced.dimension(DIMENSION_COLUMN).unwrap().categories(), ["X"]);
        assert_eq!(reduced.dimension(DIMENSION_MEASURE).unwrap().categories(), ["Count"]);
        assert_eq!(
            reduced.get(&[(DIMENSION_COLUMN, "X"), (DIMENSION_MEASURE, "Count")]),
            Some(Number::from(7))
        );
    }

    #[test]
    fn test_reduce_single_is_identity() {
        let a = count("X", 3);
        let reduced = CrosstabReducer::new().reduce_crosstabs(&[&a]).unwrap();
        assert_eq!(reduced, a);
    }

    #[test]
    fn test_incompatible_dimension_is_fatal() {
        let a = count("X", 3);
        let b = count("Y", 4);

        let err = CrosstabReducer::new().reduce_crosstabs(&[&a, &b]).unwrap_err();
        assert!(matches!(
            err,
            ReduceError::IncompatibleDimension { ref dimension, .. } if dimension == DIMENSION_COLUMN
        ));

        let open = CrosstabReducer::with_open_dimensions([DIMENSION_COLUMN]);
        let reduced = open.reduce_crosstabs(&[&a, &b]).unwrap();
        assert_eq!(reduced.dimension(DIMENSION_COLUMN).unwrap().categories(), ["X", "Y"]);
    }

    fn columns(categories: &[&str]) -> Crosstab {
        let mut crosstab = Crosstab::new(vec![
            CrosstabDimension::with_categories(DIMENSION_COLUMN, categories.iter().copied()),
            CrosstabDimension::new(DIMENSION_MEASURE),
        ])
        .unwrap();
        for column in categories {
            crosstab
                .put(&[(DIMENSION_COLUMN, *column), (DIMENSION_MEASURE, "Count")], 1)
                .unwrap();
        }
        crosstab
    }

    #[test]
    fn test_compatibility_does_not_depend_on_order() {
        let xy = columns(&["X", "Y"]);
        let x = columns(&["X"]);
        let y = columns(&["Y"]);
        let reducer = CrosstabReducer::new();

        let orders = [
            [&xy, &x, &y],
            [&xy, &y, &x],
            [&x, &xy, &y],
            [&x, &y, &xy],
            [&y, &xy, &x],
            [&y, &x, &xy],
        ];
        for order in orders {
            assert!(matches!(
                reducer.reduce_crosstabs(&order),
                Err(ReduceError::IncompatibleDimension { ref dimension, .. }) if dimension == DIMENSION_COLUMN
            ));
        }

        let open = CrosstabReducer::with_open_dimensions([DIMENSION_COLUMN]);
        for order in orders {
            let reduced = open.reduce_crosstabs(&order).unwrap();
            assert_eq!(
                reduced.get(&[(DIMENSION_COLUMN, "X"), (DIMENSION_MEASURE, "Count")]),
                Some(Number::from(2))
            );
        }

        let nested = [&xy, &x, &xy];
        assert!(reducer.reduce_crosstabs(&nested).is_ok());
    }

    #[test]
    fn test_decimal_cells_sum_exactly() {
        let mut a = count("X", 0);
        let mut b = count("X", 0);
        let at = [(DIMENSION_COLUMN, "X"), (DIMENSION_MEASURE, "Count")];
        a.put(&at, Decimal::new(1, 1)).unwrap();
        b.put(&at, Decimal::new(2, 1)).unwrap();

        let reduced = CrosstabReducer::new().reduce_crosstabs(&[&a, &b]).unwrap();
        assert_eq!(reduced.get(&at), Some(Number::from(Decimal::new(3, 1))));
        assert_eq!(reduced.get(&at).map(|n| n.to_string()).as_deref(), Some("0.3"));
    }

    #[test]
    fn test_dimension_union() {
        let a = count("X", 1);
        let mut b = Crosstab::new(vec![
            CrosstabDimension::new(DIMENSION_COLUMN),
            CrosstabDimension::new(DIMENSION_MEASURE),
            CrosstabDimension::new("Table"),
        ])
        .unwrap();
        b.put(&[(DIMENSION_COLUMN, "X"), (DIMENSION_MEASURE, "Count"), ("Table", "t")], 1)
            .unwrap();

        // `a` holds cells but cannot be placed on the Table axis.
        assert_eq!(
            CrosstabReducer::new().reduce_crosstabs(&[&a, &b]),
            Err(ReduceError::MissingDimension("Table".into()))
        );

        let empty = Crosstab::new(vec![CrosstabDimension::new(DIMENSION_COLUMN)]).unwrap();
        let reduced = CrosstabReducer::new().reduce_crosstabs(&[&empty, &b]).unwrap();
        assert_eq!(reduced.dimensions().len(), 3);
        assert_eq!(reduced.len(), 1);
    }

    #[test]
    fn test_reduce_rejects_foreign_results() {
        #[derive(Debug)]
        struct Other;
        impl AnalyzerResult for Other {}

        let partials: Vec<AnalyzerResultRef> = vec![Arc::new(Other)];
        assert_eq!(
            CrosstabReducer::new().reduce(&partials).unwrap_err(),
            ReduceError::UnexpectedResultType("CrosstabResult")
        );
        assert_eq!(
            CrosstabReducer::new().reduce(&[]).unwrap_err(),
            ReduceError::Empty
        );
    }
}
