//! Analyzer results and the reducers that merge partial results.

mod combination;
mod crosstab;
mod number;
mod reducer;

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

pub use crate::result::combination::{
    COLUMN_FREQUENCY, MEASURE_LEAST_FREQUENT, MEASURE_MOST_FREQUENT, ValueCombinationReducer,
    combination_label, value_combination_crosstab,
};
pub use crate::result::crosstab::{
    Crosstab, CrosstabDimension, DIMENSION_COLUMN, DIMENSION_MEASURE,
};
pub use crate::result::number::Number;
pub use rust_decimal::Decimal;
pub use crate::result::reducer::{AnalyzerResultReducer, CrosstabReducer, CrosstabResult};

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The aggregate an analyzer yields once all rows are consumed. Immutable
/// once produced.
pub trait AnalyzerResult: AsAny + Debug + Send + Sync {}

impl dyn AnalyzerResult {
    pub fn downcast_ref<T: AnalyzerResult + 'static>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    pub fn is<T: AnalyzerResult + 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

pub type AnalyzerResultRef = Arc<dyn AnalyzerResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Count(u64);

    impl AnalyzerResult for Count {}

    #[test]
    fn test_downcast_through_arc() {
        let result: AnalyzerResultRef = Arc::new(Count(4));
        assert_eq!(result.downcast_ref::<Count>().map(|c| c.0), Some(4));
        assert!(!result.is::<CrosstabResult>());
    }
}
