use std::collections::HashMap;

use crate::error::CrosstabError;
use crate::result::Number;

pub const DIMENSION_COLUMN: &str = "Column";
pub const DIMENSION_MEASURE: &str = "Measure";

/// A named axis of a crosstab with an ordered set of categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosstabDimension {
    name: String,
    categories: Vec<String>,
}

impl CrosstabDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            categories: Vec::new(),
        }
    }

    /// Duplicate categories are dropped, the first occurrence keeps its place.
    pub fn with_categories<I, C>(name: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let mut dimension = Self::new(name);
        for category in categories {
            dimension.add_category(category);
        }
        dimension
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Returns whether the category was new.
    pub fn add_category(&mut self, category: impl Into<String>) -> bool {
        let category = category.into();
        if self.contains(&category) {
            return false;
        }
        self.categories.push(category);
        true
    }

    /// Same name, and one category set includes the other.
    pub fn is_compatible(&self, other: &CrosstabDimension) -> bool {
        self.name == other.name
            && (self.categories.iter().all(|c| other.contains(c))
                || other.categories.iter().all(|c| self.contains(c)))
    }
}

/// Numeric values addressed by one category per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Crosstab {
    dimensions: Vec<CrosstabDimension>,
    cells: HashMap<Vec<String>, Number>,
}

impl Crosstab {
    pub fn new(dimensions: Vec<CrosstabDimension>) -> Result<Self, CrosstabError> {
        for (i, dimension) in dimensions.iter().enumerate() {
            if dimensions[..i].iter().any(|d| d.name == dimension.name) {
                return Err(CrosstabError::DuplicateDimension(dimension.name.clone()));
            }
        }

        Ok(Self {
            dimensions,
            cells: HashMap::new(),
        })
    }

    pub fn dimensions(&self) -> &[CrosstabDimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&CrosstabDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub(crate) fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolves `(dimension, category)` pairs into a key ordered by dimension.
    fn address(&self, coords: &[(&str, &str)]) -> Result<Vec<String>, CrosstabError> {
        if let Some((unknown, _)) = coords.iter().find(|(d, _)| self.dimension(d).is_none()) {
            return Err(CrosstabError::UnknownDimension(unknown.to_string()));
        }

        let key: Vec<String> = self
            .dimensions
            .iter()
            .filter_map(|d| {
                coords
                    .iter()
                    .find(|(name, _)| *name == d.name)
                    .map(|(_, category)| category.to_string())
            })
            .collect();

        if key.len() != self.dimensions.len() || coords.len() != self.dimensions.len() {
            return Err(CrosstabError::IncompleteAddress {
                expected: self.dimensions.len(),
                found: key.len(),
            });
        }

        Ok(key)
    }

    /// `None` when the cell is empty or the address is not valid.
    pub fn get(&self, coords: &[(&str, &str)]) -> Option<Number> {
        self.try_get(coords).ok().flatten()
    }

    pub fn try_get(&self, coords: &[(&str, &str)]) -> Result<Option<Number>, CrosstabError> {
        let key = self.address(coords)?;
        Ok(self.cells.get(&key).copied())
    }

    /// Stores a value, registering any new category. Returns the value that
    /// was replaced.
    pub fn put(
        &mut self,
        coords: &[(&str, &str)],
        value: impl Into<Number>,
    ) -> Result<Option<Number>, CrosstabError> {
        let key = self.address(coords)?;
        Ok(self.insert_key(key, value.into()))
    }

    /// Adds to the current value of a cell. Returns the new value.
    pub fn add(
        &mut self,
        coords: &[(&str, &str)],
        value: impl Into<Number>,
    ) -> Result<Number, CrosstabError> {
        let key = self.address(coords)?;
        self.add_key(key, value.into())
    }

    /// Every stored cell as its categories, in dimension order.
    pub fn cells(&self) -> impl Iterator<Item = (&[String], Number)> {
        self.cells.iter().map(|(key, value)| (key.as_slice(), *value))
    }

    fn register(&mut self, key: &[String]) {
        for (dimension, category) in self.dimensions.iter_mut().zip(key) {
            if !dimension.contains(category) {
                dimension.add_category(category.clone());
            }
        }
    }

    pub(crate) fn insert_key(&mut self, key: Vec<String>, value: Number) -> Option<Number> {
        self.register(&key);
        self.cells.insert(key, value)
    }

    pub(crate) fn add_key(&mut self, key: Vec<String>, value: Number) -> Result<Number, CrosstabError> {
        let current = self.cells.get(&key).copied().unwrap_or_default();
        let sum = current
            .checked_add(value)
            .ok_or_else(|| CrosstabError::Overflow(key.join(", ")))?;
        self.insert_key(key, sum);
        Ok(sum)
    }
}
