//! Data states: the numeric observable part of a system.
//!
//! A [`DataState`] is a fixed-length vector of real values in which every cell is associated with
//! an inclusive [`DataRange`]. Values are clamped into their range whenever they are written, so a
//! data state can never hold an out-of-range value. Data states are immutable: applying a list of
//! [`DataStateUpdate`]s produces a new state.
//!
//! ```rust
//! use stark::ds::{DataRange, DataState, DataStateUpdate};
//!
//! let ranges = vec![DataRange::new(0.0, 10.0).unwrap(), DataRange::unbounded()];
//! let state = DataState::with_ranges(ranges, vec![1.0, 2.0]).unwrap();
//!
//! let next = state.apply(&[DataStateUpdate::new(0, 12.0), DataStateUpdate::new(1, -3.0)]);
//!
//! assert_eq!(next[0], 10.0);
//! assert_eq!(next[1], -3.0);
//! assert_eq!(state[0], 1.0);
//! ```

use std::fmt::{Display, Formatter};
use std::ops::Index;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataStateError {
    #[error("Invalid range [{0}, {1}]")]
    InvalidRange(f64, f64),

    #[error("Expected {expected} values, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Unknown relation operator {0}")]
    UnknownOperator(String),
}

/// Inclusive bounds of a single data state cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRange {
    min: f64,
    max: f64,
}

impl DataRange {
    pub fn new(min: f64, max: f64) -> Result<Self, DataStateError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(DataStateError::InvalidRange(min, max));
        }

        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Clamp a value into the range.
    pub fn apply(&self, value: f64) -> f64 {
        self.min.max(self.max.min(value))
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl Default for DataRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Assignment of a value to a single cell of a data state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataStateUpdate {
    index: usize,
    value: f64,
}

impl DataStateUpdate {
    pub fn new(index: usize, value: f64) -> Self {
        Self { index, value }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Display for DataStateUpdate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<-{}", self.index, self.value)
    }
}

/// Immutable vector of clamped values tagged with the step that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataState {
    values: Vec<f64>,
    ranges: Arc<[DataRange]>,
    step: usize,
}

impl DataState {
    /// Create a state in which every cell is unbounded.
    pub fn new(values: Vec<f64>) -> Self {
        let ranges = vec![DataRange::unbounded(); values.len()];

        Self {
            values,
            ranges: ranges.into(),
            step: 0,
        }
    }

    /// Create a state with explicit cell ranges, clamping the initial values.
    pub fn with_ranges(ranges: Vec<DataRange>, values: Vec<f64>) -> Result<Self, DataStateError> {
        if ranges.len() != values.len() {
            return Err(DataStateError::LengthMismatch {
                expected: ranges.len(),
                found: values.len(),
            });
        }

        let values = ranges
            .iter()
            .zip(values)
            .map(|(range, value)| range.apply(value))
            .collect();

        Ok(Self {
            values,
            ranges: ranges.into(),
            step: 0,
        })
    }

    /// Create a state by computing the initial value of each cell from its index.
    pub fn from_fn<F>(ranges: Vec<DataRange>, f: F) -> Self
    where
        F: FnMut(usize) -> f64,
    {
        let values = (0..ranges.len()).map(f).zip(ranges.iter()).map(|(v, r)| r.apply(v)).collect();

        Self {
            values,
            ranges: ranges.into(),
            step: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn range(&self, index: usize) -> Option<DataRange> {
        self.ranges.get(index).copied()
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    /// Apply a batch of updates from left to right, returning the new state.
    ///
    /// The step of the state is preserved.
    ///
    /// # Panics
    ///
    /// Panics if an update refers to an index outside of the state.
    pub fn apply(&self, updates: &[DataStateUpdate]) -> Self {
        let mut values = self.values.clone();

        for update in updates {
            values[update.index] = self.ranges[update.index].apply(update.value);
        }

        Self {
            values,
            ranges: Arc::clone(&self.ranges),
            step: self.step,
        }
    }
}

impl Index<usize> for DataState {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

/// Relational operators used to compare a computed value against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationOperator {
    LessThan,
    LessOrEqualThan,
    EqualTo,
    GreaterThan,
    GreaterOrEqualThan,
}

impl RelationOperator {
    pub fn eval(&self, v1: f64, v2: f64) -> bool {
        match self {
            Self::LessThan => v1 < v2,
            Self::LessOrEqualThan => v1 <= v2,
            Self::EqualTo => v1 == v2,
            Self::GreaterThan => v1 > v2,
            Self::GreaterOrEqualThan => v1 >= v2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessOrEqualThan => "<=",
            Self::EqualTo => "==",
            Self::GreaterThan => ">",
            Self::GreaterOrEqualThan => ">=",
        }
    }
}

impl Display for RelationOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for RelationOperator {
    type Err = DataStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Self::LessThan),
            "<=" => Ok(Self::LessOrEqualThan),
            "==" | "=" => Ok(Self::EqualTo),
            ">" => Ok(Self::GreaterThan),
            ">=" => Ok(Self::GreaterOrEqualThan),
            other => Err(DataStateError::UnknownOperator(other.to_string())),
        }
    }
}
