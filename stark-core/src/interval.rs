use std::fmt::{Display, Formatter};
use std::ops::{Range, RangeInclusive};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid interval [{from}, {to}], the lower bound must be smaller than the upper bound")]
pub struct IntervalError {
    from: usize,
    to: usize,
}

/// Bounds of a temporal operator, relative to the step at which the operator is evaluated.
///
/// The lower bound is always strictly smaller than the upper bound. Whether the upper bound is
/// included depends on the logic using the interval, see [`Interval::shift`] and
/// [`Interval::shift_closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    from: usize,
    to: usize,
}

impl Interval {
    pub fn new(from: usize, to: usize) -> Result<Self, IntervalError> {
        if from < to {
            Ok(Self { from, to })
        } else {
            Err(IntervalError { from, to })
        }
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn to(&self) -> usize {
        self.to
    }

    /// The half-open range of absolute steps `[from + step, to + step)`.
    pub fn shift(&self, step: usize) -> Range<usize> {
        (self.from + step)..(self.to + step)
    }

    /// The closed range of absolute steps `[from + step, to + step]`.
    pub fn shift_closed(&self, step: usize) -> RangeInclusive<usize> {
        (self.from + step)..=(self.to + step)
    }
}

impl TryFrom<Range<usize>> for Interval {
    type Error = IntervalError;

    fn try_from(range: Range<usize>) -> Result<Self, Self::Error> {
        Self::new(range.start, range.end)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::{Interval, IntervalError};

    #[test]
    fn bounds() -> Result<(), IntervalError> {
        let interval = Interval::new(1, 4)?;

        assert_eq!(interval.shift(2), 3..6);
        assert_eq!(interval.shift_closed(2), 3..=6);
        assert_eq!(Interval::try_from(0..2)?, Interval::new(0, 2)?);
        assert!(Interval::new(3, 3).is_err());
        assert!(Interval::new(4, 1).is_err());
        Ok(())
    }
}
