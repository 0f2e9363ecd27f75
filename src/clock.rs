//! Replication position value type.

use crate::errors::RouterError;
use once_cell::sync::Lazy;
use std::fmt;
use std::str::FromStr;

/// A replication position: the name of a replication log file plus an
/// offset within it.
///
/// Clocks are the consistency token handed to
/// [`Session::with_consistency`](crate::Session::with_consistency): a
/// caller that observed a write at clock `c` can demand that a later read
/// be served by a node that has replicated at least up to `c`.
///
/// The ordering is total: log file name first (replication log files are
/// named so that lexicographic order is rotation order), then position.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clock {
    file: String,
    position: u64,
}

static ZERO: Lazy<Clock> = Lazy::new(|| Clock::new("", 0));

// The file name is a single maximal scalar value, which orders after any
// real log file name; u64::MAX orders after any real offset.
static INFINITY: Lazy<Clock> = Lazy::new(|| Clock::new("\u{10ffff}", u64::MAX));

impl Clock {
    /// Creates a new clock from a log file name and a position.
    pub fn new<S: Into<String>>(file: S, position: u64) -> Self {
        Self {
            file: file.into(),
            position,
        }
    }

    /// Assembles a clock from the nullable columns of a replication
    /// status row. Fails with [`RouterError::InvalidClock`] if either
    /// column is missing.
    pub fn from_parts(file: Option<&str>, position: Option<u64>) -> Result<Self, RouterError> {
        match (file, position) {
            (Some(file), Some(position)) => Ok(Self::new(file, position)),
            (None, _) => Err(RouterError::InvalidClock("log file is missing".to_owned())),
            (_, None) => Err(RouterError::InvalidClock("position is missing".to_owned())),
        }
    }

    /// The replication log file name.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The offset within the replication log file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The clock that compares less than or equal to every other clock.
    pub fn zero() -> &'static Clock {
        &ZERO
    }

    /// The clock that compares greater than or equal to every other clock.
    pub fn infinity() -> &'static Clock {
        &INFINITY
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file, self.position)
    }
}

impl FromStr for Clock {
    type Err = RouterError;

    /// Parses the `file@position` rendering produced by [`Display`].
    ///
    /// [`Display`]: fmt::Display
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, position) = s
            .rsplit_once('@')
            .ok_or_else(|| RouterError::InvalidClock(format!("expected file@position: {:?}", s)))?;
        let position = position
            .parse::<u64>()
            .map_err(|_| RouterError::InvalidClock(format!("bad position: {:?}", s)))?;
        Ok(Self::new(file, position))
    }
}
