use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::exception::PackagingException;

/// Requested wall-clock time with "HH:MM" granularity.
///
/// Stored as whole minutes so packages can take the maximum over their jobs
/// or sum them up without reparsing the literal form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wallclock(u32);

impl Wallclock {
    pub fn from_minutes(minutes: u32) -> Self {
        Self(minutes)
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }
}

impl FromStr for Wallclock {
    type Err = PackagingException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PackagingException::InvalidWallclock {
            literal: s.to_owned(),
        };
        let (hours, minutes) = s.split_once(':').ok_or_else(invalid)?;
        let hours: u32 = hours.parse().map_err(|_| invalid())?;
        let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }
        Ok(Self(hours * 60 + minutes))
    }
}

impl TryFrom<String> for Wallclock {
    type Error = PackagingException;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Wallclock> for String {
    fn from(value: Wallclock) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Wallclock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl Add for Wallclock {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Wallclock {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::Wallclock;

    #[test]
    fn parse_and_display_round() {
        let w: Wallclock = "01:30".parse().unwrap();
        assert_eq!(w.minutes(), 90);
        assert_eq!(w.to_string(), "01:30");
        assert_eq!("103:05".parse::<Wallclock>().unwrap().to_string(), "103:05");
    }

    #[test]
    fn rejects_bad_literals() {
        assert!("90".parse::<Wallclock>().is_err());
        assert!("01:60".parse::<Wallclock>().is_err());
        assert!("aa:10".parse::<Wallclock>().is_err());
    }

    #[test]
    fn sum_is_at_least_max() {
        let clocks: Vec<Wallclock> =
            ["02:30", "00:45", "01:00"].iter().map(|s| s.parse().unwrap()).collect();
        let total: Wallclock = clocks.iter().copied().sum();
        let max = clocks.iter().copied().max().unwrap();
        assert_eq!(total.to_string(), "04:15");
        assert!(total >= max);
    }
}
