//! Time-varying parameter values.
use crate::error::DispatchError;
use crate::horizon::TimeRange;
use indexmap::IndexMap;
use std::fmt::Display;

/// A parameter which is either constant or given for every time step.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    /// The same value at every time step
    Fixed(f64),
    /// One value per time step
    Hourly(IndexMap<u32, f64>),
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Fixed(0.0)
    }
}

impl From<f64> for Profile {
    fn from(value: f64) -> Self {
        Profile::Fixed(value)
    }
}

impl Profile {
    /// The value at time step `t`, if present
    pub fn get(&self, t: u32) -> Option<f64> {
        match self {
            Profile::Fixed(value) => Some(*value),
            Profile::Hourly(values) => values.get(&t).copied(),
        }
    }

    /// The value at time step `t`.
    ///
    /// A missing entry means upstream validation let incomplete data through, so it is reported as
    /// a data contract violation against `entity`.
    pub fn at(&self, t: u32, entity: impl Display) -> Result<f64, DispatchError> {
        self.get(t).ok_or_else(|| {
            DispatchError::data_contract(entity, format!("no profile value for time step {t}"))
        })
    }

    /// The number of distinct values (1 for a fixed profile)
    pub fn len(&self) -> usize {
        match self {
            Profile::Fixed(_) => 1,
            Profile::Hourly(values) => values.len(),
        }
    }

    /// Whether the profile has no values at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all the values in the profile
    pub fn values(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            Profile::Fixed(value) => Box::new(std::iter::once(*value)),
            Profile::Hourly(values) => Box::new(values.values().copied()),
        }
    }

    /// Check that the profile covers every time step in `range`
    pub fn check_covers(
        &self,
        range: &TimeRange,
        entity: impl Display,
    ) -> Result<(), DispatchError> {
        let Profile::Hourly(values) = self else {
            return Ok(());
        };

        match range.iter().find(|t| !values.contains_key(t)) {
            Some(t) => Err(DispatchError::data_contract(
                entity,
                format!("no profile value for time step {t}"),
            )),
            None => Ok(()),
        }
    }

    /// Combine profiles point by point.
    ///
    /// The result is fixed if every input is fixed, otherwise it is hourly over `range`.
    pub fn combine<F>(
        profiles: &[&Profile],
        range: &TimeRange,
        entity: impl Display,
        f: F,
    ) -> Result<Profile, DispatchError>
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut args = Vec::with_capacity(profiles.len());
        if profiles.iter().all(|p| matches!(p, Profile::Fixed(_))) {
            args.extend(profiles.iter().filter_map(|p| p.get(range.start)));
            return Ok(Profile::Fixed(f(&args)));
        }

        let mut values = IndexMap::with_capacity(range.len());
        for t in range.iter() {
            args.clear();
            for profile in profiles {
                args.push(profile.at(t, &entity)?);
            }
            values.insert(t, f(&args));
        }

        Ok(Profile::Hourly(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(values: &[(u32, f64)]) -> Profile {
        Profile::Hourly(values.iter().copied().collect())
    }

    #[test]
    fn test_profile_get() {
        let fixed = Profile::Fixed(2.0);
        assert_eq!(fixed.get(1), Some(2.0));
        assert_eq!(fixed.get(1000), Some(2.0));
        assert_eq!(fixed.len(), 1);

        let hourly = hourly(&[(1, 1.0), (2, 3.0)]);
        assert_eq!(hourly.get(2), Some(3.0));
        assert_eq!(hourly.get(3), None);
        assert_eq!(hourly.len(), 2);
    }

    #[test]
    fn test_profile_at_missing() {
        let profile = hourly(&[(1, 1.0)]);
        assert_eq!(
            profile.at(5, "plant1").unwrap_err(),
            DispatchError::data_contract("plant1", "no profile value for time step 5")
        );
    }

    #[test]
    fn test_profile_check_covers() {
        let range = TimeRange::new(1, 3);
        assert!(Profile::Fixed(1.0).check_covers(&range, "x").is_ok());
        assert!(hourly(&[(1, 1.0), (2, 1.0), (3, 1.0)]).check_covers(&range, "x").is_ok());
        assert!(hourly(&[(1, 1.0), (3, 1.0)]).check_covers(&range, "x").is_err());
    }

    #[test]
    fn test_profile_combine() {
        let range = TimeRange::new(1, 2);
        let sum = |args: &[f64]| args.iter().sum();

        let fixed = Profile::combine(
            &[&Profile::Fixed(1.0), &Profile::Fixed(2.0)],
            &range,
            "x",
            sum,
        )
        .unwrap();
        assert_eq!(fixed, Profile::Fixed(3.0));

        let mixed = Profile::combine(
            &[&Profile::Fixed(1.0), &hourly(&[(1, 1.0), (2, 5.0)])],
            &range,
            "x",
            sum,
        )
        .unwrap();
        assert_eq!(mixed, hourly(&[(1, 2.0), (2, 6.0)]));
    }
}
