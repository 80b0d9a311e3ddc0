//! Concrete package versions.
//!
//! A [`Version`] is an ordered vector of non-negative integer components.
//! Real-world version strings are messier than semver, so parsing is
//! tolerant: any number of dot-separated components is accepted, and a lone
//! trailing letter (OpenSSL's `1.1.1q`) is folded into an extra numeric
//! component by its alphabet position. The original text is retained for
//! display only; identity and ordering always use the numeric vector.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The input contained no components at all.
    #[error("empty version string")]
    Empty,

    /// A dot-separated component was not a non-negative integer (or, for the
    /// final component, an integer with a single trailing letter).
    #[error("invalid version component '{component}' in '{input}'")]
    InvalidComponent {
        /// The offending component text.
        component: String,
        /// The full input string.
        input: String,
    },
}

/// A concrete version: one or more non-negative integer components.
///
/// Comparison is lexicographic over the component vectors with missing
/// trailing components treated as zero, so `1.2 == 1.2.0` and `1.10 > 1.9`.
/// The retained raw rendering never participates in equality or ordering.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    raw: String,
}

impl Version {
    /// Build a version directly from numeric components.
    ///
    /// The rendering is the dot-joined component list.
    ///
    /// # Panics
    ///
    /// Panics if `components` is empty; version component vectors are never
    /// empty by invariant.
    pub fn new(components: Vec<u64>) -> Self {
        assert!(!components.is_empty(), "version must have >= 1 component");
        let raw = components
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self { components, raw }
    }

    /// Parse a version string.
    ///
    /// Accepts 1-N dot-separated integer components, an optional leading
    /// `v`/`V`, and a single trailing letter on the final component, which is
    /// folded into an extra component by alphabet position (`1.1.1q` parses
    /// as `1.1.1.17` but still displays as `1.1.1q`).
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the input is empty or any component is not
    /// numeric (modulo the trailing-letter rule).
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let raw = text.trim();
        let body = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
        if body.is_empty() {
            return Err(VersionError::Empty);
        }

        let parts: Vec<&str> = body.split('.').collect();
        let last = parts.len() - 1;
        let mut components = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            if let Ok(n) = part.parse::<u64>() {
                components.push(n);
                continue;
            }

            // A lone letter suffix is only tolerated on the final component.
            if i == last && part.len() >= 2 {
                let (digits, suffix) = part.split_at(part.len() - 1);
                let letter = suffix.chars().next().unwrap_or_default();
                if letter.is_ascii_alphabetic() {
                    if let Ok(n) = digits.parse::<u64>() {
                        components.push(n);
                        components.push(u64::from(letter.to_ascii_lowercase() as u8 - b'a') + 1);
                        continue;
                    }
                }
            }

            return Err(VersionError::InvalidComponent {
                component: (*part).to_string(),
                input: raw.to_string(),
            });
        }

        Ok(Self {
            components,
            raw: raw.to_string(),
        })
    }

    /// The numeric component vector (never empty).
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Component at `index`, or zero when absent.
    pub fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }

    /// First component.
    pub fn major(&self) -> u64 {
        self.component(0)
    }

    /// Second component, or zero.
    pub fn minor(&self) -> u64 {
        self.component(1)
    }

    /// Third component, or zero.
    pub fn patch(&self) -> u64 {
        self.component(2)
    }

    /// Components with trailing zeros removed (at least one kept).
    ///
    /// Equality and hashing operate on this form so that `1.2` and `1.2.0`
    /// are the same version.
    fn canonical(&self) -> &[u64] {
        let mut len = self.components.len();
        while len > 1 && self.components[len - 1] == 0 {
            len -= 1;
        }
        &self.components[..len]
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_versions() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.components(), &[1, 2, 3]);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.patch(), 3);
    }

    #[test]
    fn parses_short_and_long_vectors() {
        assert_eq!(Version::parse("2").unwrap().components(), &[2]);
        assert_eq!(
            Version::parse("1.2.3.4.5").unwrap().components(),
            &[1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn parses_leading_v() {
        assert_eq!(Version::parse("v1.2").unwrap().components(), &[1, 2]);
        assert_eq!(Version::parse("V3").unwrap().components(), &[3]);
    }

    #[test]
    fn folds_letter_suffix_into_extra_component() {
        let v = Version::parse("1.1.1q").unwrap();
        assert_eq!(v.components(), &[1, 1, 1, 17]);
        // Display keeps the original text.
        assert_eq!(v.to_string(), "1.1.1q");

        let a = Version::parse("1.0.2a").unwrap();
        assert_eq!(a.components(), &[1, 0, 2, 1]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.beta.3").is_err());
        assert!(Version::parse("1.2.-3").is_err());
        assert!(Version::parse("abc").is_err());
    }

    #[test]
    fn ordering_pads_missing_components_with_zero() {
        let short = Version::parse("1.2").unwrap();
        let long = Version::parse("1.2.0").unwrap();
        assert_eq!(short.cmp(&long), Ordering::Equal);
        assert_eq!(short, long);

        assert!(Version::parse("1.10").unwrap() > Version::parse("1.9").unwrap());
        assert!(Version::parse("1.2.3").unwrap() < Version::parse("1.2.4").unwrap());
        assert!(Version::parse("2").unwrap() > Version::parse("1.99.99").unwrap());
    }

    #[test]
    fn letter_suffix_orders_after_base() {
        let base = Version::parse("1.1.1").unwrap();
        let q = Version::parse("1.1.1q").unwrap();
        let r = Version::parse("1.1.1r").unwrap();
        assert!(base < q);
        assert!(q < r);
    }

    #[test]
    fn display_round_trips_to_equal_version() {
        for text in ["1.2.3", "v1.2", "1.1.1q", "2", "0.0.1"] {
            let v = Version::parse(text).unwrap();
            let again = Version::parse(&v.to_string()).unwrap();
            assert_eq!(v, again, "round-trip of {text}");
        }
    }

    #[test]
    fn hash_agrees_with_numeric_equality() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Version::parse("1.2").unwrap());
        assert!(set.contains(&Version::parse("1.2.0").unwrap()));
    }
}
