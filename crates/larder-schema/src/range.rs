//! Version constraints.
//!
//! A [`Range`] is either the universal wildcard or a finite union of
//! intervals, each interval being a single pinned version (`=1.2.3`) or a
//! half-open interval `[lo, hi)` whose upper bound may be absent (+∞).
//! Ranges are built from the usual shorthand operators (`^`, `~`, `>=`,
//! `<`, `=`) and intersect pairwise; an empty intersection is the typed
//! error that surfaces incompatible transitive constraints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::version::Version;

/// Errors produced when parsing or intersecting ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The constraint text could not be parsed.
    #[error("malformed version constraint '{text}'")]
    Malformed {
        /// The offending constraint text.
        text: String,
    },

    /// An interval's bounds were inverted or empty (`lo >= hi`).
    #[error("empty interval in constraint '{text}'")]
    EmptyInterval {
        /// The offending constraint text.
        text: String,
    },

    /// Two ranges share no versions at all.
    ///
    /// This is the error that detects incompatible transitive constraints;
    /// both operands are carried so callers can render a precise diagnostic.
    #[error("`{lhs}` and `{rhs}` have no overlap")]
    Unsatisfiable {
        /// The left operand of the failed intersection.
        lhs: Box<Range>,
        /// The right operand of the failed intersection.
        rhs: Box<Range>,
    },
}

/// One member of a range's interval union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interval {
    /// Exactly one version (`=1.2.3`).
    Exact(Version),
    /// Half-open interval `[lo, hi)`; `hi == None` means unbounded above.
    HalfOpen {
        /// Inclusive lower bound.
        lo: Version,
        /// Exclusive upper bound, or `None` for +∞.
        hi: Option<Version>,
    },
}

impl Interval {
    fn contains(&self, v: &Version) -> bool {
        match self {
            Self::Exact(pin) => pin == v,
            Self::HalfOpen { lo, hi } => {
                *v >= *lo && hi.as_ref().is_none_or(|hi| *v < *hi)
            }
        }
    }

    /// Pairwise interval intersection; `None` when the overlap is empty.
    fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => (a == b).then(|| Self::Exact(a.clone())),
            (Self::Exact(pin), interval) | (interval, Self::Exact(pin)) => {
                interval.contains(pin).then(|| Self::Exact(pin.clone()))
            }
            (Self::HalfOpen { lo: lo1, hi: hi1 }, Self::HalfOpen { lo: lo2, hi: hi2 }) => {
                let lo = lo1.max(lo2).clone();
                let hi = match (hi1, hi2) {
                    (None, None) => None,
                    (Some(h), None) | (None, Some(h)) => Some(h.clone()),
                    (Some(a), Some(b)) => Some(a.min(b).clone()),
                };
                match &hi {
                    Some(hi_v) if *hi_v <= lo => None,
                    _ => Some(Self::HalfOpen { lo, hi }),
                }
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={v}"),
            Self::HalfOpen { lo, hi: None } => write!(f, ">={lo}"),
            Self::HalfOpen { lo, hi: Some(hi) } => {
                // Prefer the shorthand the interval was likely built from.
                if *hi == caret_upper(lo) {
                    write!(f, "^{lo}")
                } else if *hi == tilde_upper(lo) {
                    write!(f, "~{lo}")
                } else {
                    write!(f, ">={lo}<{hi}")
                }
            }
        }
    }
}

/// A version constraint: the wildcard, or a union of intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Range {
    /// Matches every version.
    Any,
    /// Matches versions in any of the listed intervals.
    Set(Vec<Interval>),
}

/// Exclusive upper bound for `^v`: the next major.
fn caret_upper(lo: &Version) -> Version {
    Version::new(vec![lo.major() + 1])
}

/// Exclusive upper bound for `~v`: the next minor (same as `^` for
/// single-component versions).
fn tilde_upper(lo: &Version) -> Version {
    if lo.components().len() >= 2 {
        Version::new(vec![lo.major(), lo.minor() + 1])
    } else {
        caret_upper(lo)
    }
}

impl Range {
    /// The universal wildcard.
    pub fn any() -> Self {
        Self::Any
    }

    /// A range matching exactly one version.
    pub fn exact(version: Version) -> Self {
        Self::Set(vec![Interval::Exact(version)])
    }

    /// A caret range: `[v, (v.major + 1))`.
    pub fn caret(version: Version) -> Self {
        let hi = caret_upper(&version);
        Self::Set(vec![Interval::HalfOpen {
            lo: version,
            hi: Some(hi),
        }])
    }

    /// Parse a constraint: `*`, `^v`, `~v`, `>=a`, `>=a<b`, `<b`, `=v`, a
    /// bare version (treated as `^v`), or a `,`/`||`-separated union of the
    /// above.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Malformed`] for unparseable text and
    /// [`RangeError::EmptyInterval`] for an inverted interval.
    pub fn parse(text: &str) -> Result<Self, RangeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RangeError::Malformed {
                text: text.to_string(),
            });
        }

        let mut intervals = Vec::new();
        for alt in trimmed.split("||").flat_map(|s| s.split(',')) {
            let alt = alt.trim();
            if alt == "*" {
                // The wildcard absorbs every other alternative.
                return Ok(Self::Any);
            }
            intervals.push(parse_interval(alt)?);
        }

        Ok(Self::Set(intervals))
    }

    /// Does `version` satisfy this constraint?
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Set(intervals) => intervals.iter().any(|i| i.contains(version)),
        }
    }

    /// The greatest satisfying version among `versions`, if any.
    pub fn max<'a, I>(&self, versions: I) -> Option<Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions
            .into_iter()
            .filter(|v| self.satisfies(v))
            .max()
            .cloned()
    }

    /// The one exact version this range denotes, when it pins exactly one.
    pub fn single(&self) -> Option<Version> {
        match self {
            Self::Set(intervals) => match intervals.as_slice() {
                [Interval::Exact(v)] => Some(v.clone()),
                _ => None,
            },
            Self::Any => None,
        }
    }

    /// Intersect two ranges.
    ///
    /// Mathematically commutative and associative; the wildcard is the
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns [`RangeError::Unsatisfiable`] carrying both operands when the
    /// interval sets share no overlap.
    pub fn intersect(&self, other: &Self) -> Result<Self, RangeError> {
        let (a, b) = match (self, other) {
            (Self::Any, r) | (r, Self::Any) => return Ok(r.clone()),
            (Self::Set(a), Self::Set(b)) => (a, b),
        };

        let mut out = Vec::new();
        for lhs in a {
            for rhs in b {
                if let Some(overlap) = lhs.intersect(rhs) {
                    if !out.contains(&overlap) {
                        out.push(overlap);
                    }
                }
            }
        }

        if out.is_empty() {
            return Err(RangeError::Unsatisfiable {
                lhs: Box::new(self.clone()),
                rhs: Box::new(other.clone()),
            });
        }
        Ok(Self::Set(out))
    }
}

fn parse_interval(text: &str) -> Result<Interval, RangeError> {
    let malformed = || RangeError::Malformed {
        text: text.to_string(),
    };
    let version = |s: &str| Version::parse(s).map_err(|_| malformed());

    let interval = if let Some(rest) = text.strip_prefix('^') {
        let lo = version(rest)?;
        let hi = caret_upper(&lo);
        Interval::HalfOpen { lo, hi: Some(hi) }
    } else if let Some(rest) = text.strip_prefix('~') {
        let lo = version(rest)?;
        let hi = tilde_upper(&lo);
        Interval::HalfOpen { lo, hi: Some(hi) }
    } else if let Some(rest) = text.strip_prefix(">=") {
        match rest.find('<') {
            Some(ix) => {
                let lo = version(rest[..ix].trim())?;
                let hi = version(rest[ix + 1..].trim())?;
                Interval::HalfOpen { lo, hi: Some(hi) }
            }
            None => Interval::HalfOpen {
                lo: version(rest.trim())?,
                hi: None,
            },
        }
    } else if let Some(rest) = text.strip_prefix('<') {
        Interval::HalfOpen {
            lo: Version::new(vec![0]),
            hi: Some(version(rest.trim())?),
        }
    } else if let Some(rest) = text.strip_prefix('=') {
        Interval::Exact(version(rest.trim())?)
    } else {
        // A bare version is a caret constraint: "2.3" means "^2.3".
        let lo = version(text)?;
        let hi = caret_upper(&lo);
        Interval::HalfOpen { lo, hi: Some(hi) }
    };

    if let Interval::HalfOpen { lo, hi: Some(hi) } = &interval {
        if hi <= lo {
            return Err(RangeError::EmptyInterval {
                text: text.to_string(),
            });
        }
    }
    Ok(interval)
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Set(intervals) => {
                for (i, interval) in intervals.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{interval}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Range {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Range {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    fn r(text: &str) -> Range {
        Range::parse(text).unwrap()
    }

    #[test]
    fn wildcard_matches_everything() {
        let any = r("*");
        assert!(any.satisfies(&v("0.0.1")));
        assert!(any.satisfies(&v("999")));
        assert_eq!(any.to_string(), "*");
    }

    #[test]
    fn caret_bounds() {
        let caret = r("^1.2.3");
        assert!(caret.satisfies(&v("1.2.3")));
        assert!(caret.satisfies(&v("1.99.0")));
        assert!(!caret.satisfies(&v("2.0.0")));
        assert!(!caret.satisfies(&v("1.2.2")));
        assert_eq!(caret.to_string(), "^1.2.3");
    }

    #[test]
    fn tilde_bounds() {
        let tilde = r("~1.2.3");
        assert!(tilde.satisfies(&v("1.2.3")));
        assert!(tilde.satisfies(&v("1.2.99")));
        assert!(!tilde.satisfies(&v("1.3.0")));
        assert_eq!(tilde.to_string(), "~1.2.3");

        // ~ with a single component degrades to ^.
        let loose = r("~2");
        assert!(loose.satisfies(&v("2.9")));
        assert!(!loose.satisfies(&v("3.0")));
    }

    #[test]
    fn bare_version_is_caret() {
        let bare = r("2.3");
        assert!(bare.satisfies(&v("2.3.0")));
        assert!(bare.satisfies(&v("2.9")));
        assert!(!bare.satisfies(&v("3.0")));
    }

    #[test]
    fn open_and_bounded_comparisons() {
        let open = r(">=1.2");
        assert!(open.satisfies(&v("1.2")));
        assert!(open.satisfies(&v("42")));
        assert!(!open.satisfies(&v("1.1.9")));

        let bounded = r(">=1.2<1.4");
        assert!(bounded.satisfies(&v("1.3.9")));
        assert!(!bounded.satisfies(&v("1.4")));
        assert_eq!(bounded.to_string(), ">=1.2<1.4");

        let below = r("<2");
        assert!(below.satisfies(&v("1.99")));
        assert!(!below.satisfies(&v("2.0.0")));
    }

    #[test]
    fn pinned_version() {
        let pin = r("=1.2.3");
        assert!(pin.satisfies(&v("1.2.3")));
        assert!(!pin.satisfies(&v("1.2.4")));
        assert_eq!(pin.single(), Some(v("1.2.3")));
        assert_eq!(r("^1.2").single(), None);
        assert_eq!(Range::any().single(), None);
    }

    #[test]
    fn unions_parse_with_comma_and_pipes() {
        for text in ["^1,^3", "^1 || ^3"] {
            let union = r(text);
            assert!(union.satisfies(&v("1.5")), "{text}");
            assert!(union.satisfies(&v("3.0")), "{text}");
            assert!(!union.satisfies(&v("2.0")), "{text}");
        }
    }

    #[test]
    fn rejects_malformed_and_inverted() {
        assert!(Range::parse("").is_err());
        assert!(Range::parse("bogus").is_err());
        assert!(matches!(
            Range::parse(">=2<1"),
            Err(RangeError::EmptyInterval { .. })
        ));
    }

    #[test]
    fn display_round_trips() {
        for text in ["*", "^1.2.3", "~1.2", ">=1.2<3", ">=2", "=1.2.3", "^1,^3"] {
            let range = r(text);
            assert_eq!(Range::parse(&range.to_string()).unwrap(), range, "{text}");
        }
    }

    #[test]
    fn intersection_is_commutative() {
        let pairs = [
            ("^1.2", "~1.4"),
            ("*", ">=2"),
            (">=1<4", "^2"),
            ("^1,^3", ">=1.5"),
            ("=1.2.3", "^1"),
        ];
        for (a_text, b_text) in pairs {
            let (a, b) = (r(a_text), r(b_text));
            assert_eq!(
                a.intersect(&b).unwrap(),
                b.intersect(&a).unwrap(),
                "{a_text} ∩ {b_text}"
            );
        }
    }

    #[test]
    fn intersection_agrees_with_satisfies() {
        let ranges = ["^1.2", "~1.4", ">=1<4", "^1,^3", "=1.4.0", "*", ">=2"];
        let samples = [
            "0.9", "1.0", "1.2", "1.3.9", "1.4.0", "1.5", "2.0", "3.1", "4.0",
        ];
        for a_text in ranges {
            for b_text in ranges {
                let (a, b) = (r(a_text), r(b_text));
                match a.intersect(&b) {
                    Ok(both) => {
                        for s in samples {
                            let version = v(s);
                            assert_eq!(
                                both.satisfies(&version),
                                a.satisfies(&version) && b.satisfies(&version),
                                "({a_text} ∩ {b_text}).satisfies({s})"
                            );
                        }
                    }
                    Err(RangeError::Unsatisfiable { .. }) => {
                        for s in samples {
                            let version = v(s);
                            assert!(
                                !(a.satisfies(&version) && b.satisfies(&version)),
                                "{a_text} ∩ {b_text} claimed empty but both match {s}"
                            );
                        }
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }
    }

    #[test]
    fn wildcard_is_intersection_identity() {
        let range = r("^1.2");
        assert_eq!(Range::any().intersect(&range).unwrap(), range);
        assert_eq!(range.intersect(&Range::any()).unwrap(), range);
    }

    #[test]
    fn disjoint_ranges_fail_with_both_operands() {
        let (a, b) = (r("^1"), r("^2"));
        match a.intersect(&b) {
            Err(RangeError::Unsatisfiable { lhs, rhs }) => {
                assert_eq!(*lhs, a);
                assert_eq!(*rhs, b);
            }
            other => panic!("expected Unsatisfiable, got {other:?}"),
        }
    }

    #[test]
    fn pinned_intersections() {
        assert!(r("=1.2").intersect(&r("=1.3")).is_err());
        assert_eq!(
            r("=1.2").intersect(&r("=1.2.0")).unwrap().single(),
            Some(v("1.2"))
        );
        assert_eq!(
            r("=1.4.0").intersect(&r("^1")).unwrap().single(),
            Some(v("1.4.0"))
        );
    }

    #[test]
    fn max_returns_greatest_satisfying() {
        let versions: Vec<Version> = ["1.0.0", "1.2.0", "2.0.0"].into_iter().map(v).collect();
        assert_eq!(r("^1").max(&versions), Some(v("1.2.0")));
        assert_eq!(r("^3").max(&versions), None);
        assert_eq!(Range::any().max(&versions), Some(v("2.0.0")));

        // Whatever max returns must itself satisfy the range.
        for text in ["^1", "~1.0", ">=1<2", "*"] {
            if let Some(best) = r(text).max(&versions) {
                assert!(r(text).satisfies(&best), "{text}");
            }
        }
    }
}
