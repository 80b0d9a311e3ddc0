//! Core identity types: projects, requirements, packages, installations.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::range::{Range, RangeError};
use crate::version::Version;

/// A normalized project identifier (e.g. `openssl.org`, `github.com/cli`).
///
/// Not a filesystem path, though it maps onto one inside the store; the
/// identifier may contain `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new project name, normalizing the input to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name with `/` separators escaped, for flat filenames (bottle
    /// artifacts, lock files).
    pub fn escaped(&self) -> String {
        self.0.replace('/', "∕")
    }
}

impl AsRef<std::ffi::OsStr> for PackageName {
    fn as_ref(&self) -> &std::ffi::OsStr {
        self.0.as_ref()
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// A project paired with a version constraint.
///
/// During hydration at most one requirement exists per project; repeated
/// requirements are merged by intersection, never concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequirement {
    /// The project this requirement applies to.
    pub project: PackageName,
    /// The constraint on acceptable versions.
    pub constraint: Range,
}

impl PackageRequirement {
    /// Convenience constructor.
    pub fn new(project: impl Into<PackageName>, constraint: Range) -> Self {
        Self {
            project: project.into(),
            constraint,
        }
    }
}

impl fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.constraint)
    }
}

/// Errors produced when parsing a user-facing package spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// The spec contained no project name before the constraint.
    #[error("package spec '{text}' has no project name")]
    EmptyProject {
        /// The offending spec text.
        text: String,
    },

    /// The constraint portion of the spec did not parse.
    #[error("in package spec '{text}': {source}")]
    Constraint {
        /// The offending spec text.
        text: String,
        /// The underlying constraint parse error.
        source: RangeError,
    },
}

impl FromStr for PackageRequirement {
    type Err = SpecError;

    /// Parse a CLI-facing package spec.
    ///
    /// Accepted forms: `project`, `project@latest`, `project@1.2`,
    /// `project@^1.2`, and the inline operators `project^1.2`,
    /// `project~1.2`, `project=1.2.3`, `project>=1<2`. A bare or `latest`
    /// constraint means the wildcard; a bare version means caret.
    ///
    /// ```
    /// use larder_schema::{PackageRequirement, Range};
    ///
    /// let req: PackageRequirement = "node@^20".parse().unwrap();
    /// assert_eq!(req.project.as_str(), "node");
    ///
    /// let any: PackageRequirement = "node@latest".parse().unwrap();
    /// assert_eq!(any.constraint, Range::Any);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let err_constraint = |source| SpecError::Constraint {
            text: text.to_string(),
            source,
        };

        let (name, constraint) = if let Some((name, rest)) = text.split_once('@') {
            let constraint = match rest.trim() {
                "" | "latest" | "*" => Range::Any,
                other => Range::parse(other).map_err(err_constraint)?,
            };
            (name, constraint)
        } else if let Some(ix) = text.find(['^', '~', '=', '<', '>']) {
            let constraint = Range::parse(&text[ix..]).map_err(err_constraint)?;
            (&text[..ix], constraint)
        } else {
            (text, Range::Any)
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(SpecError::EmptyProject {
                text: text.to_string(),
            });
        }
        Ok(Self::new(name, constraint))
    }
}

/// A fully resolved requirement: a project at one concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    /// The project identifier.
    pub project: PackageName,
    /// The concrete resolved version.
    pub version: Version,
}

impl Package {
    /// Convenience constructor.
    pub fn new(project: impl Into<PackageName>, version: Version) -> Self {
        Self {
            project: project.into(),
            version,
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.version)
    }
}

/// The on-disk location of an installed package:
/// `<store>/<project>/v<version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// The installed package.
    pub pkg: Package,
    /// Its directory inside the store.
    pub path: PathBuf,
}
