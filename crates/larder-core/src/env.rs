//! Runtime environment construction.
//!
//! Turns a set of installations into the environment-variable assignments
//! needed to run commands against them. Two sources feed each variable:
//!
//! 1. **Exported directories.** For a fixed table of well-known variables,
//!    each installation is scanned for the conventional subdirectory
//!    (`bin` → `PATH`, `lib/pkgconfig` → `PKG_CONFIG_PATH`, ...) and
//!    matches accumulate into an insertion-ordered, de-duplicated set —
//!    first installation wins position, duplicates drop silently.
//! 2. **Declared fragments.** Each package may declare literal key/value
//!    pairs, with `$KEY` inside a value meaning "whatever has accumulated
//!    for KEY so far". For the well-known variables a fragment that omits
//!    the token still keeps the accumulated directories (they are appended;
//!    losing another package's `bin` silently would be worse than an odd
//!    ordering). For any other key a token chains onto the earlier value,
//!    while a token-free value *overwrites* — surprising but preserved
//!    deliberately, see the note on [`construct_env`].
//!
//! Finally, any value still referencing its own key is rewritten into a
//! shell-portable default expansion (`${KEY:+:$KEY}`) so sourcing the
//! output never leaves an empty path segment when the variable was unset.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use larder_schema::{Installation, OrderedSet};

use crate::registry::{Registry, RegistryError};

/// Well-known variables and the store subdirectories that feed them.
const PATH_LIKE: &[(&str, &[&str])] = &[
    ("PATH", &["bin", "sbin"]),
    ("MANPATH", &["share/man"]),
    ("PKG_CONFIG_PATH", &["share/pkgconfig", "lib/pkgconfig"]),
    ("LIBRARY_PATH", &["lib", "lib64"]),
    ("LD_LIBRARY_PATH", &["lib", "lib64"]),
    ("CPATH", &["include"]),
    ("XDG_DATA_DIRS", &["share"]),
];

/// Errors produced during environment construction.
#[derive(Error, Debug)]
pub enum EnvError {
    /// A package's runtime-environment fragment could not be fetched.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Does any installation provide the named tool (final name segment)?
///
/// Used to gate `CMAKE_PREFIX_PATH` and `ACLOCAL_PATH`, which only make
/// sense when the corresponding consumer is among the installations.
fn provides_tool(installations: &[Installation], tool: &str) -> bool {
    installations.iter().any(|i| {
        let last = i
            .pkg
            .project
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default();
        last == tool || last.starts_with(&format!("{tool}."))
    })
}

/// Construct the merged environment for a set of installations, in
/// installation order.
///
/// Note on the overwrite rule: for keys outside the well-known table, a
/// later token-free fragment replaces an earlier package's value outright.
/// This mirrors the long-observed behavior of the system this engine
/// models; a warning is logged but the value is still replaced.
///
/// # Errors
///
/// Returns [`EnvError`] when a runtime-environment fragment cannot be
/// fetched from the registry.
pub async fn construct_env<R: Registry + ?Sized>(
    installations: &[Installation],
    registry: &R,
) -> Result<IndexMap<String, String>, EnvError> {
    // Conditional entries join the managed table only when their consumer
    // is present.
    let cmake = provides_tool(installations, "cmake");
    let automake = provides_tool(installations, "automake");

    let mut managed: Vec<(&str, &[&str])> = PATH_LIKE.to_vec();
    if cmake {
        managed.push(("CMAKE_PREFIX_PATH", &[""] as &[&str]));
    }
    if automake {
        managed.push(("ACLOCAL_PATH", &["share/aclocal"] as &[&str]));
    }

    // Phase 1: accumulate exported directories, first installation wins.
    let mut accumulated: IndexMap<String, OrderedSet<String>> = IndexMap::new();
    for installation in installations {
        for (key, suffixes) in &managed {
            for suffix in *suffixes {
                let dir = if suffix.is_empty() {
                    installation.path.clone()
                } else {
                    installation.path.join(suffix)
                };
                if !dir.is_dir() {
                    continue;
                }
                accumulated
                    .entry((*key).to_string())
                    .or_default()
                    .push(dir.to_string_lossy().into_owned());
            }
        }
    }

    let mut vars: IndexMap<String, String> = accumulated
        .into_iter()
        .map(|(key, dirs)| {
            let joined = dirs.iter().cloned().collect::<Vec<_>>().join(":");
            (key, joined)
        })
        .collect();

    // Phase 2: merge each package's declared fragment, in installation
    // order, key by declared order.
    for installation in installations {
        let fragment = registry.runtime_env(&installation.pkg).await?;
        for (key, value) in &fragment {
            let is_managed = managed.iter().any(|(k, _)| *k == key.as_str());
            let prior = vars.get(key).cloned();

            let merged = if is_managed {
                match &prior {
                    Some(acc) if has_self_token(value, key) => {
                        // Substitute the accumulated value at the token.
                        replace_self_token(value, key, acc)
                    }
                    None if has_self_token(value, key) => {
                        // Nothing accumulated yet: leave the token for the
                        // final default-expansion rewrite.
                        value.clone()
                    }
                    Some(acc) => {
                        // No token, but the accumulated directories are
                        // appended anyway rather than dropped.
                        format!("{value}:{acc}")
                    }
                    None => value.clone(),
                }
            } else {
                match &prior {
                    Some(earlier) if has_self_token(value, key) => {
                        // "FOO_FLAGS": "bar $FOO_FLAGS" chains correctly
                        // across packages.
                        replace_self_token(value, key, earlier)
                    }
                    Some(earlier) => {
                        warn!(
                            key = %key,
                            pkg = %installation.pkg,
                            "replacing previously set environment value '{earlier}'"
                        );
                        value.clone()
                    }
                    None => value.clone(),
                }
            };
            vars.insert(key.clone(), merged);
        }
    }

    // Phase 3: any remaining self-reference becomes a guarded expansion so
    // an unset variable cannot produce a dangling ':'.
    for (key, value) in &mut vars {
        if has_self_token(value, key) {
            *value = default_expand(value, key);
        }
    }

    debug!(count = vars.len(), "environment constructed");
    Ok(vars)
}

/// Render the environment as `export KEY="value"` lines, one per variable.
///
/// Values are double-quoted so `${KEY:+...}` expansions survive; embedded
/// quotes and backslashes are escaped.
pub fn render_exports(vars: &IndexMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        out.push_str(&format!("export {key}=\"{escaped}\"\n"));
    }
    out
}

/// Is `$key` present in `value` as a whole token (not a prefix of a longer
/// identifier)?
fn has_self_token(value: &str, key: &str) -> bool {
    scan_tokens(value, key, |_, _| String::new()).1
}

/// Replace each `$key` token with `replacement`.
fn replace_self_token(value: &str, key: &str, replacement: &str) -> String {
    scan_tokens(value, key, |out, _| {
        out.push_str(replacement);
        String::new()
    })
    .0
}

/// Walk `value` finding whole-token occurrences of `$key`; `on_token` is
/// called with the output buffer and the remaining text, and may return
/// text to prepend to the remainder. Returns the rewritten value and
/// whether any token was found.
fn scan_tokens(
    value: &str,
    key: &str,
    mut on_token: impl FnMut(&mut String, &str) -> String,
) -> (String, bool) {
    let token = format!("${key}");
    let mut out = String::new();
    let mut rest = value;
    let mut found = false;

    while let Some(ix) = rest.find(&token) {
        let after = &rest[ix + token.len()..];
        let next_is_word = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        out.push_str(&rest[..ix]);
        if next_is_word {
            // "$PATHEXT" is not a $PATH reference.
            out.push_str(&token);
            rest = after;
        } else {
            found = true;
            let prepend = on_token(&mut out, after);
            out.push_str(&prepend);
            rest = after;
        }
    }
    out.push_str(rest);
    (out, found)
}

/// Rewrite self-references into `${KEY:+...}` default expansions:
/// `A:$PATH` becomes `A${PATH:+:$PATH}`, `$PATH:A` becomes
/// `${PATH:+$PATH:}A`, and a bare `$PATH` becomes `${PATH:-}`.
fn default_expand(value: &str, key: &str) -> String {
    let token = format!("${key}");
    let mut out = String::new();
    let mut rest = value;

    while let Some(ix) = rest.find(&token) {
        let after = &rest[ix + token.len()..];
        let next_is_word = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        if next_is_word {
            out.push_str(&rest[..ix]);
            out.push_str(&token);
            rest = after;
            continue;
        }

        let before = &rest[..ix];
        if before.ends_with(':') {
            out.push_str(&before[..before.len() - 1]);
            out.push_str(&format!("${{{key}:+:${key}}}"));
            rest = after;
        } else if let Some(after_colon) = after.strip_prefix(':') {
            out.push_str(before);
            out.push_str(&format!("${{{key}:+${key}:}}"));
            rest = after_colon;
        } else {
            out.push_str(before);
            out.push_str(&format!("${{{key}:-}}"));
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
