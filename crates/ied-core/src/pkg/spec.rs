//! Package spec parsing.
//!
//! Parses requests like:
//! - `left-pad`
//! - `left-pad@1.3.0`
//! - `left-pad@^1.0.0`
//! - `@types/node`
//! - `@types/node@^20`

use super::error::PkgError;

/// Version spec used when a request names no range.
pub const ANY_VERSION: &str = "*";

/// A parsed package request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Version range or tag.
    pub range: String,
}

impl PackageSpec {
    /// Parse a package specification string.
    ///
    /// A missing range defaults to [`ANY_VERSION`].
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        // The version delimiter is the first '@' after the (optional) scope prefix
        let search_from = usize::from(input.starts_with('@'));
        let (name, range) = match input[search_from..].find('@') {
            Some(at) => {
                let at = at + search_from;
                let range = &input[at + 1..];
                if range.is_empty() {
                    return Err(PkgError::spec_invalid(format!(
                        "Empty version range in '{input}'"
                    )));
                }
                (&input[..at], range)
            }
            None => (input, ANY_VERSION),
        };

        Self::validate_name(name)?;

        Ok(Self {
            name: name.to_string(),
            range: range.to_string(),
        })
    }

    /// Check that `name` is a plain or scoped package name.
    ///
    /// Names become path components under the store, so separators, leading
    /// dots and other punctuation are rejected.
    pub fn validate_name(name: &str) -> Result<(), PkgError> {
        let bare = if let Some(scoped) = name.strip_prefix('@') {
            let Some((scope, bare)) = scoped.split_once('/') else {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: missing '/' in '{name}'"
                )));
            };
            if scope.is_empty() {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid scoped package: empty scope in '{name}'"
                )));
            }
            Self::validate_segment(name, scope)?;
            bare
        } else {
            name
        };

        if bare.is_empty() {
            return Err(PkgError::spec_invalid(format!("Empty package name in '{name}'")));
        }
        Self::validate_segment(name, bare)
    }

    fn validate_segment(name: &str, segment: &str) -> Result<(), PkgError> {
        if segment.starts_with('.') {
            return Err(PkgError::spec_invalid(format!(
                "Package name '{name}' cannot start with '.'"
            )));
        }
        for c in segment.chars() {
            if !c.is_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(PkgError::spec_invalid(format!(
                    "Invalid character '{c}' in package name '{name}'"
                )));
            }
        }
        Ok(())
    }
}
