//! Placeholder substitution for URL templates.
//!
//! A template such as `https://example.com/files/##num##.png` carries named
//! placeholders wrapped in a pair of delimiters. The delimiters are given as a
//! single even-length marker string whose first half opens a placeholder and
//! whose second half closes it (`"####"` yields `##` / `##`).
//!
//! # Binding rules
//!
//! - A placeholder name matches `[A-Za-z]+[0-9]*` and is looked up
//!   case-sensitively.
//! - Unknown names are left untouched.
//! - Empty or all-whitespace values are left untouched, so an empty value never
//!   erases its placeholder.
//! - If value lookup itself fails, binding stops and the original template is
//!   returned unchanged.
//!
//! # Example
//!
//! ```
//! use heist_core::template::{PlaceholderRecord, bind};
//!
//! let record = PlaceholderRecord::new().with("num", 5);
//! assert_eq!(
//!     bind("https://e.com/##num##.png", &record, "####"),
//!     "https://e.com/5.png"
//! );
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Marker string used for URL templates (`##name##`).
pub const DEFAULT_MARKERS: &str = "####";

/// Placeholder key bound to the batch index.
pub const INDEX_KEY: &str = "num";

/// Errors raised while preparing a [`Binder`] or resolving a placeholder value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// Marker string cannot be split into two equal, non-empty halves.
    #[error("invalid placeholder markers {markers:?}: expected a non-empty, even-length string")]
    InvalidMarkers {
        /// The rejected marker string.
        markers: String,
    },

    /// A placeholder source failed while producing a value.
    #[error("failed to resolve placeholder `{name}`: {reason}")]
    Lookup {
        /// Placeholder name being resolved.
        name: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Supplies values for named placeholders.
///
/// `Ok(None)` means the name is unknown and the placeholder stays as-is.
/// `Err(_)` aborts binding and the caller receives the untouched template.
pub trait PlaceholderSource {
    /// Resolves the value for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Lookup`] when the source cannot produce a value.
    fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError>;
}

/// Ordered name/value record built per batch iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderRecord {
    values: BTreeMap<String, String>,
}

impl PlaceholderRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record holding only the batch index under [`INDEX_KEY`].
    #[must_use]
    pub fn for_index(index: u64) -> Self {
        Self::new().with(INDEX_KEY, index)
    }

    /// Adds or replaces a value, returning the record.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Display) {
        self.values.insert(name.into(), value.to_string());
    }

    /// Returns the value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the record holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PlaceholderSource for PlaceholderRecord {
    fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.get(name).map(str::to_string))
    }
}

impl<S> PlaceholderSource for HashMap<String, String, S>
where
    S: std::hash::BuildHasher,
{
    fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.get(name).cloned())
    }
}

/// Compiled placeholder scanner for one marker pair.
#[derive(Debug, Clone)]
pub struct Binder {
    left: String,
    right: String,
    pattern: Regex,
}

impl Binder {
    /// Compiles a binder for the given marker string.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::InvalidMarkers`] if `markers` is empty, has odd
    /// length, or does not split on a character boundary.
    pub fn new(markers: &str) -> Result<Self, TemplateError> {
        let invalid = || TemplateError::InvalidMarkers {
            markers: markers.to_string(),
        };
        if markers.is_empty() || markers.len() % 2 != 0 {
            return Err(invalid());
        }
        let mid = markers.len() / 2;
        if !markers.is_char_boundary(mid) {
            return Err(invalid());
        }
        let (left, right) = markers.split_at(mid);

        let pattern = Regex::new(&format!(
            "{}([A-Za-z]+[0-9]*){}",
            regex::escape(left),
            regex::escape(right)
        ))
        .map_err(|_| invalid())?;

        Ok(Self {
            left: left.to_string(),
            right: right.to_string(),
            pattern,
        })
    }

    /// Opening delimiter.
    #[must_use]
    pub fn left(&self) -> &str {
        &self.left
    }

    /// Closing delimiter.
    #[must_use]
    pub fn right(&self) -> &str {
        &self.right
    }

    /// Names of all placeholders in `template`, in order of appearance.
    #[must_use]
    pub fn placeholders<'t>(&self, template: &'t str) -> Vec<&'t str> {
        self.pattern
            .captures_iter(template)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Substitutes placeholders in `template` with values from `values`.
    ///
    /// Matches are spliced from the last to the first so earlier offsets stay
    /// valid. A lookup error returns `template` unchanged.
    #[must_use]
    pub fn bind<P>(&self, template: &str, values: &P) -> String
    where
        P: PlaceholderSource + ?Sized,
    {
        let matches: Vec<_> = self
            .pattern
            .captures_iter(template)
            .filter_map(|caps| Some((caps.get(0)?.range(), caps.get(1)?.as_str())))
            .collect();

        let mut body = template.to_string();
        for (range, name) in matches.into_iter().rev() {
            let value = match values.lookup(name) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, template, "placeholder lookup failed, keeping template");
                    return template.to_string();
                }
            };

            if value.trim().is_empty() {
                continue;
            }
            body.replace_range(range, &value);
        }
        body
    }
}

/// Binds `values` into `template` using the given marker string.
///
/// Invalid markers leave the template unchanged; use [`Binder::new`] to have
/// them reported instead.
#[must_use]
pub fn bind<P>(template: &str, values: &P, markers: &str) -> String
where
    P: PlaceholderSource + ?Sized,
{
    match Binder::new(markers) {
        Ok(binder) => binder.bind(template, values),
        Err(e) => {
            debug!(error = %e, "cannot bind template");
            template.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FailingSource;

    impl PlaceholderSource for FailingSource {
        fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError> {
            Err(TemplateError::Lookup {
                name: name.to_string(),
                reason: "backing store unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_bind_basic_substitution() {
        let record = PlaceholderRecord::new().with("num", "5");
        assert_eq!(
            bind("https://e.com/##num##.png", &record, "####"),
            "https://e.com/5.png"
        );
    }

    #[test]
    fn test_bind_empty_value_keeps_placeholder() {
        let record = PlaceholderRecord::new().with("num", "");
        assert_eq!(bind("##num##-x", &record, "####"), "##num##-x");
    }

    #[test]
    fn test_bind_whitespace_value_keeps_placeholder() {
        let record = PlaceholderRecord::new().with("num", "  \t");
        assert_eq!(bind("##num##-x", &record, "####"), "##num##-x");
    }

    #[test]
    fn test_bind_missing_key_keeps_placeholder() {
        let record = PlaceholderRecord::new();
        assert_eq!(bind("##num##-x", &record, "####"), "##num##-x");
    }

    #[test]
    fn test_bind_is_case_sensitive() {
        let record = PlaceholderRecord::new().with("num", 1);
        assert_eq!(bind("##NUM##/##num##", &record, "####"), "##NUM##/1");
    }

    #[test]
    fn test_bind_replaces_every_occurrence() {
        let record = PlaceholderRecord::for_index(42);
        assert_eq!(
            bind("https://e.com/##num##/file-##num##.txt", &record, "####"),
            "https://e.com/42/file-42.txt"
        );
    }

    #[test]
    fn test_bind_values_longer_than_placeholder_keep_offsets() {
        let record = PlaceholderRecord::new()
            .with("a", "first-long-value")
            .with("b", "x");
        assert_eq!(
            bind("##a##|##b##|##a##", &record, "####"),
            "first-long-value|x|first-long-value"
        );
    }

    #[test]
    fn test_bind_identifier_with_trailing_digits() {
        let record = PlaceholderRecord::new().with("page2", "two");
        assert_eq!(bind("p=##page2##", &record, "####"), "p=two");
    }

    #[test]
    fn test_bind_identifier_must_start_with_letter() {
        let record = PlaceholderRecord::new().with("2page", "two");
        assert_eq!(bind("##2page##", &record, "####"), "##2page##");
    }

    #[test]
    fn test_bind_custom_markers_with_regex_metacharacters() {
        let record = PlaceholderRecord::new().with("id", 7);
        assert_eq!(bind("item/{{id}}.json", &record, "{{}}"), "item/7.json");
        assert_eq!(bind("item/[id].json", &record, "[]"), "item/7.json");
        assert_eq!(bind("item/$id$.json", &record, "$$"), "item/7.json");
    }

    #[test]
    fn test_bind_is_idempotent_once_resolved() {
        let record = PlaceholderRecord::for_index(3);
        let once = bind("https://e.com/##num##.png?v=##num##", &record, "####");
        let twice = bind(&once, &record, "####");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bind_lookup_failure_returns_original() {
        let template = "https://e.com/##num##.png";
        assert_eq!(bind(template, &FailingSource, "####"), template);
    }

    #[test]
    fn test_bind_invalid_markers_returns_original() {
        let record = PlaceholderRecord::for_index(1);
        assert_eq!(bind("##num##", &record, "###"), "##num##");
        assert_eq!(bind("##num##", &record, ""), "##num##");
    }

    #[test]
    fn test_bind_with_hashmap_source() {
        let mut values = HashMap::new();
        values.insert("num".to_string(), "9".to_string());
        assert_eq!(bind("##num##.html", &values, "####"), "9.html");
    }

    #[test]
    fn test_binder_new_rejects_odd_markers() {
        let err = Binder::new("#####").unwrap_err();
        assert!(matches!(err, TemplateError::InvalidMarkers { .. }));
        assert!(err.to_string().contains("even-length"));
    }

    #[test]
    fn test_binder_splits_markers_in_half() {
        let binder = Binder::new("<<>>").unwrap();
        assert_eq!(binder.left(), "<<");
        assert_eq!(binder.right(), ">>");
    }

    #[test]
    fn test_binder_lists_placeholders_in_order() {
        let binder = Binder::new(DEFAULT_MARKERS).unwrap();
        assert_eq!(
            binder.placeholders("https://e.com/##dir##/##num##.png"),
            vec!["dir", "num"]
        );
        assert!(binder.placeholders("https://e.com/static.png").is_empty());
    }

    #[test]
    fn test_placeholder_record_accessors() {
        let mut record = PlaceholderRecord::new();
        assert!(record.is_empty());
        record.insert("num", 12);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("num"), Some("12"));
        assert_eq!(record.get("missing"), None);
    }
}
