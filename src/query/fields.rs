//! Field-name resolution and compiled-fragment caching.
//!
//! Logical field names become quoted column references here. A trailing
//! `§` marks a localized field: the marker is replaced by the query's
//! language tag (`"title§"` + `_en` → `"title_en" AS "title"` in
//! projections, `"title_en"` in ordering/filtering). Names that already
//! carry quoting, whitespace, or qualification pass through verbatim so
//! raw expressions and `schema.table.column` references keep working.

use std::collections::HashMap;
use std::sync::Mutex;

/// Marker character denoting a language-variant column.
pub const LANG_MARKER: char = '§';

/// Where a resolved field will be used. Projections alias localized
/// columns back to their logical name; references do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldContext {
    Projection,
    Reference,
}

/// Resolve a logical field name into column-reference text.
pub fn resolve_field(name: &str, language: Option<&str>, ctx: FieldContext) -> String {
    if is_prequalified(name) {
        return name.to_string();
    }

    if let Some(base) = name.strip_suffix(LANG_MARKER) {
        return match language {
            Some(tag) if !tag.is_empty() => match ctx {
                FieldContext::Projection => format!("\"{base}{tag}\" AS \"{base}\""),
                FieldContext::Reference => format!("\"{base}{tag}\""),
            },
            _ => format!("\"{base}\""),
        };
    }

    format!("\"{name}\"")
}

/// A name containing quoting, whitespace, qualification, or call syntax is
/// assumed pre-built and is never re-quoted.
fn is_prequalified(name: &str) -> bool {
    name.chars()
        .any(|c| c == '"' || c == ':' || c == '.' || c == '(' || c.is_whitespace())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Fields,
    Sort,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    kind: FragmentKind,
    language: Option<String>,
    source: String,
}

/// Cache of compiled projection and ORDER BY fragments.
///
/// Values are pure functions of their keys, so concurrent population races
/// are benign. [`FragmentCache::clear`] exists as a bounded-memory policy
/// for long-lived processes, not as a correctness requirement.
#[derive(Debug, Default)]
pub struct FragmentCache {
    entries: Mutex<HashMap<FragmentKey, String>>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached fragment for `(kind, language, source)`, computing
    /// and storing it on first sight.
    pub fn compute_or_get<F>(
        &self,
        kind: FragmentKind,
        language: Option<&str>,
        source: &str,
        compute: F,
    ) -> String
    where
        F: FnOnce() -> String,
    {
        let key = FragmentKey {
            kind,
            language: language.map(|s| s.to_string()),
            source: source.to_string(),
        };
        let mut entries = self.entries.lock().expect("fragment cache poisoned");
        entries.entry(key).or_insert_with(compute).clone()
    }

    /// Drop every cached fragment.
    pub fn clear(&self) {
        self.entries.lock().expect("fragment cache poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("fragment cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
