#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::types::{Result, TdbError};

/// Prefix to namespace mapping used to abbreviate IRIs on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMap {
    entries: BTreeMap<String, String>,
}

impl PrefixMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `prefix` to `uri`, replacing an earlier binding.
    pub fn add(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.entries.insert(prefix.into(), uri.into());
    }

    pub fn remove(&mut self, prefix: &str) -> Option<String> {
        self.entries.remove(prefix)
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.entries.get(prefix).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(prefix, uri)` pairs in prefix order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Full IRI for `prefix:local`.
    pub fn expand(&self, prefix: &str, local: &str) -> Result<String> {
        let uri = self
            .get(prefix)
            .ok_or_else(|| TdbError::UnknownPrefix(prefix.to_owned()))?;
        Ok(format!("{uri}{local}"))
    }

    /// Splits `iri` into `(prefix, local)` using the longest matching namespace.
    ///
    /// An IRI equal to a namespace abbreviates to an empty local name.
    pub fn abbreviate<'a>(&'a self, iri: &'a str) -> Option<(&'a str, &'a str)> {
        self.entries
            .iter()
            .filter(|(_, uri)| !uri.is_empty() && iri.starts_with(uri.as_str()))
            .max_by_key(|(_, uri)| uri.len())
            .map(|(prefix, uri)| (prefix.as_str(), &iri[uri.len()..]))
    }
}

impl<P: Into<String>, U: Into<String>> FromIterator<(P, U)> for PrefixMap {
    fn from_iter<I: IntoIterator<Item = (P, U)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (prefix, uri) in iter {
            map.add(prefix, uri);
        }
        map
    }
}
