//! Set of archive formats an extraction may choose from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::core::format::ArchiveFormat;
use crate::formats;

/// Formats keyed by instance identity.
///
/// Two `Arc`s pointing at the same implementation are one format. Distinct
/// instances may share a name; lookups by name then return the first one.
/// Registries are cheap to clone and never shared mutably with a running
/// extraction: pipeline composition and union always build a new one.
#[derive(Clone, Default)]
pub struct Registry {
    formats: BTreeMap<(String, usize), Arc<dyn ArchiveFormat>>,
}

/// Address of the shared implementation, ignoring the vtable.
fn identity(format: &Arc<dyn ArchiveFormat>) -> usize {
    Arc::as_ptr(format) as *const () as usize
}

fn key(format: &Arc<dyn ArchiveFormat>) -> (String, usize) {
    (format.name().to_string(), identity(format))
}

impl Registry {
    /// A registry with no formats.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The compiled-in RPA revisions.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_all(formats::builtin());
        registry
    }

    /// Add `format`. Returns false, and changes nothing, if this very
    /// instance is already present.
    pub fn register(&mut self, format: Arc<dyn ArchiveFormat>) -> bool {
        let key = key(&format);
        if self.formats.contains_key(&key) {
            debug!("Version {} is already in the list of versions.", key.0);
            return false;
        }
        debug!("Added version {} to the list of versions.", key.0);
        self.formats.insert(key, format);
        true
    }

    /// Add every format in `formats`, skipping duplicates. Returns how many
    /// were added.
    pub fn register_all<I>(&mut self, formats: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn ArchiveFormat>>,
    {
        let mut added = 0;
        for format in formats {
            if self.register(format) {
                added += 1;
            }
        }
        added
    }

    /// Remove this instance. Returns whether it was present.
    pub fn unregister(&mut self, format: &Arc<dyn ArchiveFormat>) -> bool {
        let removed = self.formats.remove(&key(format)).is_some();
        if removed {
            debug!("Removed version {} from the list of versions.", format.name());
        } else {
            debug!("Version {} is not in the list of versions.", format.name());
        }
        removed
    }

    /// Remove every format called `name`. Returns how many were removed.
    pub fn unregister_named(&mut self, name: &str) -> usize {
        let before = self.formats.len();
        self.formats.retain(|(registered, _), _| registered != name);
        let removed = before - self.formats.len();
        debug!("Removed {} format(s) named {}.", removed, name);
        removed
    }

    pub fn contains(&self, format: &Arc<dyn ArchiveFormat>) -> bool {
        self.formats.contains_key(&key(format))
    }

    pub fn contains_named(&self, name: &str) -> bool {
        self.named(name).next().is_some()
    }

    /// First format called `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ArchiveFormat>> {
        self.named(name).next().cloned()
    }

    fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<dyn ArchiveFormat>> + 'a {
        self.formats
            .range((name.to_string(), 0)..=(name.to_string(), usize::MAX))
            .map(|(_, format)| format)
    }

    /// Formats in name order.
    pub fn formats(&self) -> impl Iterator<Item = &Arc<dyn ArchiveFormat>> + '_ {
        self.formats.values()
    }

    /// Names in order, repeated where instances share a name.
    pub fn names(&self) -> Vec<String> {
        self.formats.keys().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// A new registry holding the formats of both, each instance once.
    pub fn union(&self, other: &Registry) -> Registry {
        let mut merged = self.clone();
        merged.register_all(other.formats().cloned());
        merged
    }
}

impl FromIterator<Arc<dyn ArchiveFormat>> for Registry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ArchiveFormat>>>(iter: I) -> Self {
        let mut registry = Registry::empty();
        registry.register_all(iter);
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.formats.keys().map(|(name, _)| name)).finish()
    }
}
