//! Typed capability map for extensions.
//!
//! Extensions (renderers, input adapters, diagnostics) publish values under a
//! string key when the engine is built; anything holding the engine can look
//! them up by key and type. The map is assembled by
//! [`EngineBuilder`](crate::engine::EngineBuilder) and read-only afterwards.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;

struct Entry {
    type_name: &'static str,
    value: Box<dyn Any>,
}

#[derive(Default)]
pub struct Capabilities {
    entries: BTreeMap<String, Entry>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` under `name`, returning `true` if an earlier value
    /// was replaced.
    pub(crate) fn insert<T: 'static>(&mut self, name: &str, value: T) -> bool {
        self.entries
            .insert(
                name.to_owned(),
                Entry {
                    type_name: std::any::type_name::<T>(),
                    value: Box::new(value),
                },
            )
            .is_some()
    }

    /// The value under `name`, if one was published with type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        self.entries.get(name)?.value.downcast_ref::<T>()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether `name` holds a value of type `T`.
    pub fn provides<T: 'static>(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| (*e.value).type_id() == TypeId::of::<T>())
    }

    /// Published names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, e)| (k, e.type_name)))
            .finish()
    }
}
