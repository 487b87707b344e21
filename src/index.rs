use std::collections::HashMap;

use uuid::Uuid;

/// A generic id-keyed registry. Entities live in exactly one `Index`; every
/// cross-entity reference elsewhere in the crate is a plain id resolved back
/// through an index, never an owned pointer — the arena pattern used in place
/// of a cyclic object graph (WaitingPrompt <-> ProcessingGeneration <-> Worker <-> User).
#[derive(Debug, Default)]
pub struct Index<T> {
    entries: HashMap<Uuid, T>,
}

impl<T> Index<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: Uuid, value: T) {
        self.entries.insert(id, value);
    }

    pub fn get(&self, id: &Uuid) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut T> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<T> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &T)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut idx: Index<String> = Index::new();
        let id = Uuid::new_v4();
        idx.insert(id, "hello".to_string());
        assert_eq!(idx.get(&id).map(String::as_str), Some("hello"));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.remove(&id), Some("hello".to_string()));
        assert!(idx.get(&id).is_none());
        assert!(idx.is_empty());
    }
}
