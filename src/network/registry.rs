//! Connection registry
//!
//! Slot table keyed by generation-checked ids. Removal is O(1) and a
//! removed id never resolves again, even after its slot is reused.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map of live connections
#[derive(Debug)]
pub struct ConnectionTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> ConnectionTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value built from its own id
    pub fn insert_with(
        &mut self,
        build: impl FnOnce(ConnectionId) -> T,
    ) -> (ConnectionId, &mut T) {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.len += 1;
        let slot = &mut self.slots[index as usize];
        let id = ConnectionId {
            index,
            generation: slot.generation,
        };
        let value = slot.value.insert(build(id));
        (id, value)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Remove an entry; stale ids return `None`
    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live ids in slot order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    ConnectionId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

impl<T> Default for ConnectionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut table = ConnectionTable::new();
        let (a, _) = table.insert_with(|id| (id, "a"));
        let (b, _) = table.insert_with(|id| (id, "b"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a), Some(&(a, "a")));
        assert_eq!(table.get(b).map(|v| v.1), Some("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_invalidates_id() {
        let mut table = ConnectionTable::new();
        let (a, _) = table.insert_with(|_| "a");

        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.remove(a), None);
        assert!(!table.contains(a));
        assert!(table.is_empty());

        // Slot is reused with a new generation
        let (b, _) = table.insert_with(|_| "b");
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(&"b"));
    }

    #[test]
    fn test_iter_skips_removed() {
        let mut table = ConnectionTable::new();
        let ids: Vec<_> = (0..4).map(|i| table.insert_with(move |_| i).0).collect();
        table.remove(ids[1]);
        table.remove(ids[3]);

        let live: Vec<_> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![0, 2]);
        assert_eq!(table.ids(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_get_mut() {
        let mut table = ConnectionTable::new();
        let (id, value) = table.insert_with(|_| 1);
        *value += 1;
        if let Some(value) = table.get_mut(id) {
            *value += 40;
        }
        assert_eq!(table.get(id), Some(&42));
    }
}
