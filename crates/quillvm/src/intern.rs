//! String interning for `tagged` names.
//!
//! `tagged` values (§3) carry a name that must compare by identity, not by
//! byte content, so equality between two tagged values is a cheap integer
//! comparison. Interning happens once per unique name, the first time a
//! module references it; the table is owned by the module and lives as long
//! as the module does.

use ahash::AHashMap;

/// Index into an [`Interner`]'s table.
///
/// Mirrors `StringId` in the teacher (`ouros::intern::StringId`): a small
/// integer standing in for a string so that comparisons and copies don't
/// touch the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NameId(u32);

impl NameId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Owns the unique set of `tagged` names referenced by a module.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Interner {
    names: Vec<Box<str>>,
    #[serde(skip)]
    lookup: AHashMap<Box<str>, NameId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning the existing id if already interned.
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = NameId(u32::try_from(self.names.len()).expect("more than u32::MAX interned names"));
        self.names.push(name.into());
        self.lookup.insert(name.into(), id);
        id
    }

    pub fn get(&self, id: NameId) -> &str {
        &self.names[id.index()]
    }

    /// Rebuilds the lookup table after deserialization, since the hash map
    /// itself is not serialized (names are, and order is stable).
    pub fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (i, name) in self.names.iter().enumerate() {
            self.lookup.insert(name.clone(), NameId(u32::try_from(i).unwrap()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_name_twice_returns_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("Ok");
        let b = interner.intern("Ok");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_get_distinct_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("Ok");
        let b = interner.intern("Err");
        assert_ne!(a, b);
        assert_eq!(interner.get(a), "Ok");
        assert_eq!(interner.get(b), "Err");
    }
}
