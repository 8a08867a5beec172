use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

/// Separator placed between the base name and the counter of every generated
/// name. Source identifiers may never contain it.
pub const GENERATED_NAME_SEPARATOR: char = '.';

#[derive(Debug, Default)]
pub struct InterningTable {
    strings: RwLock<Vec<&'static str>>,
}

pub static INTERNING_TABLE: Lazy<Arc<InterningTable>> = Lazy::new(Default::default);

impl InterningTable {
    pub fn get(&self, index: u32) -> Option<&'static str> {
        let strings = self.strings.read().unwrap_or_else(|e| e.into_inner());

        strings.get(index as usize).copied()
    }

    pub fn insert_if_absent(&self, string: &str) -> u32 {
        if let Some(index) = self.index_of(string) {
            return index;
        }

        let mut strings = self.strings.write().unwrap_or_else(|e| e.into_inner());

        // another writer may have raced us between the read and the write lock
        if let Some(index) = strings.iter().position(|s| *s == string) {
            return index as _;
        }

        strings.push(Box::leak(Box::new(string.to_owned())));
        (strings.len() - 1) as _
    }

    pub fn index_of(&self, string: &str) -> Option<u32> {
        let strings = self.strings.read().unwrap_or_else(|e| e.into_inner());

        strings.iter().position(|s| *s == string).map(|i| i as _)
    }
}

/// An index into the string interning table
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(value: &str) -> Self {
        let index = INTERNING_TABLE.insert_if_absent(value);

        Self(index)
    }

    pub fn value(&self) -> &'static str {
        INTERNING_TABLE.get(self.0).expect("Once an interned symbol is created, the string it references should never be removed from the table")
    }

    /// True for names produced by a [`NameGenerator`]
    pub fn is_generated(&self) -> bool {
        self.value().contains(GENERATED_NAME_SEPARATOR)
    }
}

impl From<&str> for InternedSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InternedSymbol")
            .field(&self.0)
            .field(&self.value())
            .finish()
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

/// Hands out fresh names for temporaries and labels. One generator lives for
/// exactly one compilation run, so numbering restarts at 1 for every run while
/// staying unique within it.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counter: usize,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, base: &str) -> InternedSymbol {
        self.counter += 1;

        InternedSymbol::new(&format!(
            "{base}{GENERATED_NAME_SEPARATOR}{}",
            self.counter
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = InternedSymbol::new("interning_is_stable");
        let b = InternedSymbol::new("interning_is_stable");

        assert_eq!(a, b);
        assert_eq!(a.value(), "interning_is_stable");
    }

    #[test]
    fn generated_names_are_unique_and_marked() {
        let mut names = NameGenerator::new();

        let first = names.fresh("tmp");
        let second = names.fresh("tmp");

        assert_ne!(first, second);
        assert_eq!(first.value(), "tmp.1");
        assert!(first.is_generated());
        assert!(!InternedSymbol::new("tmp").is_generated());
    }

    #[test]
    fn fresh_generators_restart_numbering() {
        let mut a = NameGenerator::new();
        let mut b = NameGenerator::new();

        assert_eq!(a.fresh("x"), b.fresh("x"));
    }
}
