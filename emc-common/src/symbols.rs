//! Symbol table for named module-scoped values
//!
//! A flat name-to-value map with insertion-order-irrelevant lookup. The
//! emitter uses it to intern string-literal globals so repeated literals
//! with the same name reuse one global.

use std::collections::HashMap;

/// Simple symbol table mapping names to values
#[derive(Debug, Clone)]
pub struct SymbolTable<V> {
    symbols: HashMap<String, V>,
}

impl<V> SymbolTable<V> {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
        }
    }

    /// Bind a name to a value, replacing any previous binding
    pub fn insert(&mut self, name: impl Into<String>, value: V) {
        self.symbols.insert(name.into(), value);
    }

    /// Look up a value by name
    pub fn get(&self, name: &str) -> Option<&V> {
        self.symbols.get(name)
    }

    /// Check if a name is bound
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterate over all bindings, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.symbols.iter()
    }
}

impl<V> Default for SymbolTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut table: SymbolTable<u32> = SymbolTable::new();
        assert!(table.is_empty());

        table.insert("fmt", 1);
        table.insert("msg", 2);

        assert_eq!(table.get("fmt"), Some(&1));
        assert_eq!(table.get("msg"), Some(&2));
        assert_eq!(table.get("missing"), None);
        assert!(table.contains("fmt"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_insert_replaces() {
        let mut table: SymbolTable<&str> = SymbolTable::new();
        table.insert("name", "first");
        table.insert("name", "second");
        assert_eq!(table.get("name"), Some(&"second"));
        assert_eq!(table.len(), 1);
    }
}
