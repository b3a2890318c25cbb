//! Symbol table linking generated code to runtime entry points.

use std::collections::HashMap;
use std::fmt;

/// Error raised when linkage against the runtime fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    /// A symbol was registered twice.
    Duplicate(String),
    /// Lookup miss for a built-in the generated code needs.
    NotFound(String),
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolError::Duplicate(name) => write!(f, "symbol already registered: {}", name),
            SymbolError::NotFound(name) => write!(f, "symbol not found: {}", name),
        }
    }
}

impl std::error::Error for SymbolError {}

/// Name -> code address map consulted at code-generation time.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, address: usize) -> Result<(), SymbolError> {
        if self.symbols.contains_key(name) {
            return Err(SymbolError::Duplicate(name.to_string()));
        }
        self.symbols.insert(name.to_string(), address);
        Ok(())
    }

    pub fn address_of(&self, name: &str) -> Result<usize, SymbolError> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| SymbolError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.symbols.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut table = SymbolTable::new();
        table.register("writes", 0x1000).unwrap();
        assert_eq!(table.address_of("writes").unwrap(), 0x1000);
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut table = SymbolTable::new();
        table.register("writes", 0x1000).unwrap();
        assert_eq!(
            table.register("writes", 0x2000),
            Err(SymbolError::Duplicate("writes".into()))
        );
    }

    #[test]
    fn test_missing_symbol_is_an_error() {
        let table = SymbolTable::new();
        assert_eq!(
            table.address_of("nosuch"),
            Err(SymbolError::NotFound("nosuch".into()))
        );
    }
}
