//! The label table built during the first assembly pass: name to address,
//! plus which source line first defined each name so a later redefinition
//! can report where the original was.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    addresses: HashMap<String, u32>,
    first_line: HashMap<String, usize>,
}

impl LabelTable {
    pub fn new() -> LabelTable {
        LabelTable::default()
    }

    /// Records `name` at `address`. Returns the line the label was first
    /// defined at if this is a redefinition (the caller turns that into a
    /// `DuplicateLabel` diagnostic); the second definition does not
    /// overwrite the first.
    pub fn insert(&mut self, name: String, address: u32, line: usize) -> Option<usize> {
        if let Some(&first) = self.first_line.get(&name) {
            return Some(first);
        }
        self.first_line.insert(name.clone(), line);
        self.addresses.insert(name, address);
        None
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.addresses.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.addresses.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_definition_is_reported_against_the_first() {
        let mut labels = LabelTable::new();
        assert_eq!(labels.insert("loop".to_string(), 0x80, 3), None);
        assert_eq!(labels.insert("loop".to_string(), 0x90, 10), Some(3));
        assert_eq!(labels.get("loop"), Some(0x80));
    }
}
