//! The in-memory string -> string map that log entries get applied to.

use std::collections::HashMap;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateMachine {
    map: HashMap<String, String>,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            map: HashMap::new(),
        }
    }

    /// A missing key reads as the empty string, per the data model.
    pub fn get(&self, key: &str) -> String {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
