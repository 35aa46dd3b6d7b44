// SPDX-License-Identifier: Apache-2.0

//! Idle prepared statements keyed by their exact SQL text.
//!
//! Not synchronized on its own: it lives inside the connection handle's
//! state and is only touched while that state is locked.

use std::collections::HashMap;

#[derive(Debug)]
pub struct StatementCache<S> {
    idle: HashMap<String, S>,
}

impl<S> StatementCache<S> {
    pub fn new() -> Self {
        Self {
            idle: HashMap::new(),
        }
    }

    /// Removes and returns the idle statement for `sql`, if any.
    ///
    /// A checked-out statement is invisible to other executions of the same
    /// SQL until it is given back.
    pub fn checkout(&mut self, sql: &str) -> Option<S> {
        self.idle.remove(sql)
    }

    /// Makes `statement` available again, replacing any statement another
    /// execution gave back for the same SQL in the meantime.
    pub fn give_back(&mut self, sql: &str, statement: S) {
        self.idle.insert(sql.to_string(), statement);
    }

    /// Drops every cached statement.
    pub fn clear(&mut self) {
        self.idle.clear();
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }
}

impl<S> Default for StatementCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
