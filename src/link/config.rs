// SPDX-License-Identifier: Apache-2.0

//! Linked table configuration
//!
//! Everything needed to (re)create a linked table from its definition alone.

use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult};
use crate::observability::Sensitive;

/// Connection and behavior options of one linked table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Remote driver identity (e.g., "postgres", "org.postgresql.Driver").
    pub driver: String,
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "empty_password")]
    pub password: Sensitive<String>,
    /// Remote schema; `None` searches every schema visible to the user.
    #[serde(default)]
    pub schema: Option<String>,
    /// Remote table name, possibly schema-qualified (`schema.table`).
    pub table: String,
    /// Send UPDATE statements instead of DELETE + INSERT pairs.
    #[serde(default)]
    pub emit_updates: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub global_temporary: bool,
    /// Create the table even if the first connect fails.
    #[serde(default)]
    pub force: bool,
}

fn empty_password() -> Sensitive<String> {
    Sensitive::new(String::new())
}

impl LinkConfig {
    pub fn new(
        driver: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            user: user.into(),
            password: Sensitive::new(password.into()),
            schema: None,
            table: table.into(),
            emit_updates: false,
            read_only: false,
            temporary: false,
            global_temporary: false,
            force: false,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_emit_updates(mut self, emit_updates: bool) -> Self {
        self.emit_updates = emit_updates;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_temporary(mut self, temporary: bool, global: bool) -> Self {
        self.temporary = temporary || global;
        self.global_temporary = global;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Parses a JSON definition and validates it.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::validation(format!("Invalid link definition: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.url.trim().is_empty() {
            return Err(EngineError::validation("Connection URL cannot be empty"));
        }
        if self.table.trim().is_empty() {
            return Err(EngineError::validation("Remote table name cannot be empty"));
        }
        if let Some(schema) = &self.schema {
            if schema.trim().is_empty() {
                return Err(EngineError::validation("Remote schema cannot be blank"));
            }
        }
        Ok(())
    }

    /// True for Oracle URLs (`jdbc:oracle:...` or `oracle://...`).
    pub fn is_oracle(&self) -> bool {
        let url = self.url.trim_start().to_ascii_lowercase();
        url.starts_with("jdbc:oracle:") || url.starts_with("oracle:")
    }
}
