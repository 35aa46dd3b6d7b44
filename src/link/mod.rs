// SPDX-License-Identifier: Apache-2.0

//! Linked tables
//!
//! A linked table proxies scans, counts and row writes to a table living in
//! a remote database, over one connection owned by the table.

pub mod config;
pub mod connection;
pub mod index;
pub mod introspect;
pub mod normalize;
pub mod sql;
pub mod statement_cache;
pub mod table;

pub use config::LinkConfig;
pub use connection::{ConnectionHandle, MAX_RETRY};
pub use index::{IndexDef, IndexKind, LinkedCursor, LinkedIndex};
pub use table::{LinkedTable, UpdateOutcome, ROW_COUNT_APPROXIMATION};
