// SPDX-License-Identifier: Apache-2.0

// Remote engine module
// Driver seam, value model and error taxonomy shared by linked tables

pub mod drivers;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult, RemoteError, RemoteResult};
pub use traits::{DetachedSession, HostCatalog, RemoteConnection, RemoteDriver, SessionContext};
pub use types::*;
