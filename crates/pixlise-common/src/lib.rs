//! PIXLISE Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Error taxonomy and logging shared by the dataset importer and the
//! catalog indexers.
//!
//! # Example
//!
//! ```no_run
//! use pixlise_common::{PixliseError, Result};
//!
//! fn require_rtt(rtt: i64) -> Result<i64> {
//!     if rtt <= 0 {
//!         return Err(PixliseError::InvalidFormat {
//!             file: "summary".into(),
//!             reason: format!("RTT must be positive, got {rtt}"),
//!         });
//!     }
//!     Ok(rtt)
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{PixliseError, Result};
