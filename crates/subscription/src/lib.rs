//! Relay subscription decoding
//!
//! Turns a provider's base64 subscription blob into deduplicated relay
//! endpoints, and groups endpoints by the location prefix embedded in their
//! labels. This crate is pure data handling: it starts no processes and makes
//! no network calls, so it can be tested without a relay binary.
//!
//! Subscription flow:
//! 1. Caller reads the blob (file or HTTP body) and passes it to `decode()`
//! 2. Each `ss://` record becomes an `Endpoint`; informational records are
//!    dropped via the `IgnoreList`
//! 3. `group_by_location()` partitions endpoints (or anything `Labeled`) for
//!    reporting

pub mod decode;
pub mod endpoint;
pub mod error;
pub mod group;

pub use decode::{DEFAULT_IGNORE, IgnoreList, decode};
pub use endpoint::{Endpoint, Labeled};
pub use error::{Error, Result};
pub use group::{UNKNOWN_GROUP, group_by_location};
