//! The two pipeline stages and the pieces they share.
//!
//! - [`fetcher`]: API → object storage
//! - [`normalizer`]: storage event → object → `dolar` table

pub mod decode;
pub mod events;
pub mod fetcher;
pub mod normalizer;

pub use events::{ObjectLocation, StorageEvent};
pub use fetcher::{Fetcher, FetchError, FetchReport};
pub use normalizer::{LoadSummary, NormalizeError, Normalizer, ObjectOutcome};
