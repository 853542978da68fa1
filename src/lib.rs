//! Leveled aggregation index over an ordered transactional key-value store.
//!
//! Values inserted under ordered tuple keys are summarized at several levels
//! so range and group-by aggregates are answered by reading a small number of
//! precomputed entries instead of every row.
//!
//! ```
//! use levelagg::{key, AggIndex, IndexOptions, MemStore, QueryOpts, Sum};
//!
//! # fn main() -> levelagg::Result<()> {
//! let index = AggIndex::open(MemStore::new(), Sum::<i64>::new(), IndexOptions::new())?;
//! index.insert(&key![2017, 3, 1], 9)?;
//! index.insert(&key![2017, 4, 1], 7)?;
//! let rows = index.query(&QueryOpts::new())?;
//! assert_eq!(rows[0].value, 16);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod index;
pub mod key;
pub mod logging;
pub mod primitives;
pub mod reduce;
pub mod store;

pub use error::{AggError, Result};
pub use index::{
    AggIndex, CounterMetrics, IndexMetrics, IndexOptions, NoopMetrics, QueryOpts, QueryPath,
    QueryRow, QueryTrace, ScanRecord, VerifyFinding, VerifyReport,
};
pub use key::{IndexKey, Key, KeyPart};
pub use logging::init_logging;
pub use reduce::{Max, Min, Reducer, Sum, ValCodec};
pub use store::{KeySelector, KvStore, KvTransaction, MemStore, RangeOptions, RetryPolicy};
