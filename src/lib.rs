//! Time-series aggregation and flush engine.
//!
//! The engine keeps one [`list::MetricList`] per aggregation resolution. Producers
//! append in-flight aggregation elements; at aligned time boundaries a flush
//! walks each list, lets every element emit its finished samples, and frames
//! them into length-bounded binary buffers that are handed synchronously to a
//! downstream [`sink::FlushHandler`]. Buffers come from a shared
//! [`codec::pool::BufferedEncoderPool`] so sustained ingest does not churn
//! allocations.
//!
//! Flush scheduling is owned by a [`flush::FlushManager`]; the engine only
//! guarantees what happens inside one `flush()` call. See `DESIGN.md` for the
//! locking model.

pub mod clock;
pub mod codec;
pub mod config;
pub mod flush;
pub mod instrument;
pub mod list;
pub mod metric;
pub mod sink;
