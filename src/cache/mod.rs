pub mod coalesce;
pub mod concurrency;

pub use coalesce::{SampleCoalescer, SampleKey};
pub use concurrency::ConcurrencyLimiter;
