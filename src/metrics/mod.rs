//! Metrics pipeline (spec.md §4.6, §4.7): the streaming histogram, the
//! bounded sampling reservoir, and the aggregator task that ties both to
//! the event loop's completion queue.

mod aggregator;
mod histogram;
mod reservoir;

pub use aggregator::Aggregator;
pub use histogram::LatencyHistogram;
pub use reservoir::{trace_from, SamplingPolicy, SampleReservoir};
