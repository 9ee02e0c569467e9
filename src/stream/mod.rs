//! Stream combinators for telemetry frames

mod coalesce;

pub use coalesce::{Coalesce, CoalesceExt};
