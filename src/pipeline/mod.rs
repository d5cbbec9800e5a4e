//! Delivery pipeline components.
//!
//! One thread per session carries every unit from the source to the sinks:
//!
//! ```text
//! Session Source → Delivery Bridge → Router → Sinks (in attach order)
//! ```
//!
//! - **Delivery Bridge**: Drives the source, wraps payloads into units, keeps stats
//! - **Router**: Caches the session format, primes late sinks, fans units out
//!
//! There is no queue between the stages. A sink that blocks in `on_unit`
//! blocks the source, which is the only backpressure the distributor has.

mod delivery;
mod router;

pub(crate) use delivery::{run_session, SessionContext};
pub(crate) use router::Router;
pub use router::SinkId;
