//! Connection lifecycle management
//!
//! - ConnectionPool: in-flight attempts and the connected set behind one lock
//! - ConnectionAttempt: a single time-boxed attempt that resolves exactly once

pub mod attempt;
pub mod pool;

pub use attempt::{ConnectionAttempt, FailureHandler, SuccessHandler};
pub use pool::{ConnectionError, ConnectionPool, DisconnectHandler};
