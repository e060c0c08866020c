//! Database abstraction layer.
//!
//! The pipeline talks to target databases only through [`ConnectionFactory`] and
//! [`SchemaIntrospector`].
//!
//! # Feature Flags
//!
//! - `postgres` - Enable the PostgreSQL driver (enabled by default)

pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod result;
pub mod traits;

pub use pool::{PoolConfig, PoolMetrics, PoolMetricsSnapshot};
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
pub use result::*;
pub use traits::{ConnectionFactory, SchemaIntrospector};
