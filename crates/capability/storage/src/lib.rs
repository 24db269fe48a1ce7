pub mod connection;
pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod redis;
pub mod traits;

pub use error::StorageError;
pub use in_memory::{InMemoryMeasurementWriter, InMemoryResultCache, InMemoryRoutingLookup};
pub use postgres::PgMeasurementWriter;
pub use redis::{RedisResultCache, RedisRoutingLookup};
pub use traits::{MeasurementWriter, ResultCache, RoutingLookup};
