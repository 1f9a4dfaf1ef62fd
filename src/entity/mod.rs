//! Entity Resolver
//!
//! Maps addresses to known entities (exchanges, mining pools, treasuries)
//! through an immutable snapshot that is periodically rebuilt from an
//! external catalogue and swapped in atomically.

pub mod resolver;
pub mod source;

pub use resolver::{spawn_refresh_task, EntityResolver, EntitySnapshot};
pub use source::{EntitySource, JsonFileEntitySource, SqliteEntitySource, StaticEntitySource};
