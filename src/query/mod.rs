pub mod builder;
pub mod error;
pub mod translate;
pub mod types;

pub use builder::QueryBuilder;
pub use error::QueryError;
pub use translate::{parse_relations, translate};
pub use types::*;
