pub mod observability;
pub mod persistence;

pub use observability::*;
pub use persistence::*;
