pub mod action;
pub mod snapshot;

pub use action::*;
pub use snapshot::*;
