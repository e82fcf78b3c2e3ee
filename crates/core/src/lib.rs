pub mod error;
pub mod model;

pub use error::{StiError, StiResult};
pub use model::*;
