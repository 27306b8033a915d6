pub mod error;
pub mod ids;
pub mod value;

pub use error::CoreError;
pub use ids::*;
pub use value::Value;
