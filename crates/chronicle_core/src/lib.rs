pub mod error;
pub mod ids;
pub mod record;

pub use error::{ChronicleError, ChronicleResult};
pub use ids::*;
pub use record::*;
