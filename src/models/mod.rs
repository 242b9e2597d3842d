pub mod context;
pub mod dataset;
pub mod erd;
pub mod plan;
pub mod query;
pub mod result;
pub mod semantic;

pub use context::*;
pub use dataset::*;
pub use erd::*;
pub use plan::*;
pub use query::*;
pub use result::*;
pub use semantic::*;
