pub mod chat;
pub mod data_source;
pub mod knowledge;
pub mod metric;
pub mod organization;
pub mod pod;
pub mod query;

pub use chat::*;
pub use data_source::*;
pub use knowledge::*;
pub use metric::*;
pub use organization::*;
pub use pod::*;
pub use query::*;
