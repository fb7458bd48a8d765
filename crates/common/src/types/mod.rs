mod graph;
mod recommendation;
mod records;

pub use graph::*;
pub use recommendation::*;
pub use records::*;
