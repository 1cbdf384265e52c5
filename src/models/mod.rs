pub mod constraints;
pub mod context;
pub mod filter;
pub mod plan;
pub mod schema;
