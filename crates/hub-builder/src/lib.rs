//! Builder/merger: cross-source merge into a target collection.

mod engine;
pub mod mapper;

pub use engine::{Builder, Error};
pub use mapper::{KeyLookupMapper, Mapper, MapperRegistry, TransparentMapper};
