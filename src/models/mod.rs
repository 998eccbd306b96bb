pub mod cell;
pub mod hub;

pub use cell::{LoadError, ModelCell};
