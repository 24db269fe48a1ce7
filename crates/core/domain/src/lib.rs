pub mod data;

pub use data::{Reading, ScalarValue};
