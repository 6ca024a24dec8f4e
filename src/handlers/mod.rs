pub mod write;

pub use write::{DataWriter, WriteOutcome, default_item, parse_item};
