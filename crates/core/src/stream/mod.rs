pub mod decoder;

pub use decoder::{Fragment, StreamDecoder};
