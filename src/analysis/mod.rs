// Analysis module - Measurements of the instrument driven by the engine

pub mod response;

pub use response::{Response, ResponseStats};
