//! Request handlers.

pub mod escalate;
pub mod health;
pub mod pipeline;

pub use escalate::*;
pub use health::*;
pub use pipeline::*;
