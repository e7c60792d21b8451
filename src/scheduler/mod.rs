pub mod context;
pub mod dispatcher;

pub use context::Context;
pub use dispatcher::{DispatchStatus, Dispatcher};
