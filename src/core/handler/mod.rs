// src/core/handler/mod.rs

//! Command routing: the handler registry and the dispatcher that consults it.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Dispatcher, NextAction};
pub use registry::{AsyncHandler, CommandRegistry, Route, SyncHandler};
