//! Render Graph System
//!
//! Passes declare the resources they read and write; compilation turns those
//! declarations into dependency levels spread over the graphics, async compute
//! and async copy queues, separated by sync points carrying cross-queue waits
//! and layout transitions.
//!
//! Build order: [`ResourceTable`] -> [`GraphBuilder`] -> [`DependencyResolver`]
//! -> [`SyncPlanner`] -> [`CompiledGraph::execute`].

pub mod builder;
pub mod command_pool;
pub mod compiled;
mod executor;
pub mod pass;
pub mod resolver;
pub mod resource;
pub mod sync;

pub use builder::*;
pub use command_pool::*;
pub use compiled::*;
pub use pass::*;
pub use resolver::*;
pub use resource::*;
pub use sync::*;
