//! Core building blocks shared by every catalog module: layered settings,
//! the module lifecycle contract, and the cancellable call context.

pub mod context;
pub mod module;
pub mod registry;
pub mod settings;

pub use context::{CallContext, Cancelled};
pub use module::{InitCtx, Migration, Module};
pub use registry::ModuleRegistry;
