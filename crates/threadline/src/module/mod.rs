//! Modules and module proxies
//!
//! Exports are registered up front in a [`Module`] table instead of being
//! discovered at runtime. A [`ModuleRegistry`] maps filenames to tables and
//! serves both sides: the worker resolves call targets from it, the host
//! builds a [`ModuleProxy`] from it.

mod proxy;
mod registry;

pub use proxy::{
    DeferredCall, Invocation, ModuleProxy, PendingCall, ProxyConfig, ProxyMember, RemoteExport,
    Terminator,
};
pub use registry::{
    Export, ExportDescriptor, ExportKind, MethodFn, Module, ModuleError, ModuleLoader,
    ModuleRegistry,
};
