//! Export tables and module lookup
//!
//! A [`Module`] is an explicit table from export name to either a callable
//! method or a plain value. Tables are built once and shared; the proxy on
//! the calling side and the dispatcher inside a worker read the same table.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::RemoteError;

/// Boxed exported function
pub type MethodFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync>;

/// One exported item
#[derive(Clone)]
pub enum Export {
    /// Callable with positional arguments
    Method { arity: Option<usize>, call: MethodFn },
    /// Plain data
    Property(Value),
}

/// Whether an export is called or read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Method,
    Property,
}

/// Name, kind and arity of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDescriptor {
    pub name: String,
    pub kind: ExportKind,
    pub arity: Option<usize>,
}

impl Export {
    pub fn kind(&self) -> ExportKind {
        match self {
            Self::Method { .. } => ExportKind::Method,
            Self::Property(_) => ExportKind::Property,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method { arity, .. } => f.debug_struct("Method").field("arity", arity).finish(),
            Self::Property(value) => f.debug_tuple("Property").field(value).finish(),
        }
    }
}

/// Errors resolving a module or an export
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module {module} has no export named {export}")]
    UnknownExport { module: String, export: String },

    #[error("export {0} is not callable")]
    NotCallable(String),

    #[error("export {name} takes {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl From<ModuleError> for RemoteError {
    fn from(err: ModuleError) -> Self {
        RemoteError::new("ModuleError", err.to_string())
    }
}

/// A named table of exports
///
/// # Example
///
/// ```
/// use serde_json::{json, Value};
/// use threadline::module::{ExportKind, Module};
/// use threadline::protocol::RemoteError;
///
/// let module = Module::new("math")
///     .with_fn("double", Some(1), |args: Vec<Value>| {
///         let n = args[0].as_i64().unwrap_or_default();
///         Ok::<_, RemoteError>(json!(n * 2))
///     })
///     .with_property("version", json!("1.0"));
///
/// assert_eq!(module.descriptor("double").unwrap().kind, ExportKind::Method);
/// assert!(module.get("missing").is_none());
/// ```
#[derive(Clone)]
pub struct Module {
    name: String,
    exports: HashMap<String, Export>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export a synchronous function
    pub fn with_fn<F, E>(self, name: impl Into<String>, arity: Option<usize>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, E> + Send + Sync + 'static,
        E: Into<RemoteError>,
    {
        let call: MethodFn = Arc::new(move |args: Vec<Value>| {
            let result: Result<Value, RemoteError> = f(args).map_err(Into::into);
            async move { result }.boxed()
        });
        self.with_export(name, Export::Method { arity, call })
    }

    /// Export an async function
    pub fn with_async_fn<F, Fut, E>(self, name: impl Into<String>, arity: Option<usize>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<RemoteError>,
    {
        let call: MethodFn = Arc::new(move |args: Vec<Value>| {
            f(args)
                .map(|result| result.map_err(Into::<RemoteError>::into))
                .boxed()
        });
        self.with_export(name, Export::Method { arity, call })
    }

    /// Export a plain value
    pub fn with_property(self, name: impl Into<String>, value: Value) -> Self {
        self.with_export(name, Export::Property(value))
    }

    pub fn with_export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name.into(), export);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<ExportDescriptor> {
        let export = self.exports.get(name)?;
        Some(ExportDescriptor {
            name: name.to_string(),
            kind: export.kind(),
            arity: match export {
                Export::Method { arity, .. } => *arity,
                Export::Property(_) => None,
            },
        })
    }

    /// Descriptors of every export, sorted by name
    pub fn descriptors(&self) -> Vec<ExportDescriptor> {
        let mut names: Vec<&String> = self.exports.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.descriptor(name))
            .collect()
    }

    /// Invoke method `name`
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RemoteError> {
        match self.export(name)? {
            Export::Method { arity, call } => {
                if let Some(expected) = *arity {
                    if expected != args.len() {
                        return Err(ModuleError::Arity {
                            name: name.to_string(),
                            expected,
                            actual: args.len(),
                        }
                        .into());
                    }
                }
                let call = Arc::clone(call);
                call(args).await
            }
            Export::Property(_) => Err(ModuleError::NotCallable(name.to_string()).into()),
        }
    }

    /// Read export `name`; methods read as their descriptor
    pub fn read(&self, name: &str) -> Result<Value, RemoteError> {
        match self.export(name)? {
            Export::Property(value) => Ok(value.clone()),
            Export::Method { .. } => serde_json::to_value(self.descriptor(name))
                .map_err(|e| RemoteError::new("SerializationError", e.to_string())),
        }
    }

    fn export(&self, name: &str) -> Result<&Export, ModuleError> {
        self.exports.get(name).ok_or_else(|| ModuleError::UnknownExport {
            module: self.name.clone(),
            export: name.to_string(),
        })
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("exports", &self.descriptors())
            .finish()
    }
}

/// Resolves a filename to its export table
pub trait ModuleLoader: Send + Sync {
    fn load(&self, filename: &str) -> Option<Arc<Module>>;
}

/// Registry of modules keyed by filename
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its own name
    pub fn register(&mut self, module: Module) -> Arc<Module> {
        let module = Arc::new(module);
        self.modules
            .insert(module.name().to_string(), Arc::clone(&module));
        module
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.register(module);
        self
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.modules.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a module, failing with [`ModuleError::UnknownModule`]
    pub fn resolve(&self, filename: &str) -> Result<Arc<Module>, ModuleError> {
        self.load(filename)
            .ok_or_else(|| ModuleError::UnknownModule(filename.to_string()))
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, filename: &str) -> Option<Arc<Module>> {
        self.modules.get(filename).cloned()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}
