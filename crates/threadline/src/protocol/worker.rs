//! Worker-side request handling
//!
//! What runs inside a remote context: decode the envelope, resolve the
//! target module and export, and encode the outcome as a [`WorkerResponse`].

use tracing::trace;

use super::message::{MessageTarget, WorkerMessage, WorkerResponse};
use crate::module::{Module, ModuleError, ModuleLoader};

/// Run the envelope's target against `module`
pub async fn dispatch(module: &Module, message: &WorkerMessage) -> WorkerResponse {
    let result = match message.target() {
        MessageTarget::Method { name, args } => {
            trace!(module = module.name(), method = name, "Invoking export");
            module.call(name, args.to_vec()).await
        }
        MessageTarget::Property(name) => {
            trace!(module = module.name(), property = name, "Reading export");
            module.read(name)
        }
        MessageTarget::Load => Ok(serde_json::Value::Null),
    };
    result.into()
}

/// Resolve the envelope's module through `loader`, then [`dispatch`]
pub async fn handle(loader: &dyn ModuleLoader, message: &WorkerMessage) -> WorkerResponse {
    match loader.load(&message.filename) {
        Some(module) => dispatch(&module, message).await,
        None => WorkerResponse::Err {
            error: ModuleError::UnknownModule(message.filename.clone()).into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleRegistry;
    use crate::protocol::RemoteError;
    use serde_json::{json, Value};

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new().with_module(
            Module::new("greet")
                .with_fn("hello", Some(1), |args: Vec<Value>| {
                    let name = args[0].as_str().unwrap_or("nobody").to_string();
                    Ok::<_, RemoteError>(json!(format!("hello {name}")))
                })
                .with_fn("boom", None, |_| {
                    Err::<Value, _>(RemoteError::new("Error", "kaboom"))
                })
                .with_property("greeting", json!("hi")),
        )
    }

    #[tokio::test]
    async fn test_method_call() {
        let message = WorkerMessage::method("greet", "hello", vec![json!("ada")]);
        let response = handle(&registry(), &message).await;
        assert_eq!(response, WorkerResponse::Ok { value: json!("hello ada") });
    }

    #[tokio::test]
    async fn test_property_read() {
        let message = WorkerMessage::property("greet", "greeting");
        let response = handle(&registry(), &message).await;
        assert_eq!(response, WorkerResponse::Ok { value: json!("hi") });
    }

    #[tokio::test]
    async fn test_thrown_error() {
        let message = WorkerMessage::method("greet", "boom", vec![]);
        let response = handle(&registry(), &message).await;
        assert_eq!(
            response,
            WorkerResponse::Err {
                error: RemoteError::new("Error", "kaboom")
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let message = WorkerMessage::method("missing", "f", vec![]);
        let WorkerResponse::Err { error } = handle(&registry(), &message).await else {
            panic!("expected an error response");
        };
        assert_eq!(error.name, "ModuleError");
        assert!(error.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_load_only() {
        let response = handle(&registry(), &WorkerMessage::load("greet")).await;
        assert_eq!(response, WorkerResponse::Ok { value: Value::Null });
    }
}
