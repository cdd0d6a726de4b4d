//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::context::CallContext;
use crate::schema::{ArgSpec, Args, SchemaError};

/// Future returned by a boxed handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

type HandlerFn = Arc<dyn Fn(CallContext, Args) -> HandlerFuture + Send + Sync>;

/// One callable method: argument schema plus handler.
#[derive(Clone)]
pub struct MethodDescriptor {
    handler: HandlerFn,
    args: Vec<ArgSpec>,
    no_payload: bool,
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("args", &self.args)
            .field("no_payload", &self.no_payload)
            .finish()
    }
}

impl MethodDescriptor {
    /// Describe a method from `name:type` / `name?:type` declarations.
    ///
    /// Fails when a declaration is malformed, repeats a name, or gives a
    /// required argument a type with no validator.
    pub fn new<F, Fut>(declarations: &[&str], handler: F) -> Result<Self, SchemaError>
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let args = declarations
            .iter()
            .map(|declaration| ArgSpec::parse(declaration))
            .collect::<Result<Vec<_>, _>>()?;
        Self::typed(args, handler)
    }

    /// Describe a method from already typed argument specs.
    pub fn typed<F, Fut>(args: Vec<ArgSpec>, handler: F) -> Result<Self, SchemaError>
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        for (index, spec) in args.iter().enumerate() {
            if args[..index].iter().any(|earlier| earlier.name() == spec.name()) {
                return Err(SchemaError::Duplicate(spec.name().to_owned()));
            }
        }
        Ok(Self {
            handler: Arc::new(move |context, args| handler(context, args).boxed()),
            args,
            no_payload: false,
        })
    }

    /// Reply with an empty object whatever the handler returns.
    pub fn no_payload(mut self) -> Self {
        self.no_payload = true;
        self
    }

    /// Declared arguments in order.
    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    /// Whether the handler's result is discarded.
    pub fn is_no_payload(&self) -> bool {
        self.no_payload
    }

    /// Run the handler.
    pub fn invoke(&self, context: CallContext, args: Args) -> HandlerFuture {
        (self.handler)(context, args)
    }

    fn schema(&self) -> MethodSchema {
        MethodSchema {
            args: self.args.iter().map(ToString::to_string).collect(),
            no_payload: self.no_payload,
        }
    }
}

/// Symbol a generated client stub must import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StubImport {
    /// Imported name.
    pub symbol: String,
    /// Module it comes from.
    pub module: String,
}

/// A named bundle of methods and constants registered as `<name>:<method>`.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    functions: IndexMap<String, MethodDescriptor>,
    constants: IndexMap<String, Value>,
    imports: Vec<StubImport>,
}

impl ServiceDescriptor {
    /// Empty service called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: IndexMap::new(),
            constants: IndexMap::new(),
            imports: Vec::new(),
        }
    }

    /// Add or replace a method.
    pub fn method(mut self, name: impl Into<String>, method: MethodDescriptor) -> Self {
        self.functions.insert(name.into(), method);
        self
    }

    /// Add a constant exposed to generated stubs.
    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    /// Add an import needed by generated stubs.
    pub fn import(mut self, symbol: impl Into<String>, module: impl Into<String>) -> Self {
        self.imports.push(StubImport {
            symbol: symbol.into(),
            module: module.into(),
        });
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Methods in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (&str, &MethodDescriptor)> {
        self.functions.iter().map(|(name, method)| (name.as_str(), method))
    }

    /// Method called `name`.
    pub fn function(&self, name: &str) -> Option<&MethodDescriptor> {
        self.functions.get(name)
    }

    /// Constants in declaration order.
    pub fn constants(&self) -> &IndexMap<String, Value> {
        &self.constants
    }

    /// Wire action for `method`.
    pub fn action(&self, method: &str) -> String {
        format!("{}:{}", self.name, method)
    }

    /// Serialisable description of the service.
    pub fn schema(&self) -> ServiceSchema {
        ServiceSchema {
            name: self.name.clone(),
            functions: self
                .functions
                .iter()
                .map(|(name, method)| (name.clone(), method.schema()))
                .collect(),
            constants: self.constants.clone(),
            imports: self.imports.clone(),
        }
    }
}

/// Description of one method in a [`ServiceSchema`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSchema {
    /// Declarations as `name:type` / `name?:type`.
    pub args: Vec<String>,
    /// Whether replies carry no payload.
    pub no_payload: bool,
}

/// Serialisable description of a service, used to generate client stubs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSchema {
    /// Service name.
    pub name: String,
    /// Methods in declaration order.
    pub functions: IndexMap<String, MethodSchema>,
    /// Constants in declaration order.
    pub constants: IndexMap<String, Value>,
    /// Imports stubs need.
    pub imports: Vec<StubImport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(declarations: &[&str]) -> Result<MethodDescriptor, SchemaError> {
        MethodDescriptor::new(declarations, |_context, _args| async { Ok(Value::Null) })
    }

    #[test]
    fn unknown_required_type_is_rejected_when_described() {
        let err = noop(&["when:Date"]).expect_err("unknown type");
        assert_eq!(
            err,
            SchemaError::UnknownType {
                argument: "when".into(),
                token: "Date".into()
            }
        );
        assert!(noop(&["when?:Date"]).is_ok());
    }

    #[test]
    fn duplicate_and_malformed_declarations_are_rejected() {
        assert_eq!(
            noop(&["id:string", "id:integer"]).expect_err("duplicate"),
            SchemaError::Duplicate("id".into())
        );
        assert!(matches!(
            noop(&["no-type"]).expect_err("malformed"),
            SchemaError::Malformed(_)
        ));
    }

    #[test]
    fn schema_lists_methods_in_order() {
        let service = ServiceDescriptor::new("Album")
            .method("list", noop(&[]).expect("list"))
            .method(
                "rename",
                noop(&["id:string", "title?:string"]).expect("rename").no_payload(),
            )
            .constant("MAX_TITLE", json!(120))
            .import("AlbumId", "./types");

        assert_eq!(service.action("rename"), "Album:rename");
        let schema = serde_json::to_value(service.schema()).expect("serialise");
        assert_eq!(
            schema,
            json!({
                "name": "Album",
                "functions": {
                    "list": { "args": [], "noPayload": false },
                    "rename": { "args": ["id:string", "title?:string"], "noPayload": true }
                },
                "constants": { "MAX_TITLE": 120 },
                "imports": [{ "symbol": "AlbumId", "module": "./types" }]
            })
        );
        let names: Vec<_> = schema["functions"]
            .as_object()
            .expect("functions")
            .keys()
            .cloned()
            .collect();
        assert_eq!(names, ["list", "rename"]);
    }
}
