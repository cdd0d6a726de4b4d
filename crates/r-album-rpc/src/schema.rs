//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Argument schemas and their validators.
//!
//! Each declared argument is a `(name, kind, optional)` triple. Validation is
//! a pure function from the raw JSON value to a [`TypedValue`].

use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Closed set of argument kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// JSON string.
    String,
    /// Any JSON number.
    Integer,
    /// JSON boolean.
    Boolean,
    /// Object or array; a string is parsed as JSON.
    Structured,
    /// Anything, passed through unchanged.
    Any,
}

impl ArgKind {
    /// Kind for a type token used in argument declarations.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "string" | "istring" => Some(ArgKind::String),
            "integer" | "number" => Some(ArgKind::Integer),
            "boolean" => Some(ArgKind::Boolean),
            "object" | "ComponentMap" | "JSONPatch" => Some(ArgKind::Structured),
            "any" => Some(ArgKind::Any),
            _ => None,
        }
    }

    /// Canonical token for this kind.
    pub fn token(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
            ArgKind::Structured => "object",
            ArgKind::Any => "any",
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::Structured => "object",
            ArgKind::Any => "any",
        }
    }

    /// Validate `raw` against this kind. `None` means the argument was absent.
    pub fn validate(&self, raw: Option<&Value>) -> Result<TypedValue, String> {
        match (self, raw) {
            (ArgKind::Any, raw) => Ok(TypedValue::Any(raw.cloned().unwrap_or(Value::Null))),
            (ArgKind::String, Some(Value::String(s))) => Ok(TypedValue::String(s.clone())),
            (ArgKind::Integer, Some(Value::Number(n))) => Ok(TypedValue::Integer(n.clone())),
            (ArgKind::Boolean, Some(Value::Bool(b))) => Ok(TypedValue::Boolean(*b)),
            (ArgKind::Structured, Some(Value::String(s))) if s.is_empty() => {
                Ok(TypedValue::Structured(Value::Object(Map::new())))
            }
            (ArgKind::Structured, Some(Value::String(s))) => serde_json::from_str(s)
                .map(TypedValue::Structured)
                .map_err(|err| format!("invalid JSON ({err})")),
            (ArgKind::Structured, Some(value @ (Value::Object(_) | Value::Array(_) | Value::Null))) => {
                Ok(TypedValue::Structured(value.clone()))
            }
            (_, raw) => Err(json_type_name(raw).to_owned()),
        }
    }
}

fn json_type_name(raw: Option<&Value>) -> &'static str {
    match raw {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

/// Problems in an argument declaration, found when a method is described.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The declaration is not `name:type` or `name?:type`.
    #[error("malformed argument declaration '{0}', expected name:type or name?:type")]
    Malformed(String),
    /// A required argument names a type with no validator.
    #[error("validator for type {token} does not exist (argument name is {argument})")]
    UnknownType {
        /// Argument name.
        argument: String,
        /// Type token as declared.
        token: String,
    },
    /// The same argument name is declared twice.
    #[error("argument {0} is declared more than once")]
    Duplicate(String),
}

/// A value that failed its argument's validator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Argument {argument} fails the validation checks : Expected {expected}, got {actual}")]
pub struct ValidationError {
    /// Argument name.
    pub argument: String,
    /// Kind the schema asked for.
    pub expected: &'static str,
    /// What was supplied.
    pub actual: String,
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    name: String,
    kind: ArgKind,
    optional: bool,
    type_token: String,
}

impl ArgSpec {
    /// A required argument of `kind`.
    pub fn required(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            type_token: kind.token().to_owned(),
        }
    }

    /// An optional argument of `kind`.
    pub fn optional(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    /// Parse `name:type` or `name?:type`.
    ///
    /// An unknown type is accepted for optional arguments, whose values then
    /// pass through unvalidated.
    pub fn parse(declaration: &str) -> Result<Self, SchemaError> {
        let malformed = || SchemaError::Malformed(declaration.to_owned());
        let (name, token) = declaration.split_once(':').ok_or_else(malformed)?;
        let (name, optional) = match name.strip_suffix('?') {
            Some(name) => (name, true),
            None => (name, false),
        };
        let name = name.trim();
        let token = token.trim();
        if name.is_empty() || token.is_empty() || name.contains('?') || token.contains(':') {
            return Err(malformed());
        }
        let kind = match ArgKind::from_token(token) {
            Some(kind) => kind,
            None if optional => ArgKind::Any,
            None => {
                return Err(SchemaError::UnknownType {
                    argument: name.to_owned(),
                    token: token.to_owned(),
                })
            }
        };
        Ok(Self {
            name: name.to_owned(),
            kind,
            optional,
            type_token: token.to_owned(),
        })
    }

    /// Argument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validator kind.
    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    /// Whether the argument may be omitted.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Type token as declared.
    pub fn type_token(&self) -> &str {
        &self.type_token
    }

    /// Validate one raw value. Optional arguments that are missing or null
    /// yield `None`.
    pub fn validate(&self, raw: Option<&Value>) -> Result<Option<TypedValue>, ValidationError> {
        if self.optional && matches!(raw, None | Some(Value::Null)) {
            return Ok(None);
        }
        self.kind
            .validate(raw)
            .map(Some)
            .map_err(|actual| ValidationError {
                argument: self.name.clone(),
                expected: self.kind.expected(),
                actual,
            })
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.optional { "?" } else { "" };
        write!(f, "{}{}:{}", self.name, marker, self.type_token)
    }
}

/// Validated argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// String argument.
    String(String),
    /// Numeric argument.
    Integer(Number),
    /// Boolean argument.
    Boolean(bool),
    /// Object or array argument.
    Structured(Value),
    /// Unvalidated argument.
    Any(Value),
}

impl TypedValue {
    /// JSON form of the value.
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Integer(n) => Value::Number(n.clone()),
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::Structured(value) | TypedValue::Any(value) => value.clone(),
        }
    }
}

/// Validated arguments of one call, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: IndexMap<String, TypedValue>,
}

impl Args {
    /// Validate `payload` against `specs`.
    ///
    /// Values are read from `payload.args` when present, otherwise from the
    /// payload object itself. Validation stops at the first failure.
    pub fn validate(specs: &[ArgSpec], payload: &Value) -> Result<Self, ValidationError> {
        let empty = Map::new();
        let source = match payload.get("args") {
            Some(Value::Object(args)) => args,
            Some(_) => &empty,
            None => payload.as_object().unwrap_or(&empty),
        };
        let mut values = IndexMap::with_capacity(specs.len());
        for spec in specs {
            if let Some(value) = spec.validate(source.get(spec.name()))? {
                values.insert(spec.name().to_owned(), value);
            }
        }
        Ok(Self { values })
    }

    /// Build arguments directly, bypassing validation.
    pub fn from_values(values: impl IntoIterator<Item = (String, TypedValue)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Raw typed value.
    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    /// Whether the argument is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// String argument.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            TypedValue::String(s) => Some(s),
            TypedValue::Any(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Numeric argument as `i64`, when it fits.
    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            TypedValue::Integer(n) => n.as_i64(),
            TypedValue::Any(Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    /// Numeric argument as `f64`.
    pub fn f64(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            TypedValue::Integer(n) => n.as_f64(),
            TypedValue::Any(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// Boolean argument.
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            TypedValue::Boolean(b) => Some(*b),
            TypedValue::Any(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// JSON form of an argument.
    pub fn json(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(TypedValue::to_json)
    }

    /// Deserialize an argument into `T`.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .json(name)
            .ok_or_else(|| anyhow::anyhow!("argument {name} is missing"))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Number of present arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no argument is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Present arguments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Arguments as a JSON object, for logging.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokens_map_to_kinds() {
        for (token, kind) in [
            ("string", ArgKind::String),
            ("istring", ArgKind::String),
            ("integer", ArgKind::Integer),
            ("number", ArgKind::Integer),
            ("boolean", ArgKind::Boolean),
            ("object", ArgKind::Structured),
            ("ComponentMap", ArgKind::Structured),
            ("JSONPatch", ArgKind::Structured),
            ("any", ArgKind::Any),
        ] {
            assert_eq!(ArgKind::from_token(token), Some(kind), "{token}");
        }
        assert_eq!(ArgKind::from_token("Album"), None);
    }

    #[test]
    fn parses_declarations() {
        let spec = ArgSpec::parse("album:object").expect("parse");
        assert_eq!(spec.name(), "album");
        assert_eq!(spec.kind(), ArgKind::Structured);
        assert!(!spec.is_optional());

        let spec = ArgSpec::parse("limit?:integer").expect("parse");
        assert!(spec.is_optional());
        assert_eq!(spec.to_string(), "limit?:integer");

        let spec = ArgSpec::parse("extra?:AlbumEntry").expect("unknown optional");
        assert_eq!(spec.kind(), ArgKind::Any);
        assert_eq!(spec.type_token(), "AlbumEntry");

        assert_eq!(
            ArgSpec::parse("entry:AlbumEntry"),
            Err(SchemaError::UnknownType {
                argument: "entry".into(),
                token: "AlbumEntry".into()
            })
        );
        for bad in ["nocolon", ":string", "name:", "a:b:c", "a?b:string"] {
            assert!(
                matches!(ArgSpec::parse(bad), Err(SchemaError::Malformed(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn validation_errors_name_argument_and_types() {
        let spec = ArgSpec::required("text", ArgKind::String);
        let err = spec.validate(Some(&json!(42))).expect_err("wrong kind");
        assert_eq!(
            err.to_string(),
            "Argument text fails the validation checks : Expected string, got number"
        );
        let err = spec.validate(None).expect_err("missing");
        assert_eq!(err.actual, "undefined");
    }

    #[test]
    fn structured_accepts_json_strings() {
        let spec = ArgSpec::required("patch", ArgKind::Structured);
        assert_eq!(
            spec.validate(Some(&json!(""))),
            Ok(Some(TypedValue::Structured(json!({}))))
        );
        assert_eq!(
            spec.validate(Some(&json!("[1,2]"))),
            Ok(Some(TypedValue::Structured(json!([1, 2]))))
        );
        assert_eq!(
            spec.validate(Some(&json!(null))),
            Ok(Some(TypedValue::Structured(Value::Null)))
        );
        let err = spec.validate(Some(&json!("{oops"))).expect_err("bad json");
        assert!(err.actual.starts_with("invalid JSON"));
        assert!(spec.validate(Some(&json!(true))).is_err());
    }

    #[test]
    fn integer_accepts_any_number() {
        let spec = ArgSpec::required("rotation", ArgKind::Integer);
        assert!(spec.validate(Some(&json!(90))).is_ok());
        assert!(spec.validate(Some(&json!(1.5))).is_ok());
        assert!(spec.validate(Some(&json!("90"))).is_err());
    }

    #[test]
    fn optional_arguments_skip_missing_and_null() {
        let spec = ArgSpec::optional("limit", ArgKind::Integer);
        assert_eq!(spec.validate(None), Ok(None));
        assert_eq!(spec.validate(Some(&Value::Null)), Ok(None));
        assert!(spec.validate(Some(&json!("ten"))).is_err());
    }

    #[test]
    fn args_are_read_from_args_object_or_payload() {
        let specs = vec![
            ArgSpec::required("key", ArgKind::String),
            ArgSpec::optional("star", ArgKind::Boolean),
        ];
        let wrapped = Args::validate(&specs, &json!({"args": {"key": "a", "star": true}}))
            .expect("wrapped");
        assert_eq!(wrapped.str("key"), Some("a"));
        assert_eq!(wrapped.bool("star"), Some(true));

        let flat = Args::validate(&specs, &json!({"key": "b"})).expect("flat");
        assert_eq!(flat.str("key"), Some("b"));
        assert!(!flat.contains("star"));
        assert_eq!(flat.len(), 1);

        assert!(Args::validate(&specs, &json!(null)).is_err());
        assert!(Args::validate(&[], &json!(null)).expect("no args").is_empty());
    }

    #[test]
    fn args_deserialize_structured_values() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Album {
            key: String,
            name: String,
        }
        let specs = vec![ArgSpec::required("album", ArgKind::Structured)];
        let args = Args::validate(
            &specs,
            &json!({"args": {"album": "{\"key\":\"k\",\"name\":\"Summer\"}"}}),
        )
        .expect("valid");
        let album: Album = args.parse("album").expect("deserialize");
        assert_eq!(
            album,
            Album {
                key: "k".into(),
                name: "Summer".into()
            }
        );
        assert!(args.parse::<Album>("missing").is_err());
        assert_eq!(args.to_json()["album"]["name"], json!("Summer"));
    }
}
