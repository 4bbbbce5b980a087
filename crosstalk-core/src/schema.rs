//! Argument schemas for tools
//!
//! A [`Schema`] is a JSON Schema document kept exactly as written. The
//! builder methods cover the common shapes; anything richer (`oneOf`,
//! numeric bounds, `additionalProperties`, `$ref`) comes in through
//! [`Schema::from_json_schema`] or [`Schema::for_type`] and is validated in
//! full by the `jsonschema` crate.

use std::fmt;

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::error::{Error, Result};

/// One place where a value broke its schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationIssue {
    /// JSON Pointer to the offending value, `/` for the root
    pub path: String,
    pub message: String,
}

/// A value did not match a [`Schema`]; lists every violation found
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Describes the arguments a tool accepts
///
/// # Examples
///
/// ```
/// use crosstalk_core::Schema;
/// use serde_json::json;
///
/// let schema = Schema::object()
///     .required_property("a", Schema::number())
///     .required_property("b", Schema::number())
///     .property("op", Schema::string_enum(["add", "sub"]));
///
/// assert!(schema.validate(&json!({"a": 1, "b": 2.5})).is_ok());
/// assert!(schema.validate(&json!({"a": 1})).is_err());
/// assert!(schema.validate(&json!({"a": 1, "b": 2, "op": "mul"})).is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Schema(Value);

impl Schema {
    /// Accepts any JSON value
    pub fn any() -> Self {
        Self(json!({}))
    }

    pub fn boolean() -> Self {
        Self(json!({"type": "boolean"}))
    }

    pub fn integer() -> Self {
        Self(json!({"type": "integer"}))
    }

    pub fn number() -> Self {
        Self(json!({"type": "number"}))
    }

    pub fn string() -> Self {
        Self(json!({"type": "string"}))
    }

    pub fn string_enum<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        Self(json!({"type": "string", "enum": values}))
    }

    pub fn array(items: Schema) -> Self {
        Self(json!({"type": "array", "items": items.0}))
    }

    /// An object with no properties yet; add them with [`Schema::property`]
    pub fn object() -> Self {
        Self(json!({"type": "object", "properties": {}}))
    }

    fn is_object_schema(&self) -> bool {
        self.0.get("type").and_then(Value::as_str) == Some("object")
    }

    /// Adds an optional property. No-op unless this is an object schema.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        if !self.is_object_schema() {
            return self;
        }
        if let Some(obj) = self.0.as_object_mut() {
            let properties = obj
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(properties) = properties.as_object_mut() {
                properties.insert(name.into(), schema.0);
            }
        }
        self
    }

    /// Adds a property that must be present. No-op unless this is an object schema.
    #[must_use]
    pub fn required_property(self, name: impl Into<String>, schema: Schema) -> Self {
        if !self.is_object_schema() {
            return self;
        }
        let name = name.into();
        let mut out = self.property(name.clone(), schema);
        if let Some(obj) = out.0.as_object_mut() {
            let required = obj
                .entry("required")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(required) = required.as_array_mut() {
                if !required.iter().any(|n| n.as_str() == Some(name.as_str())) {
                    required.push(Value::String(name));
                }
            }
        }
        out
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(obj) = self.0.as_object_mut() {
            obj.insert("description".into(), Value::String(description.into()));
        }
        self
    }

    /// Also accepts `null`
    #[must_use]
    pub fn nullable(mut self) -> Self {
        let Some(obj) = self.0.as_object_mut() else {
            return self;
        };
        let widened = match obj.get("type") {
            Some(Value::String(t)) if t != "null" => Some(json!([t, "null"])),
            Some(Value::Array(types)) if !types.iter().any(|t| t == "null") => {
                let mut types = types.clone();
                types.push(json!("null"));
                Some(Value::Array(types))
            }
            _ => None,
        };
        if let Some(types) = widened {
            obj.insert("type".into(), types);
        }
        if let Some(Value::Array(values)) = obj.get_mut("enum") {
            if !values.contains(&Value::Null) {
                values.push(Value::Null);
            }
        }
        self
    }

    /// Checks `value` against this schema, collecting every violation
    pub fn validate(&self, value: &Value) -> std::result::Result<(), ValidationError> {
        let validator = jsonschema::validator_for(&self.0).map_err(|e| ValidationError {
            issues: vec![ValidationIssue {
                path: "/".into(),
                message: format!("invalid schema: {e}"),
            }],
        })?;
        let issues: Vec<ValidationIssue> = validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                ValidationIssue {
                    path: if path.is_empty() { "/".into() } else { path },
                    message: e.to_string(),
                }
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// The JSON Schema document as written
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Renders the schema in one deterministic form
    ///
    /// Object keys are sorted at every level and `required` lists are
    /// sorted; nothing else is touched. Two schemas describe the same
    /// arguments exactly when their canonical forms are equal, which is
    /// what snapshot restoration compares.
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::Schema;
    /// use serde_json::json;
    ///
    /// let schema = Schema::object()
    ///     .required_property("b", Schema::integer())
    ///     .required_property("a", Schema::string().nullable());
    /// assert_eq!(schema.canonical(), json!({
    ///     "type": "object",
    ///     "properties": {
    ///         "a": {"type": ["string", "null"]},
    ///         "b": {"type": "integer"}
    ///     },
    ///     "required": ["a", "b"]
    /// }));
    /// ```
    pub fn canonical(&self) -> Value {
        canonicalize(&self.0)
    }

    /// Wraps a JSON Schema document, such as `schemars` produces
    ///
    /// Fails when the document is not itself a valid JSON Schema.
    pub fn from_json_schema(value: Value) -> Result<Schema> {
        jsonschema::validator_for(&value).map_err(|e| Error::InvalidSchema(e.to_string()))?;
        Ok(Schema(value))
    }

    /// Derives the schema for a Rust type through `schemars`
    #[cfg(feature = "schema")]
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Schema> {
        let mut root = serde_json::to_value(schemars::schema_for!(T))?;
        if let Some(obj) = root.as_object_mut() {
            obj.remove("$schema");
        }
        Schema::from_json_schema(root)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Sorts object keys recursively and `required` name lists
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                let child = &obj[key.as_str()];
                let canonical = match child {
                    Value::Array(names) if key == "required" && names.iter().all(Value::is_string) => {
                        let mut names = names.clone();
                        names.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                        names.dedup();
                        Value::Array(names)
                    }
                    other => canonicalize(other),
                };
                out.insert(key.clone(), canonical);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> Schema {
        Schema::object()
            .required_property("a", Schema::number().describe("left operand"))
            .required_property("b", Schema::number())
    }

    #[test]
    fn test_validate_reports_every_path() {
        let schema = Schema::object()
            .required_property(
                "points",
                Schema::array(Schema::object().required_property("x", Schema::integer())),
            )
            .required_property("label", Schema::string());
        let err = schema
            .validate(&json!({"points": [{"x": 1}, {"x": "two"}]}))
            .unwrap_err();
        assert_eq!(err.issues.len(), 2);
        let paths: Vec<_> = err.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"/points/1/x"));
        assert!(paths.contains(&"/"));
        assert!(err.to_string().contains("label"));
        assert!(err.to_string().contains("; "));
    }

    #[test]
    fn test_validate_integers() {
        let schema = Schema::integer();
        assert!(schema.validate(&json!(3)).is_ok());
        assert!(schema.validate(&json!(u64::MAX)).is_ok());
        assert!(schema.validate(&json!(3.5)).is_err());
    }

    #[test]
    fn test_validate_nullable_and_extra_keys() {
        let schema = Schema::object().required_property("units", Schema::string().nullable());
        assert!(schema.validate(&json!({"units": null, "extra": true})).is_ok());
        assert!(schema.validate(&json!({"units": 4})).is_err());
        assert!(Schema::string().validate(&Value::Null).is_err());

        let units = Schema::string_enum(["c", "f"]).nullable();
        assert!(units.validate(&Value::Null).is_ok());
        assert!(units.validate(&json!("c")).is_ok());
        assert!(units.validate(&json!("k")).is_err());
    }

    #[test]
    fn test_validate_rejects_non_object_arguments() {
        let err = calculator().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, "/");
    }

    #[test]
    fn test_validate_keeps_constraints_from_raw_schemas() {
        let schema = Schema::from_json_schema(json!({
            "type": "object",
            "properties": {
                "days": {"type": "integer", "minimum": 0, "maximum": 14},
                "counts": {"type": "object", "additionalProperties": {"type": "integer"}},
                "op": {"oneOf": [
                    {"type": "object", "required": ["add"], "properties": {"add": {"type": "number"}}},
                    {"type": "object", "required": ["neg"], "properties": {"neg": {"type": "number"}}}
                ]}
            },
            "additionalProperties": false
        }))
        .unwrap();

        assert!(schema.validate(&json!({"days": 3, "counts": {"a": 1}, "op": {"add": 2}})).is_ok());
        assert!(schema.validate(&json!({"days": -3})).is_err());
        assert!(schema.validate(&json!({"days": 30})).is_err());
        assert!(schema.validate(&json!({"counts": {"a": "one"}})).is_err());
        assert!(schema.validate(&json!({"op": "add"})).is_err());
        assert!(schema.validate(&json!({"unexpected": true})).is_err());
    }

    #[test]
    fn test_from_json_schema_rejects_invalid_documents() {
        let err = Schema::from_json_schema(json!({"type": 12})).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn test_from_json_schema_resolves_refs() {
        let schema = Schema::from_json_schema(json!({
            "type": "object",
            "required": ["loc"],
            "properties": {"loc": {"$ref": "#/definitions/Location"}},
            "definitions": {
                "Location": {
                    "type": "object",
                    "required": ["lat"],
                    "properties": {"lat": {"type": "number"}}
                }
            }
        }))
        .unwrap();
        assert!(schema.validate(&json!({"loc": {"lat": 1.5}})).is_ok());
        let err = schema.validate(&json!({"loc": {}})).unwrap_err();
        assert_eq!(err.issues[0].path, "/loc");
    }

    #[test]
    fn test_canonical_ignores_key_and_required_order() {
        let a: Value = serde_json::from_str(
            r#"{"type": "object", "required": ["x", "y"], "properties": {"y": {"type": "number"}, "x": {"type": "number"}}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"properties": {"x": {"type": "number"}, "y": {"type": "number"}}, "required": ["y", "x"], "type": "object"}"#,
        )
        .unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
        // Enum order is part of the document
        assert_ne!(
            Schema::string_enum(["a", "b"]).canonical(),
            Schema::string_enum(["b", "a"]).canonical()
        );
    }

    #[test]
    fn test_canonical_keeps_every_keyword() {
        let base = json!({
            "type": "object",
            "properties": {
                "counts": {"type": "object", "additionalProperties": {"type": "integer"}},
                "op": {"oneOf": [{"type": "string"}, {"type": "boolean"}]}
            }
        });
        let mut other = base.clone();
        other["properties"]["counts"]["additionalProperties"] = json!({"type": "string"});
        assert_ne!(canonicalize(&base), canonicalize(&other));

        let mut other = base.clone();
        other["properties"]["op"]["oneOf"][1] = json!({"type": "number"});
        assert_ne!(canonicalize(&base), canonicalize(&other));

        assert_eq!(canonicalize(&base), canonicalize(&base.clone()));
    }

    #[test]
    fn test_builders_ignore_properties_on_non_objects() {
        let schema = Schema::string().property("x", Schema::integer());
        assert_eq!(schema.as_value(), &json!({"type": "string"}));
        let schema = Schema::object()
            .required_property("q", Schema::string())
            .required_property("q", Schema::string());
        assert_eq!(schema.as_value()["required"], json!(["q"]));
    }

    #[cfg(feature = "schema")]
    #[test]
    fn test_for_type() {
        #[derive(schemars::JsonSchema, serde::Deserialize)]
        #[allow(dead_code)]
        struct WeatherRequest {
            /// City to look up
            location: String,
            units: Option<String>,
            days: u8,
        }

        let schema = Schema::for_type::<WeatherRequest>().unwrap();
        assert!(schema.as_value().get("$schema").is_none());
        assert!(schema.validate(&json!({"location": "Paris", "days": 3})).is_ok());
        assert!(schema.validate(&json!({"location": "Paris", "units": null, "days": 3})).is_ok());
        assert!(schema.validate(&json!({"units": "c", "days": 3})).is_err());
        // u8 carries `minimum: 0`
        assert!(schema.validate(&json!({"location": "Paris", "days": -3})).is_err());

        let properties = &schema.as_value()["properties"];
        assert_eq!(properties["location"]["description"], "City to look up");
        assert_eq!(properties["units"]["type"], json!(["string", "null"]));
        let required = schema.as_value()["required"].as_array().unwrap();
        assert!(!required.contains(&json!("units")));
    }
}
