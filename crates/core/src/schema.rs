//! JSON Schema builder for tool parameters.
//!
//! ```
//! use roundclaw_core::schema::SchemaBuilder;
//!
//! let schema = SchemaBuilder::object()
//!     .required("expr", "string", "Arithmetic expression to evaluate")
//!     .optional("precision", "integer", "Digits after the decimal point")
//!     .build();
//! assert_eq!(schema["required"][0], "expr");
//! ```

use serde_json::{Map, Value, json};

/// Builds an `object` schema field by field, remembering which fields are
/// required.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, ty: &str, description: &str) -> Self {
        self.field(name, ty, description, true)
    }

    pub fn optional(self, name: &str, ty: &str, description: &str) -> Self {
        self.field(name, ty, description, false)
    }

    /// Add a field with an arbitrary sub-schema (arrays, enums, nested objects).
    pub fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required && !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    fn field(self, name: &str, ty: &str, description: &str, required: bool) -> Self {
        let mut schema = json!({ "type": ty });
        if !description.is_empty() {
            schema["description"] = Value::String(description.to_string());
        }
        self.property(name, schema, required)
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_and_optional_are_tracked() {
        let schema = SchemaBuilder::object()
            .required("path", "string", "File path")
            .optional("limit", "integer", "")
            .build();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["properties"]["path"]["description"], "File path");
        assert!(schema["properties"]["limit"].get("description").is_none());
    }

    #[test]
    fn empty_object_has_empty_required() {
        let schema = SchemaBuilder::object().build();
        assert_eq!(schema["required"], json!([]));
        assert_eq!(schema["properties"], json!({}));
    }

    #[test]
    fn duplicate_required_field_listed_once() {
        let schema = SchemaBuilder::object()
            .required("a", "string", "")
            .property("a", json!({"type": "number"}), true)
            .build();
        assert_eq!(schema["required"], json!(["a"]));
        assert_eq!(schema["properties"]["a"]["type"], "number");
    }
}
