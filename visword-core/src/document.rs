//! Documents as seen by the vocabulary pipeline
//!
//! A document is an ordered list of `(field name, value)` pairs. Local
//! features are stored as repeated `Bytes` values of one field; encoded
//! descriptors are written back as text and byte fields.

use serde::{Deserialize, Serialize};

/// Value that can be stored in a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "bytes")]
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Raw byte view of the value; text is returned as its UTF-8 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Text(s) => s.as_bytes().to_vec(),
            FieldValue::Bytes(b) => b.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Bytes(b) => b.is_empty(),
        }
    }
}

/// A stored document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    field_values: Vec<(String, FieldValue)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.field_values
            .push((field.into(), FieldValue::Text(value.into())));
    }

    pub fn add_bytes(&mut self, field: impl Into<String>, value: Vec<u8>) {
        self.field_values
            .push((field.into(), FieldValue::Bytes(value)));
    }

    pub fn get_first(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    pub fn get_all<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.field_values
            .iter()
            .filter(move |(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// True when the field is absent or every value of it is empty
    pub fn is_field_empty(&self, field: &str) -> bool {
        self.get_all(field).all(FieldValue::is_empty)
    }

    /// Remove every value of `field`, returning how many were removed
    pub fn remove_field(&mut self, field: &str) -> usize {
        let before = self.field_values.len();
        self.field_values.retain(|(f, _)| f != field);
        before - self.field_values.len()
    }

    /// Replace all values of `field` with a single value
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        let field = field.into();
        self.remove_field(&field);
        self.field_values.push((field, value));
    }

    pub fn field_values(&self) -> &[(String, FieldValue)] {
        &self.field_values
    }

    pub fn len(&self) -> usize {
        self.field_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_values.is_empty()
    }
}
