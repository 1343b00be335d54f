//! The freeform per-language configuration value type attached to a
//! [`crate::target::Target`].

use std::collections::BTreeMap;

/// A tagged-union configuration value: string, number, bool, identifier,
/// array, or map, recursively nested. Mirrors the discriminated union the
/// (out-of-scope) DSL parser surfaces, so a validated target list can carry
/// arbitrary per-language settings without this crate knowing their shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// A quoted string literal.
    String(String),
    /// A numeric literal, stored as `f64` to cover both integer and
    /// floating-point DSL literals uniformly.
    Number(f64),
    /// A boolean literal.
    Bool(bool),
    /// A bare identifier (unquoted name), distinct from `String` because the
    /// DSL's grammar distinguishes them even though both print the same.
    Identifier(String),
    /// An ordered array of values.
    Array(Vec<ConfigValue>),
    /// A map of string keys to values. `BTreeMap` keeps iteration order
    /// deterministic, which matters once a map value feeds into a digest.
    Map(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    /// Borrow the value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) | ConfigValue::Identifier(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as a number, if it is one.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the value as an array, if it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the value as a map, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Feed this value's bytes into `out`, depth-first, for digest
    /// composition — a tag byte identifying the variant followed by its
    /// content, so differently-typed values with coincidentally equal bytes
    /// (e.g. the string `"1"` vs the number `1`) never collide.
    pub fn hash_into(&self, out: &mut Vec<u8>) {
        match self {
            ConfigValue::String(s) => {
                out.push(0);
                out.extend_from_slice(s.as_bytes());
            }
            ConfigValue::Number(n) => {
                out.push(1);
                out.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            ConfigValue::Bool(b) => {
                out.push(2);
                out.push(u8::from(*b));
            }
            ConfigValue::Identifier(s) => {
                out.push(3);
                out.extend_from_slice(s.as_bytes());
            }
            ConfigValue::Array(items) => {
                out.push(4);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.hash_into(out);
                }
            }
            ConfigValue::Map(entries) => {
                out.push(5);
                out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                for (key, value) in entries {
                    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    out.extend_from_slice(key.as_bytes());
                    value.hash_into(out);
                }
            }
        }
    }
}
