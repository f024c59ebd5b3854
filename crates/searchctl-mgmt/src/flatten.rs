//! Streaming flattener for nested statistics payloads: one tab-separated
//! line per leaf, addressed by a separator-delimited path, stamped at the
//! moment of emission. The separator is the only structural delimiter in the
//! output, so a key containing it poisons the whole stream.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlattenError {
    #[error("key {key:?} contains the path separator {separator:?}; pick another separator")]
    SeparatorCollision { key: String, separator: char },
}

/// One flattened leaf: path, scalar value, unix timestamp of emission.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatLine {
    pub path: String,
    pub value: Value,
    pub timestamp: u64,
}

impl FlatLine {
    pub fn render(&self) -> String {
        format!("{}\t{}\t{}", self.path, self.value, self.timestamp)
    }
}

pub fn flatten(value: &Value) -> FlattenStream<'_> {
    flatten_with(value, DEFAULT_SEPARATOR)
}

pub fn flatten_with(value: &Value, separator: char) -> FlattenStream<'_> {
    FlattenStream {
        separator,
        stack: vec![(String::new(), value)],
        failed: false,
    }
}

/// Lazy single-pass walk over one payload. Yields leaves in document order;
/// after the first error the stream is spent. Restart by flattening the
/// input again.
pub struct FlattenStream<'a> {
    separator: char,
    // (path prefix, pending subtree); an empty prefix marks the root.
    stack: Vec<(String, &'a Value)>,
    failed: bool,
}

impl<'a> FlattenStream<'a> {
    fn leaf_path(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.separator.to_string()
        } else {
            prefix.to_string()
        }
    }

    fn child_prefix(&self, prefix: &str, key: &str) -> String {
        format!("{}{}{}", prefix, self.separator, key)
    }
}

impl<'a> Iterator for FlattenStream<'a> {
    type Item = Result<FlatLine, FlattenError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let (prefix, value) = self.stack.pop()?;

            match value {
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                    return Some(Ok(FlatLine {
                        path: self.leaf_path(&prefix),
                        value: value.clone(),
                        timestamp: unix_now(),
                    }));
                }
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate().rev() {
                        self.stack
                            .push((self.child_prefix(&prefix, &index.to_string()), item));
                    }
                }
                Value::Object(entries) => {
                    for (key, _) in entries.iter() {
                        if key.contains(self.separator) {
                            self.failed = true;
                            return Some(Err(FlattenError::SeparatorCollision {
                                key: key.clone(),
                                separator: self.separator,
                            }));
                        }
                    }
                    for (key, item) in entries.iter().rev() {
                        self.stack.push((self.child_prefix(&prefix, key), item));
                    }
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
