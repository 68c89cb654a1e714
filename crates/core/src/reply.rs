//! Decoding of loosely-typed engine replies.
//!
//! Every evaluation call returns a [`ReplyValue`]. Array replies are walked
//! with a [`ReplyReader`], a forward-only cursor that coerces each element
//! to the type the caller asks for.

use serde::Serialize;

// ---------------------------------------------------------------------------
// ReplyValue
// ---------------------------------------------------------------------------

/// One element of an engine reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReplyValue {
    Nil,
    Integer(i64),
    Text(String),
    Array(Vec<ReplyValue>),
}

impl ReplyValue {
    /// Short type label used in decode errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// The text content, or `""` for any other variant.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(s) => s,
            _ => "",
        }
    }

    /// Owned copy of [`as_str`](Self::as_str).
    pub fn as_string(&self) -> String {
        self.as_str().to_string()
    }

    /// Integer value, also accepting text that parses as a base-10 integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ReplyValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Render as JSON for logs and diagnostics. Nil becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

impl From<i64> for ReplyValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<&str> for ReplyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ReplyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<ReplyValue>> for ReplyValue {
    fn from(items: Vec<ReplyValue>) -> Self {
        Self::Array(items)
    }
}

// ---------------------------------------------------------------------------
// ReplyError
// ---------------------------------------------------------------------------

/// Coercion failures raised by [`ReplyReader`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("reply element {index} type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("reply element {index} out of range for {target}: {value}")]
    OutOfRange {
        index: usize,
        target: &'static str,
        value: i64,
    },
}

// ---------------------------------------------------------------------------
// ReplyReader
// ---------------------------------------------------------------------------

/// Forward-only, type-coercing cursor over an array reply.
///
/// The length is fixed at construction and the cursor never moves past it.
/// Reading from an exhausted cursor is not an error: strings come back empty
/// and integers fall back to the caller's default.
#[derive(Debug, Clone)]
pub struct ReplyReader<'a> {
    items: &'a [ReplyValue],
    pos: usize,
}

impl<'a> ReplyReader<'a> {
    pub fn new(items: &'a [ReplyValue]) -> Self {
        Self { items, pos: 0 }
    }

    /// Cursor over `value` when it is an array reply.
    pub fn from_value(value: &'a ReplyValue) -> Option<Self> {
        value.as_array().map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the next element to be read.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.items.len()
    }

    fn peek(&self) -> Option<&'a ReplyValue> {
        self.items.get(self.pos)
    }

    fn advance(&mut self) {
        if self.has_next() {
            self.pos += 1;
        }
    }

    /// Read the current element as text.
    ///
    /// Non-text elements are consumed and yield `""`.
    pub fn read_string(&mut self) -> String {
        let value = self.peek().map(ReplyValue::as_string).unwrap_or_default();
        self.advance();
        value
    }

    /// Read the current element as an `i64`, or `default` when exhausted.
    ///
    /// On a failed coercion the cursor stays put so the element can still be
    /// read another way or skipped.
    pub fn read_i64(&mut self, default: i64) -> Result<i64, ReplyError> {
        let Some(value) = self.peek() else {
            return Ok(default);
        };
        let n = value.as_i64().ok_or(ReplyError::TypeMismatch {
            index: self.pos,
            expected: "integer",
            found: value.type_name(),
        })?;
        self.advance();
        Ok(n)
    }

    /// Read the current element as an `i32`, or `default` when exhausted.
    pub fn read_i32(&mut self, default: i32) -> Result<i32, ReplyError> {
        let Some(value) = self.peek() else {
            return Ok(default);
        };
        let n = value.as_i64().ok_or(ReplyError::TypeMismatch {
            index: self.pos,
            expected: "integer",
            found: value.type_name(),
        })?;
        let n = i32::try_from(n).map_err(|_| ReplyError::OutOfRange {
            index: self.pos,
            target: "i32",
            value: n,
        })?;
        self.advance();
        Ok(n)
    }

    /// Descend into a nested array element.
    ///
    /// Returns `None` (without advancing) when the current element is not an
    /// array or the cursor is exhausted.
    pub fn read_array(&mut self) -> Option<ReplyReader<'a>> {
        let nested = self.peek()?.as_array()?;
        self.advance();
        Some(ReplyReader::new(nested))
    }

    pub fn skip_value(&mut self) {
        self.advance();
    }

    /// Visit every element from index 0, regardless of the cursor position.
    ///
    /// Stops at the first error returned by `visitor` and returns it.
    pub fn for_each<E, F>(&self, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(usize, &'a ReplyValue) -> Result<(), E>,
    {
        for (index, value) in self.items.iter().enumerate() {
            visitor(index, value)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
