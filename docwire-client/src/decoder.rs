//! Decoders turning server documents into cursor items.

use crate::error::CursorError;
use docwire_protocol::Document;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Decodes one result document.
pub trait DocumentDecoder {
    type Output;

    fn decode(&self, document: Document) -> Result<Self::Output, CursorError>;
}

/// Yields documents unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDocumentDecoder;

impl DocumentDecoder for RawDocumentDecoder {
    type Output = Document;

    fn decode(&self, document: Document) -> Result<Document, CursorError> {
        Ok(document)
    }
}

/// Deserializes documents into `T` with serde.
pub struct SerdeDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SerdeDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerdeDecoder")
    }
}

impl<T: DeserializeOwned> DocumentDecoder for SerdeDecoder<T> {
    type Output = T;

    fn decode(&self, document: Document) -> Result<T, CursorError> {
        serde_json::from_value(Value::Object(document)).map_err(|e| CursorError::Decode(e.to_string()))
    }
}
