// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::fmt;

use super::{Document, DocumentError, OBJECT_ID, OBJECT_TYPE};

/// Composite `{objectType}_{objectId}` key of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(String);

impl StoreKey {
    pub const SEPARATOR: char = '_';

    #[must_use]
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self(format!("{}{}{}", object_type, Self::SEPARATOR, object_id))
    }

    /// Key of a document from its own identity fields.
    pub fn for_document(doc: &Document) -> Result<Self, DocumentError> {
        let object_type = doc
            .object_type()
            .ok_or(DocumentError::MissingIdentity(OBJECT_TYPE))?;
        let object_id = doc
            .object_id()
            .ok_or(DocumentError::MissingIdentity(OBJECT_ID))?;
        Ok(Self::new(object_type, object_id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
