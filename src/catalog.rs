use std::collections::HashSet;

use serde::Serialize;

use crate::domain::Identifier;
use crate::error::VetError;

/// Ordered identifiers returned by one archive upload, plus the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentifierCatalog {
    ids: Vec<Identifier>,
    selected: Option<Identifier>,
}

impl IdentifierCatalog {
    /// Keeps the first occurrence of each identifier.
    pub fn new(ids: impl IntoIterator<Item = Identifier>) -> Self {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self {
            ids,
            selected: None,
        }
    }

    pub fn ids(&self) -> &[Identifier] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.ids.contains(id)
    }

    pub fn selected(&self) -> Option<&Identifier> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, id: &Identifier) -> Result<(), VetError> {
        if !self.contains(id) {
            return Err(VetError::UnknownIdentifier(id.to_string()));
        }
        self.selected = Some(id.clone());
        Ok(())
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.selected = None;
    }
}
