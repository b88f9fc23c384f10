//! Duplicate title detection

use std::collections::HashMap;

use super::AdapterError;

/// Full test title to the file that first declared it
#[derive(Debug, Default)]
pub struct TitleRegistry {
    titles: HashMap<String, String>,
}

impl TitleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, full_title: &str, file: &str) -> Result<(), AdapterError> {
        if let Some(existing) = self.titles.get(full_title) {
            return Err(AdapterError::DuplicateTitle {
                title: full_title.to_string(),
                file: existing.clone(),
                other: file.to_string(),
            });
        }
        self.titles.insert(full_title.to_string(), file.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}
