//! Tag → theme table.
//!
//! Loaded from a JSON object file:
//!
//! ```json
//! { "123456789012": "cosmic", "987654321098": "nature" }
//! ```
//!
//! A missing file gives an empty table; every tag then resolves to the
//! configured default theme.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use log::{info, warn};

use crate::app::pipeline::{TagCode, Theme};
use crate::app::ports::ThemeResolver;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThemeTable {
    mappings: HashMap<String, Theme>,
}

impl ThemeTable {
    pub fn new(mappings: HashMap<String, Theme>) -> Self {
        Self { mappings }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("themes: {} not found, every tag uses the default", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        let raw: HashMap<String, Theme> = serde_json::from_str(&text)
            .with_context(|| format!("parsing theme table {}", path.display()))?;
        let mappings: HashMap<String, Theme> = raw
            .into_iter()
            .map(|(tag, theme)| (tag.trim().to_owned(), theme))
            .collect();
        info!("themes: {} mapping(s) from {}", mappings.len(), path.display());
        Ok(Self { mappings })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl ThemeResolver for ThemeTable {
    fn resolve(&self, tag: &TagCode) -> Option<Theme> {
        self.mappings.get(tag.as_str()).cloned()
    }
}
