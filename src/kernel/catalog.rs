use std::collections::HashMap;
use super::matcher::{PatternTemplate, TemplateError};
use super::record::TemplateId;

/// Immutable snapshot of the pattern catalog. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub version: u64,
    /// Set when the latest refresh failed and this is the last good copy.
    pub stale: bool,
    templates: Vec<PatternTemplate>,
    index: HashMap<TemplateId, usize>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from raw templates, dropping (and reporting) any
    /// that fail validation. A later duplicate id replaces an earlier one.
    pub fn build(version: u64, raw: Vec<PatternTemplate>) -> (Self, Vec<TemplateError>) {
        let mut templates: Vec<PatternTemplate> = Vec::with_capacity(raw.len());
        let mut index = HashMap::new();
        let mut rejected = Vec::new();

        for template in raw {
            if let Err(e) = template.validate() {
                rejected.push(e);
                continue;
            }
            match index.get(&template.id) {
                Some(&i) => templates[i] = template,
                None => {
                    index.insert(template.id.clone(), templates.len());
                    templates.push(template);
                }
            }
        }

        (
            Self {
                version,
                stale: false,
                templates,
                index,
            },
            rejected,
        )
    }

    pub fn templates(&self) -> &[PatternTemplate] {
        &self.templates
    }

    pub fn get(&self, id: &TemplateId) -> Option<&PatternTemplate> {
        self.index.get(id).map(|&i| &self.templates[i])
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Longest window any template needs; bounds what the intake copies per job.
    pub fn max_window_ms(&self) -> u64 {
        self.templates.iter().map(|t| t.window_ms).max().unwrap_or(0)
    }

    pub fn marked_stale(&self) -> Self {
        let mut copy = self.clone();
        copy.stale = true;
        copy
    }
}
