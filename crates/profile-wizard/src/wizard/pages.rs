use serde::Serialize;
use tracing::debug;

use super::aggregate;
use super::domain::{FieldError, FormSnapshot};
use super::schema::EntitySchema;

/// Navigation refused by the page gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageGateError {
    #[error("page {page} ('{page_id}') has {} incomplete field(s)", .errors.len())]
    PageInvalid {
        page: usize,
        page_id: String,
        errors: Vec<FieldError>,
    },
    #[error("page {requested} does not exist (wizard has {pages} pages)")]
    OutOfRange { requested: usize, pages: usize },
}

/// Tracks the current wizard page and gates forward moves on page validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageController {
    current: usize,
    page_count: usize,
}

impl PageController {
    pub fn new(schema: &EntitySchema) -> Self {
        Self {
            current: 0,
            page_count: schema.pages().len(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn terminal(&self) -> usize {
        self.page_count.saturating_sub(1)
    }

    pub fn is_terminal(&self) -> bool {
        self.current == self.terminal()
    }

    /// Errors of the fields shown on page `index`; empty for unknown pages.
    pub fn page_errors(
        &self,
        schema: &EntitySchema,
        snapshot: &FormSnapshot,
        index: usize,
    ) -> Vec<FieldError> {
        match schema.pages().get(index) {
            Some(page) => {
                aggregate::collect_where(schema.fields(), snapshot, |spec| page.contains(&spec.name))
            }
            None => Vec::new(),
        }
    }

    pub fn is_page_valid(&self, schema: &EntitySchema, snapshot: &FormSnapshot, index: usize) -> bool {
        index < self.page_count && self.page_errors(schema, snapshot, index).is_empty()
    }

    /// Advances one page when the current page is valid. Every forward move goes through
    /// here or through [`PageController::jump_to`].
    pub fn next(
        &mut self,
        schema: &EntitySchema,
        snapshot: &FormSnapshot,
    ) -> Result<usize, PageGateError> {
        self.gate(schema, snapshot, self.current)?;
        self.current = (self.current + 1).min(self.terminal());
        debug!(page = self.current, "advanced wizard page");
        Ok(self.current)
    }

    pub fn prev(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        debug!(page = self.current, "returned to previous wizard page");
        self.current
    }

    /// Moves backwards freely; moves forwards only when every page before `index` is valid.
    pub fn jump_to(
        &mut self,
        schema: &EntitySchema,
        snapshot: &FormSnapshot,
        index: usize,
    ) -> Result<usize, PageGateError> {
        if index >= self.page_count {
            return Err(PageGateError::OutOfRange {
                requested: index,
                pages: self.page_count,
            });
        }

        if index > self.current {
            for page in 0..index {
                self.gate(schema, snapshot, page)?;
            }
        }

        self.current = index;
        debug!(page = self.current, "jumped to wizard page");
        Ok(self.current)
    }

    /// Restores a position without gating, clamped to the last page. Used on resume.
    pub(crate) fn restore(&mut self, index: usize) {
        self.current = index.min(self.terminal());
    }

    fn gate(
        &self,
        schema: &EntitySchema,
        snapshot: &FormSnapshot,
        index: usize,
    ) -> Result<(), PageGateError> {
        let errors = self.page_errors(schema, snapshot, index);
        if errors.is_empty() {
            return Ok(());
        }
        let page_id = schema
            .pages()
            .get(index)
            .map(|page| page.id.clone())
            .unwrap_or_default();
        Err(PageGateError::PageInvalid {
            page: index,
            page_id,
            errors,
        })
    }
}
