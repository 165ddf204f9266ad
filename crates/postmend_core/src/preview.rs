use std::cell::RefCell;

use similar::TextDiff;

use crate::record::ContentRecord;
use crate::store::{ContentStore, StoreError, render_records};

/// Wraps a real store for `--dry-run`: loads pass through, saves are captured
/// instead of written.
pub struct PreviewStore<'a> {
    inner: &'a dyn ContentStore,
    loaded: RefCell<Option<Vec<ContentRecord>>>,
    captured: RefCell<Option<Vec<ContentRecord>>>,
}

impl<'a> PreviewStore<'a> {
    pub fn new(inner: &'a dyn ContentStore) -> Self {
        Self {
            inner,
            loaded: RefCell::new(None),
            captured: RefCell::new(None),
        }
    }

    /// Unified diff between the loaded snapshot and what would have been saved,
    /// both rendered the same way. Empty when nothing would change.
    pub fn diff(&self) -> Result<String, StoreError> {
        let location = self.inner.describe();
        let loaded = self.loaded.borrow();
        let captured = self.captured.borrow();
        let (Some(before), Some(after)) = (loaded.as_ref(), captured.as_ref()) else {
            return Ok(String::new());
        };
        let render = |records: &[ContentRecord]| {
            render_records(records).map_err(|err| {
                StoreError::unavailable(&location, format!("failed to serialize: {err}"))
            })
        };
        let before = render(before.as_slice())?;
        let after = render(after.as_slice())?;
        if before == after {
            return Ok(String::new());
        }
        Ok(TextDiff::from_lines(&before, &after)
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{location}"), &format!("b/{location}"))
            .to_string())
    }
}

impl ContentStore for PreviewStore<'_> {
    fn load_all(&self) -> Result<Vec<ContentRecord>, StoreError> {
        let records = self.inner.load_all()?;
        *self.loaded.borrow_mut() = Some(records.clone());
        Ok(records)
    }

    fn save_all(&self, records: &[ContentRecord]) -> Result<(), StoreError> {
        *self.captured.borrow_mut() = Some(records.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} (dry run)", self.inner.describe())
    }
}
