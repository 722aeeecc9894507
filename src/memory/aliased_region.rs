/// Aliased Region
///
/// Bookkeeping for one physical allocation shared by several logical views.
/// The pre-skin vertex buffers place a read-only static region and one
/// writable region per buffered frame in the same heap; the async compute
/// queue writes frame N's region while the graphics queue still reads frame
/// N-1's. Views that may be accessed concurrently must not overlap.

use std::ops::Range;

use crate::error::{VisibilityError, VisibilityResult};

/// How a view is accessed over time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewAccess {
    /// Read-only for the lifetime of the allocation
    Static,
    /// Written during the frames using this buffer index
    PerBuffer(u32),
}

impl ViewAccess {
    /// Can the two views be touched at the same time with at least one write
    fn conflicts_with(&self, other: &ViewAccess) -> bool {
        match (self, other) {
            (ViewAccess::Static, ViewAccess::Static) => false,
            (ViewAccess::PerBuffer(a), ViewAccess::PerBuffer(b)) => a != b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedView {
    pub name: String,
    pub range: Range<u64>,
    pub access: ViewAccess,
}

#[derive(Debug, Clone)]
pub struct AliasedRegion {
    label: String,
    size: u64,
    views: Vec<AliasedView>,
}

impl AliasedRegion {
    pub fn new(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: label.into(),
            size,
            views: Vec::new(),
        }
    }

    /// Registers a view; fails when it leaves the allocation or overlaps a
    /// concurrently accessed view
    pub fn add_view(
        &mut self,
        name: impl Into<String>,
        range: Range<u64>,
        access: ViewAccess,
    ) -> VisibilityResult<usize> {
        let name = name.into();

        if range.start > range.end || range.end > self.size {
            return Err(VisibilityError::AliasOverlap {
                region: name,
                owner: self.label.clone(),
                start: 0,
                end: self.size,
            });
        }

        if let Some(owner) = self
            .views
            .iter()
            .find(|view| view.access.conflicts_with(&access) && overlaps(&view.range, &range))
        {
            return Err(VisibilityError::AliasOverlap {
                region: name,
                owner: owner.name.clone(),
                start: owner.range.start,
                end: owner.range.end,
            });
        }

        self.views.push(AliasedView { name, range, access });
        Ok(self.views.len() - 1)
    }

    /// Verifies a write of `range` during frames using `buffer_index`
    pub fn check_write(&self, range: Range<u64>, buffer_index: u32) -> VisibilityResult<()> {
        let writable = self.views.iter().any(|view| {
            view.access == ViewAccess::PerBuffer(buffer_index)
                && view.range.start <= range.start
                && range.end <= view.range.end
        });

        if writable {
            return Ok(());
        }

        let owner = self
            .views
            .iter()
            .find(|view| overlaps(&view.range, &range))
            .map(|view| view.name.clone())
            .unwrap_or_else(|| self.label.clone());

        Err(VisibilityError::AliasOverlap {
            region: format!("write for buffer {}", buffer_index),
            owner,
            start: range.start,
            end: range.end,
        })
    }

    pub fn view(&self, index: usize) -> Option<&AliasedView> {
        self.views.get(index)
    }

    pub fn views(&self) -> &[AliasedView] {
        &self.views
    }

    /// Writable view of `buffer_index`
    pub fn per_buffer_view(&self, buffer_index: u32) -> Option<&AliasedView> {
        self.views
            .iter()
            .find(|view| view.access == ViewAccess::PerBuffer(buffer_index))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}
