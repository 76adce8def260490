//! Seam for an external effect-annotation engine.
//!
//! The store does not annotate variants itself. An annotator registered on
//! the store is applied to every record between the input adapter and the
//! backend.

use std::sync::Arc;

use crate::error::Result;
use crate::header::VariantHeader;
use crate::input::VariantIterator;
use crate::variant::VariantRecord;

pub trait VariantAnnotator: Send + Sync {
    fn annotate(&self, header: &VariantHeader, record: VariantRecord) -> Result<VariantRecord>;
}

impl<F> VariantAnnotator for F
where
    F: Fn(&VariantHeader, VariantRecord) -> Result<VariantRecord> + Send + Sync,
{
    fn annotate(&self, header: &VariantHeader, record: VariantRecord) -> Result<VariantRecord> {
        self(header, record)
    }
}

/// Applies an annotator to every record of the wrapped iterator.
pub struct Annotated {
    inner: Box<dyn VariantIterator>,
    annotator: Arc<dyn VariantAnnotator>,
    failed: bool,
}

impl Annotated {
    pub fn new(inner: Box<dyn VariantIterator>, annotator: Arc<dyn VariantAnnotator>) -> Self {
        Annotated {
            inner,
            annotator,
            failed: false,
        }
    }
}

impl Iterator for Annotated {
    type Item = Result<VariantRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.inner.next()? {
            Ok(record) => self.annotator.annotate(self.inner.header(), record),
            Err(e) => Err(e),
        };
        self.failed = result.is_err();
        Some(result)
    }
}

impl VariantIterator for Annotated {
    fn header(&self) -> &VariantHeader {
        self.inner.header()
    }
}
