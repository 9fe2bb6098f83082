/*!
 * Iteration Wrapper
 *
 * Adapts any [`Iterator`] into a [`CloseableIteration`]. Closing drops the
 * underlying iterator and runs an optional close hook once.
 */

use super::CloseableIteration;
use crate::errors::LockResult;
use std::fmt;

type CloseHook = Box<dyn FnOnce() + Send>;

/// Closeable adapter over a plain iterator
pub struct IterationWrapper<I: Iterator> {
    inner: Option<I>,
    on_close: Option<CloseHook>,
}

impl<I: Iterator> IterationWrapper<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner: Some(inner),
            on_close: None,
        }
    }

    /// Run `hook` when the iteration is closed
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<I: Iterator> Iterator for IterationWrapper<I> {
    type Item = I::Item;

    #[inline]
    fn next(&mut self) -> Option<I::Item> {
        self.inner.as_mut()?.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.as_ref().map_or((0, Some(0)), |i| i.size_hint())
    }
}

impl<I: Iterator> CloseableIteration for IterationWrapper<I> {
    fn close(&mut self) -> LockResult<()> {
        if self.inner.take().is_some() {
            if let Some(hook) = self.on_close.take() {
                hook();
            }
        }
        Ok(())
    }
}

impl<I: Iterator> From<I> for IterationWrapper<I> {
    fn from(inner: I) -> Self {
        Self::new(inner)
    }
}

impl<I: Iterator> fmt::Debug for IterationWrapper<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationWrapper")
            .field("closed", &self.is_closed())
            .finish()
    }
}
