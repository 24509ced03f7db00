//! Dirty flag shared between state producers and the render loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable redraw request flag.
///
/// Setting the flag is the only way to ask for a redraw. The render loop
/// clears it with [`RedrawFlag::take`] before it starts drawing, so a request
/// that lands mid-draw is still pending for the next frame.
#[derive(Debug, Clone, Default)]
pub struct RedrawFlag(Arc<AtomicBool>);

impl RedrawFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a redraw.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears() {
        let flag = RedrawFlag::new();
        assert!(!flag.take());
        flag.request();
        let other = flag.clone();
        assert!(other.is_requested());
        assert!(other.take());
        assert!(!flag.is_requested());
    }
}
