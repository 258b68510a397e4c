// Scoped release of GPU objects
//
// Every object is pushed right after it is created, so flushing the stack
// destroys things in exact reverse order of construction. A stack that is
// dropped half-built (early `?` during construction) still releases what it
// already holds.

type Release = Box<dyn FnOnce() + Send + Sync>;

/// Closures must be `Send + Sync` so owners can sit behind an `Arc`.
pub struct ReleaseStack {
    entries: Vec<(&'static str, Release)>,
}

impl ReleaseStack {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register the release of an object that was just created
    pub fn push(&mut self, label: &'static str, release: impl FnOnce() + Send + Sync + 'static) {
        self.entries.push((label, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything, newest first. Safe to call more than once.
    pub fn flush(&mut self) {
        while let Some((label, release)) = self.entries.pop() {
            log::trace!("Releasing {}", label);
            release();
        }
    }
}

impl Default for ReleaseStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        self.flush();
    }
}
