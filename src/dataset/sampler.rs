use crate::common::*;

/// An infinite sampler cycling over `0..len` in order.
///
/// The cursor is atomic, so loader threads sharing one sampler never receive
/// a duplicated or skipped index. The order in which concurrent callers
/// receive indices is unspecified.
#[derive(Debug)]
pub struct CyclicSampler {
    len: usize,
    cursor: AtomicUsize,
}

impl CyclicSampler {
    pub fn new(len: usize) -> Result<Self> {
        ensure!(len > 0, "cannot sample from an empty pool");
        Ok(Self {
            len,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Advances the cursor and returns the index it pointed at.
    pub fn next_index(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::SeqCst) % self.len
    }

    /// The index returned by the `step`-th call, without touching the cursor.
    pub fn index_at(&self, step: usize) -> usize {
        step % self.len
    }

    pub fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        iter::repeat_with(move || self.next_index())
    }
}
