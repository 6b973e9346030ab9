//! Per-thread traversal scratch space.
//!
//! A generation-stamped mark array replaces a `HashSet<NodeId>`: starting a
//! new traversal bumps the generation instead of clearing the array, and the
//! array only gets zeroed when the counter wraps.

use std::cell::RefCell;
use vecsearch_core::NodeId;

#[derive(Default)]
pub(crate) struct VisitedScratch {
    marks: Vec<u32>,
    generation: u32,
}

impl VisitedScratch {
    /// Starts a traversal over `len` nodes.
    pub(crate) fn prepare(&mut self, len: usize) {
        if self.marks.len() < len {
            self.marks.resize(len, 0);
        }
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.marks.fill(0);
            self.generation = 1;
        }
    }

    /// Marks `id`; returns `true` if it had not been seen in this traversal.
    #[inline]
    pub(crate) fn visit(&mut self, id: NodeId) -> bool {
        let idx = id as usize;
        if idx >= self.marks.len() {
            // Node published after `prepare` sized the array.
            self.marks.resize(idx + 1, 0);
        }
        let slot = &mut self.marks[idx];
        if *slot == self.generation {
            false
        } else {
            *slot = self.generation;
            true
        }
    }
}

thread_local! {
    static VISITED_SCRATCH: RefCell<VisitedScratch> = RefCell::new(VisitedScratch::default());
}

/// Runs `f` with this thread's scratch, prepared for `len` nodes.
///
/// Falls back to a fresh scratch when the thread-local one is already
/// borrowed (a traversal started from inside another traversal's callback).
pub(crate) fn with_scratch<R>(len: usize, f: impl FnOnce(&mut VisitedScratch) -> R) -> R {
    VISITED_SCRATCH.with(|cell| match cell.try_borrow_mut() {
        Ok(mut scratch) => {
            scratch.prepare(len);
            f(&mut scratch)
        }
        Err(_) => {
            let mut scratch = VisitedScratch::default();
            scratch.prepare(len);
            f(&mut scratch)
        }
    })
}
