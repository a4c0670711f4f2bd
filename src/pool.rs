//! Frame buffer pool: bounded free-list of reusable, reference-counted
//! decoded frames.
//!
//! Decoding at camera frame rates would otherwise allocate a full RGBA
//! buffer per frame. The pool amortizes that cost: the decoder acquires a
//! frame, fills it, publishes it; when the last holder releases it, the
//! frame returns to the free list for the next decode cycle.
//!
//! A pooled frame may carry a stale resolution from before a format
//! change — the decoder is responsible for re-initializing the buffer it
//! gets back.
//!
//! ## Locking
//!
//! The free list and counters live behind a single mutex. The per-frame
//! reference count and state flags are atomics mutated *outside* that
//! mutex: acquiring or releasing a specific frame only needs the pool
//! lock for free-list insertion/removal. All flag transitions are
//! checked-then-set to keep readers and the pool from racing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

/// A reusable decoded frame: RGBA pixels plus dimension metadata.
#[derive(Debug, Default)]
pub struct FrameImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl FrameImage {
    /// (Re-)initialize the buffer for new dimensions. A no-op when the
    /// dimensions already match.
    pub fn reinit(&mut self, width: usize, height: usize) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(width * height * 4, 0);
    }
}

/// A reference-counted pool frame.
///
/// State machine per frame:
///
/// ```text
/// new/acquired (refs=1) --release--> refs=0 --> free list (in_pool)
///        ^                                           |
///        +--------------- acquire -------------------+
///
/// evicted or pool closed --> freed (terminal)
/// ```
///
/// Invariants: a frame with `refs > 0` is never on the free list; a frame
/// marked `freed` or `in_pool` is never accepted back by
/// [`FramePool::release`].
#[derive(Debug)]
pub struct PooledFrame {
    refs: AtomicI32,
    freed: AtomicBool,
    in_pool: AtomicBool,
    being_served: AtomicBool,
    pub image: Mutex<FrameImage>,
}

impl PooledFrame {
    fn new() -> Self {
        Self {
            refs: AtomicI32::new(1),
            freed: AtomicBool::new(false),
            in_pool: AtomicBool::new(false),
            being_served: AtomicBool::new(false),
            image: Mutex::new(FrameImage::default()),
        }
    }

    /// Register an additional holder.
    pub fn increment_refs(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn refs(&self) -> i32 {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn is_in_pool(&self) -> bool {
        self.in_pool.load(Ordering::SeqCst)
    }

    /// Mark the frame as being copied out to a reader. A served frame is
    /// never recycled mid-copy.
    pub fn set_being_served(&self, served: bool) {
        self.being_served.store(served, Ordering::SeqCst);
    }

    pub fn is_being_served(&self) -> bool {
        self.being_served.load(Ordering::SeqCst)
    }

    fn mark_freed(&self) {
        self.freed.store(true, Ordering::SeqCst);
        let mut image = self.image.lock();
        image.data = Vec::new();
        image.width = 0;
        image.height = 0;
    }
}

/// Counters reported at close and used by conservation assertions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Frames handed out from the free list.
    pub hits: u64,
    /// Frames freshly allocated because the free list was empty.
    pub news: u64,
    /// Frames returned to the free list.
    pub puts: u64,
    /// Frames destroyed because the free list was at capacity.
    pub evicted: u64,
    /// Frames destroyed at close.
    pub freed_at_close: u64,
}

struct PoolInner {
    free: Vec<Arc<PooledFrame>>,
    stats: PoolStats,
    closed: bool,
}

/// Bounded pool of reusable frames.
///
/// `acquire` is LIFO — the most recently returned frame is reused first,
/// maximizing cache locality. When a release would grow the free list
/// past capacity, the least-recently-returned frame is evicted and freed.
pub struct FramePool {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        tracing::debug!(capacity, "frame pool created");
        Self {
            inner: Mutex::new(PoolInner {
                free: Vec::with_capacity(capacity),
                stats: PoolStats::default(),
                closed: false,
            }),
            capacity,
        }
    }

    /// Take a frame out of the pool, or allocate one when the free list
    /// is empty. The returned frame has a reference count of exactly 1.
    ///
    /// Returns `None` after [`close`](Self::close) — callers treat this
    /// as "temporarily unavailable", not fatal.
    pub fn acquire(self: &Arc<Self>) -> Option<Arc<PooledFrame>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            tracing::warn!("acquire on closed frame pool");
            return None;
        }

        if let Some(frame) = inner.free.pop() {
            inner.stats.hits += 1;
            tracing::trace!(free = inner.free.len(), "frame reused from pool");
            frame.in_pool.store(false, Ordering::SeqCst);
            frame.refs.store(1, Ordering::SeqCst);
            return Some(frame);
        }

        inner.stats.news += 1;
        tracing::trace!(total_new = inner.stats.news, "allocating new pool frame");
        Some(Arc::new(PooledFrame::new()))
    }

    /// Drop one reference to `frame`, returning it to the free list when
    /// the count reaches zero.
    ///
    /// Double-release of an already freed or pooled frame is rejected
    /// with a log. Decrementing below zero is a programming defect — the
    /// frame was released more times than acquired — and panics rather
    /// than corrupting the pool.
    pub fn release(&self, frame: &Arc<PooledFrame>) {
        if frame.is_freed() || frame.is_in_pool() {
            tracing::warn!(
                freed = frame.is_freed(),
                in_pool = frame.is_in_pool(),
                "rejecting release of frame not checked out"
            );
            return;
        }

        let remaining = frame.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            tracing::trace!(remaining, "frame still referenced, not pooling");
            return;
        }
        if remaining < 0 {
            // not a runtime condition: proves an over-release upstream
            panic!("pooled frame reference count went negative ({remaining})");
        }

        if frame.is_being_served() {
            tracing::debug!("frame is being served, not pooling");
            return;
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            frame.mark_freed();
            return;
        }

        if inner.free.len() >= self.capacity {
            // evict the least-recently-returned frame
            let evicted = inner.free.remove(0);
            evicted.in_pool.store(false, Ordering::SeqCst);
            evicted.mark_freed();
            inner.stats.evicted += 1;
            tracing::debug!(capacity = self.capacity, "pool full, evicted oldest frame");
        }

        frame.in_pool.store(true, Ordering::SeqCst);
        inner.free.push(frame.clone());
        inner.stats.puts += 1;
        tracing::trace!(free = inner.free.len(), "frame returned to pool");
    }

    /// Free every pooled frame and clear the free list. Frames still
    /// checked out are the holders' responsibility.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;

        let inner = &mut *inner;
        for frame in inner.free.drain(..) {
            frame.in_pool.store(false, Ordering::SeqCst);
            frame.mark_freed();
            inner.stats.freed_at_close += 1;
        }

        let stats = inner.stats;
        tracing::debug!(
            hits = stats.hits,
            news = stats.news,
            puts = stats.puts,
            evicted = stats.evicted,
            freed_at_close = stats.freed_at_close,
            "frame pool closed"
        );
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }

    /// Current free-list length (diagnostics and tests).
    pub fn free_len(&self) -> usize {
        self.inner.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> Arc<FramePool> {
        Arc::new(FramePool::new(capacity))
    }

    #[test]
    fn acquire_allocates_then_reuses_lifo() {
        let p = pool(4);
        let a = p.acquire().unwrap();
        let b = p.acquire().unwrap();
        assert_eq!(p.stats().news, 2);

        a.image.lock().reinit(2, 2);
        p.release(&a);
        p.release(&b);
        assert_eq!(p.free_len(), 2);

        // LIFO: b came back last, goes out first
        let c = p.acquire().unwrap();
        assert!(Arc::ptr_eq(&c, &b));
        assert_eq!(p.stats().hits, 1);
        assert_eq!(c.refs(), 1);
        assert!(!c.is_in_pool());
    }

    #[test]
    fn release_with_remaining_holders_does_not_pool() {
        let p = pool(4);
        let f = p.acquire().unwrap();
        f.increment_refs(); // second holder
        p.release(&f);
        assert_eq!(f.refs(), 1);
        assert_eq!(p.free_len(), 0);

        p.release(&f);
        assert_eq!(p.free_len(), 1);
        assert!(f.is_in_pool());
    }

    #[test]
    fn double_release_of_pooled_frame_is_noop() {
        let p = pool(4);
        let f = p.acquire().unwrap();
        p.release(&f);
        assert!(f.is_in_pool());

        // already in pool: rejected, refcount untouched
        p.release(&f);
        assert_eq!(p.free_len(), 1);
        assert_eq!(f.refs(), 0);
    }

    #[test]
    fn release_of_freed_frame_is_noop() {
        let p = pool(1);
        let a = p.acquire().unwrap();
        let b = p.acquire().unwrap();
        p.release(&a);
        p.release(&b); // capacity 1: a evicted and freed
        assert!(a.is_freed());
        assert_eq!(p.stats().evicted, 1);

        p.release(&a); // freed frame: rejected without panic
        assert_eq!(p.free_len(), 1);
    }

    #[test]
    #[should_panic(expected = "reference count went negative")]
    fn over_release_panics() {
        let p = pool(4);
        let f = p.acquire().unwrap();
        // drive refs to zero without pooling (frame marked as served)
        f.set_being_served(true);
        p.release(&f);
        assert_eq!(f.refs(), 0);
        p.release(&f); // refs -> -1: abort
    }

    #[test]
    fn eviction_frees_least_recently_returned() {
        let p = pool(2);
        let a = p.acquire().unwrap();
        let b = p.acquire().unwrap();
        let c = p.acquire().unwrap();
        p.release(&a);
        p.release(&b);
        p.release(&c);
        assert_eq!(p.free_len(), 2);
        assert!(a.is_freed());
        assert!(!b.is_freed());
        assert!(!c.is_freed());
    }

    #[test]
    fn close_frees_pooled_frames_and_stops_acquires() {
        let p = pool(4);
        let a = p.acquire().unwrap();
        let held = p.acquire().unwrap();
        p.release(&a);

        p.close();
        assert!(a.is_freed());
        assert!(!held.is_freed()); // checked-out frame untouched
        assert!(p.acquire().is_none());
        assert_eq!(p.stats().freed_at_close, 1);

        p.close(); // double close tolerated
    }

    #[test]
    fn conservation_counters() {
        let p = pool(3);
        let mut held = Vec::new();
        for _ in 0..10 {
            let f = p.acquire().unwrap();
            held.push(f);
            if held.len() > 2 {
                let f = held.remove(0);
                p.release(&f);
            }
        }
        for f in held.drain(..) {
            p.release(&f);
        }
        p.close();

        let s = p.stats();
        // every successful acquire was a hit or a new allocation
        assert_eq!(s.hits + s.news, 10);
        // no more returns than acquires
        assert!(s.puts <= s.hits + s.news);
        // everything constructed was destroyed: nothing is checked out
        // and close() drained the free list
        assert_eq!(s.news, s.evicted + s.freed_at_close);
        assert_eq!(p.free_len(), 0);
    }

    #[test]
    fn reinit_only_on_dimension_change() {
        let mut img = FrameImage::default();
        img.reinit(4, 2);
        assert_eq!(img.data.len(), 32);
        img.data[0] = 0xFF;
        img.reinit(4, 2); // same dims: contents preserved
        assert_eq!(img.data[0], 0xFF);
        img.reinit(2, 2);
        assert_eq!(img.data.len(), 16);
    }
}
