//! The STREAM-like bandwidth kernel.
//!
//! Each iteration runs four phases over three equally sized `u64` arrays:
//!
//! | Phase   | Operation              | Accesses per element |
//! |---------|------------------------|----------------------|
//! | `Copy`  | `c[i] = a[i]`          | 2                    |
//! | `Scale` | `b[i] = k * c[i]`      | 2                    |
//! | `Add`   | `c[i] = a[i] + b[i]`   | 3                    |
//! | `Triad` | `a[i] = b[i] + k * c[i]` | 3                  |
//!
//! [`run_cached`] times all four phases as one span and leaves the caches
//! alone. [`run_uncached`] evicts the arrays touched by a phase before timing
//! it and sums the four phase timings. Both return the best of [`ITERATIONS`].

use crate::platform::{BackingStorage, CacheFlush, Clock};
use std::hint::black_box;
use std::time::Duration;

/// Scalar `k` of the scale and triad phases.
pub const SCALAR: u64 = 3;
/// Timed iterations per kernel run; the fastest one is reported.
pub const ITERATIONS: usize = 10;
/// Memory accesses per element and iteration over all four phases.
pub const ACCESSES_PER_ELEMENT: u64 = 10;

/// Number of `u64` elements per array when a block of `block_bytes` is split
/// into three arrays.
pub const fn array_len(block_bytes: usize) -> usize {
    block_bytes / 3 / size_of::<u64>()
}

/// Which of the three arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ArrayName {
    /// Source of copy and add, destination of triad
    A,
    /// Destination of scale
    B,
    /// Destination of copy and add
    C,
}

impl std::fmt::Display for ArrayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArrayName::A => write!(f, "a"),
            ArrayName::B => write!(f, "b"),
            ArrayName::C => write!(f, "c"),
        }
    }
}

/// The three working arrays of one experiment.
///
/// All three have the same length and never overlap.
#[derive(Debug)]
pub struct WorkingArrays<'a> {
    a: &'a mut [u64],
    b: &'a mut [u64],
    c: &'a mut [u64],
}

impl<'a> WorkingArrays<'a> {
    /// Creates working arrays from three separate slices.
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(a: &'a mut [u64], b: &'a mut [u64], c: &'a mut [u64]) -> Self {
        assert!(
            a.len() == b.len() && b.len() == c.len(),
            "array lengths differ: {} / {} / {}",
            a.len(),
            b.len(),
            c.len()
        );
        WorkingArrays { a, b, c }
    }

    /// Carves `a`, `b` and `c` consecutively out of the first `block_bytes` of `storage`.
    ///
    /// # Panics
    ///
    /// Panics if the storage is shorter than `block_bytes` or not 8-byte aligned.
    pub fn carve<S: BackingStorage + ?Sized>(storage: &'a mut S, block_bytes: usize) -> Self {
        assert!(
            storage.len() >= block_bytes,
            "storage of {} bytes cannot hold a block of {} bytes",
            storage.len(),
            block_bytes
        );
        assert!(
            (storage.ptr() as usize).is_multiple_of(align_of::<u64>()),
            "storage at {:p} is not 8-byte aligned",
            storage.ptr()
        );
        let n = array_len(block_bytes);
        // SAFETY: BackingStorage guarantees exclusive, aligned access to `len()`
        // bytes, 3 * n * 8 <= block_bytes <= len(), and the mutable borrow of
        // `storage` outlives the arrays.
        let all = unsafe { std::slice::from_raw_parts_mut(storage.ptr() as *mut u64, 3 * n) };
        let (a, rest) = all.split_at_mut(n);
        let (b, c) = rest.split_at_mut(n);
        WorkingArrays { a, b, c }
    }

    /// Elements per array.
    pub fn len(&self) -> usize {
        self.a.len()
    }

    /// Returns `true` if the arrays are empty.
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Read access to one array.
    pub fn array(&self, name: ArrayName) -> &[u64] {
        match name {
            ArrayName::A => &*self.a,
            ArrayName::B => &*self.b,
            ArrayName::C => &*self.c,
        }
    }

    /// Writes the start values `a = 2`, `b = 2`, `c = 0`.
    pub fn seed(&mut self) {
        self.a.fill(2);
        self.b.fill(2);
        self.c.fill(0);
    }

    /// Finds the first element that differs from element 0 of its array.
    ///
    /// All lanes execute the same arithmetic, so any difference means the
    /// memory did not return what was written.
    pub fn find_mismatch(&self) -> Option<(ArrayName, usize)> {
        [ArrayName::A, ArrayName::B, ArrayName::C]
            .into_iter()
            .find_map(|name| {
                let data = self.array(name);
                let first = data.first()?;
                data.iter().position(|v| v != first).map(|idx| (name, idx))
            })
    }
}

/// One of the four kernel phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// `c = a`
    Copy,
    /// `b = k * c`
    Scale,
    /// `c = a + b`
    Add,
    /// `a = b + k * c`
    Triad,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [Phase::Copy, Phase::Scale, Phase::Add, Phase::Triad];

    /// Memory accesses per element.
    pub const fn accesses(self) -> u64 {
        match self {
            Phase::Copy | Phase::Scale => 2,
            Phase::Add | Phase::Triad => 3,
        }
    }

    /// Arrays read or written by this phase.
    pub const fn touches(self) -> &'static [ArrayName] {
        match self {
            Phase::Copy => &[ArrayName::A, ArrayName::C],
            Phase::Scale => &[ArrayName::B, ArrayName::C],
            Phase::Add | Phase::Triad => &[ArrayName::A, ArrayName::B, ArrayName::C],
        }
    }

    /// Runs the phase once over all elements. Arithmetic wraps on overflow.
    pub fn run(self, arrays: &mut WorkingArrays<'_>) {
        let WorkingArrays { a, b, c } = arrays;
        match self {
            Phase::Copy => c.copy_from_slice(a),
            Phase::Scale => {
                for (b, c) in b.iter_mut().zip(c.iter()) {
                    *b = SCALAR.wrapping_mul(*c);
                }
            }
            Phase::Add => {
                for ((c, a), b) in c.iter_mut().zip(a.iter()).zip(b.iter()) {
                    *c = a.wrapping_add(*b);
                }
            }
            Phase::Triad => {
                for ((a, b), c) in a.iter_mut().zip(b.iter()).zip(c.iter()) {
                    *a = b.wrapping_add(SCALAR.wrapping_mul(*c));
                }
            }
        }
    }

    fn flush(self, arrays: &WorkingArrays<'_>, flush: &dyn CacheFlush) {
        for &name in self.touches() {
            flush.flush_range(arrays.array(name));
        }
    }
}

/// Runs all four phases once, in order.
pub fn run_pass(arrays: &mut WorkingArrays<'_>) {
    for phase in Phase::ALL {
        phase.run(arrays);
    }
}

/// Times `f` over the arrays. The `black_box` barriers keep the memory
/// accesses between both timestamps.
fn timed<F: FnOnce(&mut WorkingArrays<'_>)>(
    clock: &dyn Clock,
    arrays: &mut WorkingArrays<'_>,
    f: F,
) -> u64 {
    let t0 = clock.now_ns();
    black_box(&mut *arrays);
    f(arrays);
    black_box(&mut *arrays);
    let t1 = clock.now_ns();
    t1.saturating_sub(t0)
}

/// Minimum of `iterations` samples.
fn best_of(iterations: usize, mut sample: impl FnMut() -> u64) -> u64 {
    (0..iterations).map(|_| sample()).min().unwrap_or(0)
}

/// Cache-primed variant: best of [`ITERATIONS`] end-to-end spans over all four phases.
pub fn run_cached(arrays: &mut WorkingArrays<'_>, clock: &dyn Clock) -> Duration {
    let best = best_of(ITERATIONS, || timed(clock, arrays, run_pass));
    Duration::from_nanos(best)
}

/// Cache-flushed variant: every phase is preceded by evicting the arrays it
/// touches, timed on its own, and the four phase timings are summed per
/// iteration. Returns the best of [`ITERATIONS`] sums.
pub fn run_uncached(
    arrays: &mut WorkingArrays<'_>,
    clock: &dyn Clock,
    flush: &dyn CacheFlush,
) -> Duration {
    let best = best_of(ITERATIONS, || {
        Phase::ALL
            .into_iter()
            .map(|phase| {
                phase.flush(arrays, flush);
                timed(clock, arrays, |arrays| phase.run(arrays))
            })
            .sum()
    });
    Duration::from_nanos(best)
}
