//! Single-writer, single-reader non-blocking frame FIFO
//!
//! Bridges the recorder and player callbacks, which are scheduled
//! independently and may even run concurrently on two cores. Neither side
//! ever blocks: a write into a full FIFO or a read from an empty one simply
//! transfers fewer frames (possibly zero).
//!
//! ## Indices
//!
//! `front` and `rear` are 32-bit counters that only ever grow (wrapping at
//! 2^32). The logical capacity is rounded up to a power of two so that the
//! slot of an index is `index & (capacity_p2 - 1)`. The indices between the
//! logical capacity and the rounded capacity (the "fudge factor") are never
//! used: advancing an index across the logical end skips them, so a masked
//! index always lands inside the backing store.
//!
//! Each index has exactly one writer. The writer publishes with a release
//! store after copying frame data; the other side loads with acquire.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Largest supported logical capacity in frames
///
/// Keeps `index & mask` plus an increment well inside `u32`.
pub const MAX_FRAME_CAPACITY: usize = 1 << 30;

/// Errors that can occur while creating a FIFO
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FifoError {
    #[error("FIFO capacity must be between 1 and {max} frames, got {requested}")]
    InvalidCapacity { requested: usize, max: usize },

    #[error("FIFO frames must hold at least one channel")]
    InvalidChannelCount,

    #[error("backing storage holds {actual} samples, {required} required")]
    StorageTooSmall { required: usize, actual: usize },
}

/// Cache-line aligned wrapper so the two indices never share a line
#[repr(align(64))]
struct CacheAligned<T>(T);

/// State shared between the writer and reader halves
struct Inner<T> {
    /// Logical capacity in frames
    frame_count: u32,
    /// `frame_count` rounded up to a power of two
    frame_count_p2: u32,
    /// `frame_count_p2 - frame_count`: index range that is skipped
    fudge_factor: u32,
    /// Samples per frame
    channels: usize,
    /// `frame_count * channels` samples
    buffer: Box<[UnsafeCell<T>]>,
    /// Index of the oldest readable frame (written by the reader only)
    front: CacheAligned<AtomicU32>,
    /// Index of the next frame slot to write (written by the writer only)
    rear: CacheAligned<AtomicU32>,
}

// The halves never touch the same slots concurrently: the writer only fills
// slots in [rear, front + capacity) and the reader only drains [front, rear).
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    /// Return `index + increment`, skipping the wasted index range
    #[inline]
    fn sum(&self, index: u32, increment: u32) -> u32 {
        let mut increment = increment;
        if self.fudge_factor != 0 {
            let mask = self.frame_count_p2 - 1;
            debug_assert!((index & mask) < self.frame_count);
            debug_assert!(increment <= self.frame_count_p2);
            if (index & mask) + increment >= self.frame_count {
                increment += self.fudge_factor;
            }
        }
        index.wrapping_add(increment)
    }

    /// Return `rear - front` in frames, `0 <= diff <= frame_count`
    #[inline]
    fn diff(&self, rear: u32, front: u32) -> u32 {
        let mut diff = rear.wrapping_sub(front);
        if self.fudge_factor != 0 {
            let mask = !(self.frame_count_p2 - 1);
            let generation_diff = (rear & mask).wrapping_sub(front & mask);
            if generation_diff != 0 {
                debug_assert_eq!(generation_diff, self.frame_count_p2);
                diff = diff.wrapping_sub(self.fudge_factor);
            }
        }
        debug_assert!(diff <= self.frame_count, "FIFO overfull");
        diff
    }

    #[inline]
    fn slot(&self, index: u32) -> usize {
        (index & (self.frame_count_p2 - 1)) as usize
    }

    #[inline]
    fn base_ptr(&self) -> *mut T {
        UnsafeCell::raw_get(self.buffer.as_ptr())
    }
}

/// A FIFO that has been created but not yet handed to its two threads
pub struct Fifo<T> {
    writer: FifoWriter<T>,
    reader: FifoReader<T>,
}

impl<T: Copy + Default + Send> Fifo<T> {
    /// Create a FIFO of `frame_capacity` frames with `channels` samples per frame
    ///
    /// The backing store is allocated here and released when both halves are
    /// dropped.
    ///
    /// # Example
    /// ```
    /// use loopback_core::audio::fifo::Fifo;
    ///
    /// let (mut writer, mut reader) = Fifo::<i16>::new(8, 1).unwrap().split();
    /// assert_eq!(writer.write(&[1, 2, 3]), 3);
    ///
    /// let mut out = [0i16; 8];
    /// assert_eq!(reader.read(&mut out), 3);
    /// assert_eq!(&out[..3], &[1, 2, 3]);
    /// ```
    pub fn new(frame_capacity: usize, channels: usize) -> Result<Self, FifoError> {
        let samples = validate(frame_capacity, channels)?;
        Self::with_storage(frame_capacity, channels, vec![T::default(); samples])
    }
}

impl<T: Copy + Send> Fifo<T> {
    /// Create a FIFO over caller-allocated storage
    ///
    /// `storage` must hold at least `frame_capacity * channels` samples; any
    /// excess is ignored.
    pub fn with_storage(
        frame_capacity: usize,
        channels: usize,
        storage: Vec<T>,
    ) -> Result<Self, FifoError> {
        build(frame_capacity, channels, storage)
    }

    /// Separate the producer and consumer halves
    pub fn split(self) -> (FifoWriter<T>, FifoReader<T>) {
        (self.writer, self.reader)
    }
}

/// Check the geometry and return the number of samples it needs
fn validate(frame_capacity: usize, channels: usize) -> Result<usize, FifoError> {
    if frame_capacity == 0 || frame_capacity > MAX_FRAME_CAPACITY {
        return Err(FifoError::InvalidCapacity {
            requested: frame_capacity,
            max: MAX_FRAME_CAPACITY,
        });
    }
    if channels == 0 {
        return Err(FifoError::InvalidChannelCount);
    }
    frame_capacity
        .checked_mul(channels)
        .ok_or(FifoError::InvalidCapacity {
            requested: frame_capacity,
            max: MAX_FRAME_CAPACITY,
        })
}

fn build<T: Copy + Send>(
    frame_capacity: usize,
    channels: usize,
    storage: Vec<T>,
) -> Result<Fifo<T>, FifoError> {
    let required = validate(frame_capacity, channels)?;
    if storage.len() < required {
        return Err(FifoError::StorageTooSmall {
            required,
            actual: storage.len(),
        });
    }

    let mut storage = storage;
    storage.truncate(required);
    let raw = Box::into_raw(storage.into_boxed_slice()) as *mut [UnsafeCell<T>];
    // SAFETY: UnsafeCell<T> is repr(transparent) over T, so the slice layout
    // and the allocation are identical.
    let buffer = unsafe { Box::from_raw(raw) };

    let frame_count = frame_capacity as u32;
    let frame_count_p2 = frame_count.next_power_of_two();
    let inner = Arc::new(Inner {
        frame_count,
        frame_count_p2,
        fudge_factor: frame_count_p2 - frame_count,
        channels,
        buffer,
        front: CacheAligned(AtomicU32::new(0)),
        rear: CacheAligned(AtomicU32::new(0)),
    });

    Ok(Fifo {
        writer: FifoWriter {
            inner: Arc::clone(&inner),
        },
        reader: FifoReader { inner },
    })
}

/// Producer half of the FIFO
///
/// Owned by exactly one thread at a time; all operations take `&mut self`.
pub struct FifoWriter<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Copy> FifoWriter<T> {
    /// Write as many whole frames of `frames` as fit
    ///
    /// `frames` is interleaved; a trailing partial frame is ignored.
    /// Returns the number of frames written, which is less than requested
    /// (possibly zero) when the FIFO is (almost) full.
    pub fn write(&mut self, frames: &[T]) -> usize {
        let inner = &*self.inner;
        let channels = inner.channels;
        let front = inner.front.0.load(Ordering::Acquire);
        let rear = inner.rear.0.load(Ordering::Relaxed);

        let avail = (inner.frame_count - inner.diff(rear, front)) as usize;
        let count = avail.min(frames.len() / channels);
        if count == 0 {
            return 0;
        }

        let pos = inner.slot(rear);
        let part1 = (inner.frame_count as usize - pos).min(count);
        let part2 = count - part1;
        let base = inner.base_ptr();
        // SAFETY: slots [pos, pos + part1) and [0, part2) are free: the reader
        // never touches them until `rear` is published below, and both ranges
        // lie inside the buffer because count <= free space <= frame_count.
        unsafe {
            ptr::copy_nonoverlapping(frames.as_ptr(), base.add(pos * channels), part1 * channels);
            if part2 > 0 {
                ptr::copy_nonoverlapping(
                    frames.as_ptr().add(part1 * channels),
                    base,
                    part2 * channels,
                );
            }
        }

        inner
            .rear
            .0
            .store(inner.sum(rear, count as u32), Ordering::Release);
        count
    }

    /// Number of frames that can currently be written
    pub fn avail_to_write(&self) -> usize {
        let front = self.inner.front.0.load(Ordering::Acquire);
        let rear = self.inner.rear.0.load(Ordering::Relaxed);
        (self.inner.frame_count - self.inner.diff(rear, front)) as usize
    }

    /// Logical capacity in frames
    pub fn capacity(&self) -> usize {
        self.inner.frame_count as usize
    }

    /// Samples per frame
    pub fn channel_count(&self) -> usize {
        self.inner.channels
    }
}

/// Consumer half of the FIFO
///
/// Owned by exactly one thread at a time; all operations take `&mut self`.
pub struct FifoReader<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Copy> FifoReader<T> {
    /// Read up to `buffer.len() / channels` frames into `buffer`
    ///
    /// Returns the number of frames read, which is less than requested
    /// (possibly zero) when the FIFO is (almost) empty. Samples of
    /// `buffer` past the frames read are left untouched.
    pub fn read(&mut self, buffer: &mut [T]) -> usize {
        let inner = &*self.inner;
        let channels = inner.channels;
        let rear = inner.rear.0.load(Ordering::Acquire);
        let front = inner.front.0.load(Ordering::Relaxed);

        let avail = inner.diff(rear, front) as usize;
        let count = avail.min(buffer.len() / channels);
        if count == 0 {
            return 0;
        }

        let pos = inner.slot(front);
        let part1 = (inner.frame_count as usize - pos).min(count);
        let part2 = count - part1;
        let base = inner.base_ptr();
        // SAFETY: slots [pos, pos + part1) and [0, part2) hold published
        // frames; the writer does not reuse them until `front` moves past.
        unsafe {
            ptr::copy_nonoverlapping(base.add(pos * channels), buffer.as_mut_ptr(), part1 * channels);
            if part2 > 0 {
                ptr::copy_nonoverlapping(
                    base,
                    buffer.as_mut_ptr().add(part1 * channels),
                    part2 * channels,
                );
            }
        }

        inner
            .front
            .0
            .store(inner.sum(front, count as u32), Ordering::Release);
        count
    }

    /// Drop up to `max_frames` of the oldest frames without copying them
    pub fn skip(&mut self, max_frames: usize) -> usize {
        let inner = &*self.inner;
        let rear = inner.rear.0.load(Ordering::Acquire);
        let front = inner.front.0.load(Ordering::Relaxed);
        let count = (inner.diff(rear, front) as usize).min(max_frames);
        if count > 0 {
            inner
                .front
                .0
                .store(inner.sum(front, count as u32), Ordering::Release);
        }
        count
    }

    /// Number of frames that can currently be read
    pub fn avail_to_read(&self) -> usize {
        let rear = self.inner.rear.0.load(Ordering::Acquire);
        let front = self.inner.front.0.load(Ordering::Relaxed);
        self.inner.diff(rear, front) as usize
    }

    /// Logical capacity in frames
    pub fn capacity(&self) -> usize {
        self.inner.frame_count as usize
    }

    /// Samples per frame
    pub fn channel_count(&self) -> usize {
        self.inner.channels
    }
}

impl<T> std::fmt::Debug for FifoWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoWriter")
            .field("capacity", &self.inner.frame_count)
            .field("channels", &self.inner.channels)
            .finish()
    }
}

impl<T> std::fmt::Debug for FifoReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoReader")
            .field("capacity", &self.inner.frame_count)
            .field("channels", &self.inner.channels)
            .finish()
    }
}
