//! Cross-boundary byte buffer
//!
//! The glitch test streams every recorded frame into a byte region owned by
//! the host (for example a buffer allocated by another runtime and passed in
//! as a raw pointer). The region layout is:
//!
//! ```text
//! [ data section: len - 4 bytes of interleaved i16 frames ][ rear: u32 ]
//! ```
//!
//! The writer side is lossy: there is no front counter, so a slow host
//! simply misses frames. The rear counter counts frames, wraps at 2^32 and
//! is stored with sequentially consistent ordering since the host side may
//! use any load ordering it likes.

use super::sample::{Sample, SAMPLE_BYTES};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Size of the trailing rear counter in bytes
pub const REAR_COUNTER_BYTES: usize = std::mem::size_of::<u32>();

/// Errors that can occur while wrapping a byte region
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ByteBufferError {
    #[error("byte region of {len} bytes leaves no room for data before the rear counter")]
    TooSmall { len: usize },

    #[error("rear counter at offset {offset} is not 4-byte aligned")]
    MisalignedCounter { offset: usize },

    #[error("byte region pointer is null")]
    NullPointer,

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(usize),
}

/// Number of whole frames the data section can hold, rounded down to a power of two
///
/// Returns 0 when not even one frame fits.
pub fn max_frames(data_len: usize, frame_bytes: usize) -> usize {
    if frame_bytes == 0 {
        return 0;
    }
    let frames = data_len / frame_bytes;
    if frames == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - frames.leading_zeros())
    }
}

/// Non-owned writer view over an externally owned byte region
///
/// The lifetime `'a` ties the view to whoever owns the region. A view built
/// with [`ByteBufferView::from_raw_parts`] gets whatever lifetime the caller
/// picks, so the caller must keep the region alive and otherwise untouched
/// (apart from reads) until the view is dropped. A view built from a
/// [`SharedByteBuffer`] keeps the allocation alive by itself.
pub struct ByteBufferView<'a> {
    base: NonNull<u8>,
    len: usize,
    owner: Option<Arc<SharedByteBuffer>>,
    _region: PhantomData<&'a mut [u8]>,
}

// The view is the only writer of the region; readers on other threads only
// load the counter and copy data out.
unsafe impl Send for ByteBufferView<'_> {}

impl<'a> ByteBufferView<'a> {
    /// Wrap a raw region of `len` bytes starting at `base`
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for the
    /// whole lifetime `'a`, and nothing but this view may write to it during
    /// that time.
    pub unsafe fn from_raw_parts(base: *mut u8, len: usize) -> Result<Self, ByteBufferError> {
        let base = NonNull::new(base).ok_or(ByteBufferError::NullPointer)?;
        Self::checked(base, len, None)
    }

    fn checked(
        base: NonNull<u8>,
        len: usize,
        owner: Option<Arc<SharedByteBuffer>>,
    ) -> Result<Self, ByteBufferError> {
        if len <= REAR_COUNTER_BYTES {
            return Err(ByteBufferError::TooSmall { len });
        }
        let offset = len - REAR_COUNTER_BYTES;
        if (base.as_ptr() as usize + offset) % std::mem::align_of::<AtomicU32>() != 0 {
            return Err(ByteBufferError::MisalignedCounter { offset });
        }
        Ok(Self {
            base,
            len,
            owner,
            _region: PhantomData,
        })
    }

    /// Total region size in bytes, counter included
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: a view covers at least the counter and one data byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Size of the data section in bytes
    pub fn data_len(&self) -> usize {
        self.len - REAR_COUNTER_BYTES
    }

    /// Frames the data section holds for `channels` samples per frame
    pub fn max_frames(&self, channels: usize) -> usize {
        max_frames(self.data_len(), channels * SAMPLE_BYTES)
    }

    /// Current rear counter in frames
    pub fn rear(&self) -> u32 {
        self.counter().load(Ordering::SeqCst)
    }

    fn counter(&self) -> &AtomicU32 {
        // SAFETY: alignment and bounds were checked on construction and the
        // region outlives `self`.
        unsafe { &*(self.base.as_ptr().add(self.data_len()) as *const AtomicU32) }
    }

    /// Append `src` (interleaved, `channels` samples per frame) to the region
    ///
    /// Always returns the number of whole frames in `src` and advances the
    /// rear counter by that amount, even if the data section cannot hold them
    /// all; only the most recent `max_frames` frames are then stored.
    pub fn write(&mut self, src: &[Sample], channels: usize) -> usize {
        assert!(channels > 0, "byte buffer write with zero channels");
        let frame_count = src.len() / channels;
        let frame_bytes = channels * SAMPLE_BYTES;
        let max_frames = self.max_frames(channels);

        let counter = self.counter();
        let rear = counter.load(Ordering::Relaxed);

        if frame_count > 0 && max_frames > 0 {
            let skipped = frame_count.saturating_sub(max_frames);
            let copied = frame_count - skipped;
            let start = (rear.wrapping_add(skipped as u32) as usize) & (max_frames - 1);
            let part1 = (max_frames - start).min(copied);
            let part2 = copied - part1;

            let src_bytes = src[skipped * channels..].as_ptr() as *const u8;
            let base = self.base.as_ptr();
            // SAFETY: both segments end at or before max_frames * frame_bytes,
            // which never exceeds the data section.
            unsafe {
                ptr::copy_nonoverlapping(src_bytes, base.add(start * frame_bytes), part1 * frame_bytes);
                if part2 > 0 {
                    ptr::copy_nonoverlapping(
                        src_bytes.add(part1 * frame_bytes),
                        base,
                        part2 * frame_bytes,
                    );
                }
            }
        }

        counter.store(rear.wrapping_add(frame_count as u32), Ordering::SeqCst);
        frame_count
    }
}

impl std::fmt::Debug for ByteBufferView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBufferView")
            .field("len", &self.len)
            .field("rear", &self.rear())
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

/// Host-side allocation of a cross-boundary region
///
/// The data section is rounded up to a power-of-two number of frames and
/// followed by the rear counter. Backed by 32-bit words so the counter is
/// always aligned.
pub struct SharedByteBuffer {
    words: Box<[AtomicU32]>,
    channels: usize,
}

impl SharedByteBuffer {
    /// Allocate room for at least `frames` frames of `channels` samples
    pub fn new(frames: usize, channels: usize) -> Result<Arc<Self>, ByteBufferError> {
        if channels == 0 {
            return Err(ByteBufferError::InvalidChannelCount(channels));
        }
        let frames = frames.max(1).next_power_of_two();
        let data_bytes = frames * channels * SAMPLE_BYTES;
        let words = data_bytes.div_ceil(REAR_COUNTER_BYTES) + 1;
        let words = (0..words).map(|_| AtomicU32::new(0)).collect();

        tracing::debug!(frames, channels, data_bytes, "Allocated shared byte buffer");
        Ok(Arc::new(Self { words, channels }))
    }

    /// Total size in bytes, counter included
    pub fn len(&self) -> usize {
        self.words.len() * REAR_COUNTER_BYTES
    }

    /// Always false: the allocation holds at least the counter and one frame
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Samples per frame this buffer was sized for
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Frames the data section holds
    pub fn max_frames(&self) -> usize {
        max_frames(self.len() - REAR_COUNTER_BYTES, self.channels * SAMPLE_BYTES)
    }

    /// Current rear counter in frames
    pub fn rear(&self) -> u32 {
        self.words[self.words.len() - 1].load(Ordering::SeqCst)
    }

    /// Writer view that keeps this allocation alive
    pub fn view(this: &Arc<Self>) -> ByteBufferView<'static> {
        let base = this.base_ptr();
        // Sizes are at least 8 bytes and the counter is the last word.
        ByteBufferView {
            base,
            len: this.len(),
            owner: Some(Arc::clone(this)),
            _region: PhantomData,
        }
    }

    /// Reader that tracks its own position in this buffer
    pub fn reader(this: &Arc<Self>) -> ByteBufferReader {
        ByteBufferReader {
            buffer: Arc::clone(this),
            front: 0,
            overruns: 0,
            overrun_frames: 0,
        }
    }

    fn base_ptr(&self) -> NonNull<u8> {
        // SAFETY: a boxed slice pointer is never null; AtomicU32 wraps an
        // UnsafeCell so writing through it is permitted.
        unsafe { NonNull::new_unchecked(self.words.as_ptr() as *mut u8) }
    }
}

/// Host-side reader of a [`SharedByteBuffer`]
///
/// Keeps its own front position. If the writer gets more than a full buffer
/// ahead, the reader jumps forward leaving 1/32 of the capacity as slack
/// and records the overrun.
pub struct ByteBufferReader {
    buffer: Arc<SharedByteBuffer>,
    front: u32,
    overruns: u64,
    overrun_frames: u64,
}

impl ByteBufferReader {
    /// Frames available to read
    ///
    /// Repositions the reader (and returns 0) when an overrun is detected.
    pub fn avail_to_read(&mut self) -> usize {
        let rear = self.buffer.rear();
        self.available(rear)
    }

    fn available(&mut self, rear: u32) -> usize {
        let capacity = self.buffer.max_frames() as u32;
        let avail = rear.wrapping_sub(self.front);
        if avail > capacity {
            let front = rear.wrapping_sub(capacity).wrapping_add(capacity >> 5);
            self.overrun_frames += front.wrapping_sub(self.front) as u64;
            self.overruns += 1;
            self.front = front;
            return 0;
        }
        avail as usize
    }

    /// Read up to `out.len() / channels` frames
    ///
    /// Returns the number of frames copied into `out`; 0 when nothing is
    /// available or an overrun was just detected.
    pub fn read(&mut self, out: &mut [Sample]) -> usize {
        let channels = self.buffer.channels;
        let rear = self.buffer.rear();
        let count = self.available(rear).min(out.len() / channels);
        if count == 0 {
            return 0;
        }

        let capacity = self.buffer.max_frames();
        let base = self.buffer.base_ptr().as_ptr() as *const Sample;
        let start = self.front as usize & (capacity - 1);
        for (i, frame) in out.chunks_exact_mut(channels).take(count).enumerate() {
            let slot = (start + i) & (capacity - 1);
            for (ch, sample) in frame.iter_mut().enumerate() {
                // SAFETY: slot < capacity, so the sample lies in the data
                // section; volatile because the writer may be active.
                *sample = unsafe { ptr::read_volatile(base.add(slot * channels + ch)) };
            }
        }

        self.front = self.front.wrapping_add(count as u32);
        count
    }

    /// Number of overruns detected so far
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Frames skipped because of overruns
    pub fn overrun_frames(&self) -> u64 {
        self.overrun_frames
    }
}
