//! Integration tests for the cross-boundary byte buffer
//!
//! The writer side is what the recorder callback uses; the reader side
//! plays the embedding host.

use loopback::audio::byte_buffer::{ByteBufferError, ByteBufferView, SharedByteBuffer, REAR_COUNTER_BYTES};

/// Region laid out as the host sees it: data bytes then the rear counter
fn region(words: &mut [u32]) -> ByteBufferView<'_> {
    let len = std::mem::size_of_val(words);
    // SAFETY: `words` outlives the view and is only read back through it.
    unsafe { ByteBufferView::from_raw_parts(words.as_mut_ptr() as *mut u8, len).unwrap() }
}

fn counter(words: &[u32]) -> u32 {
    words[words.len() - 1]
}

fn samples(words: &[u32]) -> Vec<i16> {
    words[..words.len() - 1]
        .iter()
        .flat_map(|w| {
            let bytes = w.to_ne_bytes();
            [
                i16::from_ne_bytes([bytes[0], bytes[1]]),
                i16::from_ne_bytes([bytes[2], bytes[3]]),
            ]
        })
        .collect()
}

#[test]
fn test_raw_region_wraparound() {
    // 8 data words = 16 mono frames
    let mut words = vec![0u32; 9];
    {
        let mut view = region(&mut words);
        assert_eq!(view.max_frames(1), 16);
        let first: Vec<i16> = (1..=12).collect();
        assert_eq!(view.write(&first, 1), 12);
        let second: Vec<i16> = (13..=20).collect();
        assert_eq!(view.write(&second, 1), 8);
    }
    assert_eq!(counter(&words), 20);

    let data = samples(&words);
    // Frames 17..=20 wrapped into slots 0..4
    assert_eq!(&data[..4], &[17, 18, 19, 20]);
    assert_eq!(&data[4..16], &(5..=16).collect::<Vec<i16>>()[..]);
}

#[test]
fn test_oversized_write_keeps_trailing_frames() {
    let mut words = vec![0u32; 5];
    {
        let mut view = region(&mut words);
        let src: Vec<i16> = (1..=11).collect();
        assert_eq!(view.write(&src, 1), 11);
    }
    assert_eq!(counter(&words), 11);
    let mut data = samples(&words);
    data.sort_unstable();
    assert_eq!(data, (4..=11).collect::<Vec<i16>>());
}

#[test]
fn test_region_validation() {
    let mut words = vec![0u32; 1];
    let len = words.len() * REAR_COUNTER_BYTES;
    // SAFETY: the region is valid; it is rejected before any access.
    let result = unsafe { ByteBufferView::from_raw_parts(words.as_mut_ptr() as *mut u8, len) };
    assert!(matches!(result, Err(ByteBufferError::TooSmall { .. })));

    // SAFETY: a null pointer is rejected before any access.
    let result = unsafe { ByteBufferView::from_raw_parts(std::ptr::null_mut(), 64) };
    assert!(matches!(result, Err(ByteBufferError::NullPointer)));
}

#[test]
fn test_shared_buffer_reader_follows_writer() {
    let shared = SharedByteBuffer::new(32, 2).unwrap();
    let mut view = SharedByteBuffer::view(&shared);
    let mut reader = SharedByteBuffer::reader(&shared);
    assert_eq!(shared.max_frames(), 32);

    let mut out = vec![0i16; 64];
    for round in 0..10i16 {
        let block: Vec<i16> = (0..20).map(|i| round * 100 + i).collect();
        view.write(&block, 2);
        assert_eq!(reader.read(&mut out), 10);
        assert_eq!(&out[..20], &block[..]);
    }
    assert_eq!(reader.overruns(), 0);
    assert_eq!(shared.rear(), 100);
}

#[test]
fn test_shared_buffer_reader_overrun() {
    let shared = SharedByteBuffer::new(32, 1).unwrap();
    let mut view = SharedByteBuffer::view(&shared);
    let mut reader = SharedByteBuffer::reader(&shared);

    let block: Vec<i16> = (0..40).collect();
    view.write(&block, 1);
    // More than a full buffer ahead: the reader skips leaving 1/32 slack
    assert_eq!(reader.avail_to_read(), 0);
    assert_eq!(reader.overruns(), 1);
    assert_eq!(reader.overrun_frames(), 9);
    assert_eq!(reader.avail_to_read(), 31);

    let mut out = vec![0i16; 31];
    assert_eq!(reader.read(&mut out), 31);
    assert_eq!(out, (9..40).collect::<Vec<i16>>());
}
