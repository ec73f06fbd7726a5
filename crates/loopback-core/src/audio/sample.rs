//! Sample format conversions
//!
//! The pipeline carries interleaved signed 16-bit samples end to end.
//! Floating point only appears at the edges: cpal streams and the
//! normalized buffers handed to non-real-time consumers.

/// Sample type used throughout the callback pipeline
pub type Sample = i16;

/// Size of one sample in bytes
pub const SAMPLE_BYTES: usize = std::mem::size_of::<Sample>();

/// Full scale of an `i16` sample (`i16::MAX + 1`)
pub const FULL_SAMPLE_SCALE: f64 = 32768.0;

/// Convert a sample to a normalized value in `[-1.0, 1.0)`
#[inline]
pub fn to_f64(sample: Sample) -> f64 {
    sample as f64 / FULL_SAMPLE_SCALE
}

/// Convert a normalized value to a sample, truncating toward zero
///
/// Values outside the representable range saturate.
#[inline]
pub fn from_f64(value: f64) -> Sample {
    (value * FULL_SAMPLE_SCALE).trunc() as Sample
}

/// Convert a cpal `f32` sample to `i16`
#[inline]
pub fn from_f32(value: f32) -> Sample {
    from_f64(value as f64)
}

/// Convert an `i16` sample to cpal `f32`
#[inline]
pub fn to_f32(sample: Sample) -> f32 {
    sample as f32 / FULL_SAMPLE_SCALE as f32
}

/// Convert a block of samples to normalized doubles
///
/// Converts `min(src.len(), dst.len())` samples and returns that count.
pub fn convert_to_f64(src: &[Sample], dst: &mut [f64]) -> usize {
    let n = src.len().min(dst.len());
    for (d, &s) in dst[..n].iter_mut().zip(&src[..n]) {
        *d = to_f64(s);
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale() {
        assert_eq!(to_f64(i16::MIN), -1.0);
        assert!(to_f64(i16::MAX) < 1.0);
        assert_eq!(to_f64(0), 0.0);
    }

    #[test]
    fn test_from_f64_truncates() {
        assert_eq!(from_f64(0.5), 16384);
        assert_eq!(from_f64(-0.5), -16384);
        // 0.8 * 32768 = 26214.4
        assert_eq!(from_f64(0.8), 26214);
        assert_eq!(from_f64(-0.8), -26214);
    }

    #[test]
    fn test_from_f64_saturates() {
        assert_eq!(from_f64(1.0), i16::MAX);
        assert_eq!(from_f64(-2.0), i16::MIN);
    }

    #[test]
    fn test_convert_block() {
        let src = [16384i16, -16384, 0];
        let mut dst = [9.0f64; 2];
        let n = convert_to_f64(&src, &mut dst);
        assert_eq!(n, 2);
        assert_eq!(dst, [0.5, -0.5]);
    }
}
