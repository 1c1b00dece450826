//! Fixed-point to float conversion of refilled DMA blocks.
//!
//! Wide blocks hold little-endian `i16` I/Q pairs from the 12-bit ADC and
//! are scaled by 2048. Narrow blocks hold `i8` pairs on the I channel; the
//! second byte of each pair is whatever the disabled Q channel reports.

use crate::stream_config::IqMode;
use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex32;

pub const WIDE_SCALE: f32 = 2048.0;
pub const NARROW_SCALE: f32 = 128.0;

/// Rescale `raw` into `out` and return the number of complex samples
/// written: the smaller of what `raw` holds and what `out` can take.
pub fn convert(raw: &[u8], mode: IqMode, out: &mut [Complex32]) -> usize {
    match mode {
        IqMode::Wide => convert_wide(raw, out),
        IqMode::Narrow => convert_narrow(raw, out),
    }
}

fn convert_wide(raw: &[u8], out: &mut [Complex32]) -> usize {
    let mut n = 0;
    for (pair, dst) in raw.chunks_exact(4).zip(out.iter_mut()) {
        *dst = Complex32::new(
            LittleEndian::read_i16(&pair[0..2]) as f32 / WIDE_SCALE,
            LittleEndian::read_i16(&pair[2..4]) as f32 / WIDE_SCALE,
        );
        n += 1;
    }
    n
}

fn convert_narrow(raw: &[u8], out: &mut [Complex32]) -> usize {
    let mut n = 0;
    for (pair, dst) in raw.chunks_exact(2).zip(out.iter_mut()) {
        *dst = Complex32::new(
            pair[0] as i8 as f32 / NARROW_SCALE,
            pair[1] as i8 as f32 / NARROW_SCALE,
        );
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide_bytes(samples: &[i16]) -> Vec<u8> {
        let mut raw = vec![0u8; samples.len() * 2];
        LittleEndian::write_i16_into(samples, &mut raw);
        raw
    }

    #[test]
    fn test_wide_full_scale() {
        let raw = wide_bytes(&[2048, -2048]);
        let mut out = [Complex32::new(9.0, 9.0); 1];
        assert_eq!(convert(&raw, IqMode::Wide, &mut out), 1);
        assert_eq!(out[0], Complex32::new(1.0, -1.0));
    }

    #[test]
    fn test_wide_range() {
        let raw = wide_bytes(&[i16::MAX, i16::MIN, 0, 1024]);
        let mut out = [Complex32::default(); 2];
        assert_eq!(convert(&raw, IqMode::Wide, &mut out), 2);
        assert!((out[0].re - 15.999512).abs() < 1e-6);
        assert_eq!(out[0].im, -16.0);
        assert_eq!(out[1], Complex32::new(0.0, 0.5));
    }

    #[test]
    fn test_narrow_i_only() {
        // Q byte left at zero by the disabled channel
        let raw = [0x80u8, 0x00, 0x7f, 0x00, 0x40, 0x00];
        let mut out = [Complex32::new(9.0, 9.0); 3];
        assert_eq!(convert(&raw, IqMode::Narrow, &mut out), 3);
        assert_eq!(out[0], Complex32::new(-1.0, 0.0));
        assert_eq!(out[1], Complex32::new(127.0 / 128.0, 0.0));
        assert_eq!(out[2], Complex32::new(0.5, 0.0));
        assert!(out.iter().all(|s| s.im == 0.0));
    }

    #[test]
    fn test_count_limited_by_output() {
        let raw = wide_bytes(&[1, 2, 3, 4, 5, 6]);
        let mut out = [Complex32::default(); 2];
        assert_eq!(convert(&raw, IqMode::Wide, &mut out), 2);
    }

    #[test]
    fn test_trailing_partial_sample_ignored() {
        let mut raw = wide_bytes(&[2048, 0]);
        raw.extend_from_slice(&[0x00, 0x08]);
        let mut out = [Complex32::default(); 4];
        assert_eq!(convert(&raw, IqMode::Wide, &mut out), 1);
        assert_eq!(convert(&[0x40], IqMode::Narrow, &mut out), 0);
    }
}
