//! Pixel conversions applied before publishing

/// Number of distinct 11-bit depth samples
pub const DEPTH_LEVELS: usize = 2048;

/// Depth-to-intensity lookup table, built once at startup
pub struct GammaTable {
    table: Box<[u16; DEPTH_LEVELS]>,
}

impl GammaTable {
    pub fn new() -> Self {
        let mut table = Box::new([0u16; DEPTH_LEVELS]);
        for (i, entry) in table.iter_mut().enumerate() {
            let v = (i as f32 / DEPTH_LEVELS as f32).powi(3) * 6.0;
            *entry = (v * 6.0 * 256.0) as u16;
        }
        Self { table }
    }

    /// Intensity for one sample. Values outside the 11-bit range saturate.
    pub fn intensity(&self, sample: u16) -> u16 {
        self.table[(sample as usize).min(DEPTH_LEVELS - 1)]
    }

    /// Map samples into `out` as little-endian intensities
    pub fn map_into(&self, samples: &[u16], out: &mut [u8]) {
        for (sample, dst) in samples.iter().zip(out.chunks_exact_mut(2)) {
            dst.copy_from_slice(&self.intensity(*sample).to_le_bytes());
        }
    }
}

impl Default for GammaTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Average packed RGB triples into single-channel gray
pub fn rgb_to_gray(rgb: &[u8], out: &mut [u8]) {
    for (px, dst) in rgb.chunks_exact(3).zip(out.iter_mut()) {
        *dst = ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8;
    }
}
