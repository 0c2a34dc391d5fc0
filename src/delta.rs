/// Delta filter decoder: every output byte is the running sum, at a
/// fixed byte distance, of the filtered input.
///
/// The ring holds the running sums for the `distance` byte lanes; the
/// cursor walks it one byte at a time and wraps the way the LZMA
/// window wraps its copy position, so chunked and one-shot decodes
/// agree byte for byte.
#[derive(Debug, Clone)]
pub(crate) struct DeltaDecoder {
    /// Ring cursor, the lane of the next byte.
    cursor: usize,
    /// Byte distance, 1 to 256.
    distance: usize,
    /// Per-lane running sums, zero initially.
    ring: [u8; 256],
}

impl DeltaDecoder {
    /// Constructor. The distance is clamped into `1..=256`.
    pub fn new(distance: usize) -> Self {
        Self {
            cursor: 0,
            distance: distance.clamp(1, 256),
            ring: [0; 256],
        }
    }

    /// Undo the filter in place: add each input byte onto its lane's
    /// running sum and emit the sum.
    pub fn apply(&mut self, data: &mut [u8]) {
        debug_assert!(self.cursor < self.distance);
        for byte in data.iter_mut() {
            let sum = self.ring[self.cursor].wrapping_add(*byte);
            self.ring[self.cursor] = sum;
            *byte = sum;
            self.cursor += 1;
            if self.cursor == self.distance {
                self.cursor = 0;
            }
        }
    }
}

/// Undoes the Delta filter in place. `distance` is clamped into
/// `1..=256`; the XZ property byte stores `distance - 1`.
pub fn decode_delta(data: &mut [u8], distance: usize) {
    DeltaDecoder::new(distance).apply(data);
}
