//! netascii line-ending normalization
//!
//! A netascii sender encodes a bare carriage return as CR NUL and a line end
//! as CR LF. On the way in both pairs are collapsed:
//!
//! - CR NUL becomes CR
//! - CR LF becomes LF
//!
//! Collapsing is applied until neither pair remains, so the result never
//! contains CR NUL or CR LF and normalizing twice changes nothing.

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;

/// Normalize a complete netascii buffer
///
/// # Examples
/// ```
/// use tftp::netascii::normalize;
///
/// assert_eq!(normalize(b"one\r\ntwo\r\0three"), b"one\ntwo\rthree");
/// ```
pub fn normalize(data: &[u8]) -> Vec<u8> {
    let mut decoder = NetasciiDecoder::new();
    let mut out = Vec::with_capacity(data.len());
    decoder.decode(data, &mut out);
    decoder.finish(&mut out);
    out
}

/// Streaming netascii decoder
///
/// Carriage returns at the end of a chunk are held back until the next chunk
/// shows whether a NUL or LF follows them, so a pair split across two DATA
/// packets is still collapsed. Call [`finish`](Self::finish) once the last
/// chunk has been decoded.
#[derive(Debug, Default)]
pub struct NetasciiDecoder {
    pending_cr: usize,
}

impl NetasciiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk, appending the settled bytes to `out`
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            match byte {
                CR => self.pending_cr += 1,
                // CR NUL -> CR, and the CR stays pending
                NUL if self.pending_cr > 0 => {}
                // CR LF -> LF; the LF then absorbs every CR before it
                LF if self.pending_cr > 0 => {
                    self.pending_cr = 0;
                    out.push(LF);
                }
                _ => {
                    self.flush_pending(out);
                    out.push(byte);
                }
            }
        }
    }

    /// Emit any carriage returns still held back
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        self.flush_pending(out);
    }

    /// Whether carriage returns are held back awaiting the next chunk
    pub fn has_pending(&self) -> bool {
        self.pending_cr > 0
    }

    fn flush_pending(&mut self, out: &mut Vec<u8>) {
        out.extend(std::iter::repeat_n(CR, self.pending_cr));
        self.pending_cr = 0;
    }
}
