//! Self-describing frame record
//!
//! ```text
//! class=Mat
//! cols=640
//! rows=480
//! step=1280
//! type=3
//! data=<614400|<payload bytes>
//! ```

use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::capture::frame::{ElementType, FrameMode};

pub const CLASS_TAG: &str = "Mat";

const DATA_MARKER: &[u8] = b"data=<";

/// Upper bound on header size: five short lines plus the data marker
const HEADER_CAPACITY: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record ended inside the header")]
    TruncatedHeader,
    #[error("expected header key `{expected}`")]
    UnexpectedKey { expected: &'static str },
    #[error("header `{key}` has a non-numeric value")]
    BadNumber { key: &'static str },
    #[error("unknown element type code {0}")]
    UnknownType(u32),
    #[error("payload declares {declared} bytes but {available} follow")]
    PayloadLength { declared: usize, available: usize },
    #[error("payload of {payload} bytes does not match mode ({expected} bytes)")]
    ModeMismatch { payload: usize, expected: usize },
}

/// Serialises frames into records, reusing one scratch buffer
pub struct RecordEncoder {
    scratch: BytesMut,
}

impl RecordEncoder {
    /// Encoder whose scratch buffer fits records of `mode` without growing
    pub fn for_mode(mode: &FrameMode) -> Self {
        Self {
            scratch: BytesMut::with_capacity(HEADER_CAPACITY + mode.payload_len()),
        }
    }

    /// Encode a byte payload laid out per `mode`
    pub fn encode(&mut self, mode: &FrameMode, payload: &[u8]) -> Result<&[u8], RecordError> {
        check_len(mode, payload.len())?;
        self.begin(mode, payload.len());
        self.scratch.put_slice(payload);
        Ok(&self.scratch[..])
    }

    /// Encode 16-bit samples, written little-endian
    pub fn encode_samples(
        &mut self,
        mode: &FrameMode,
        samples: &[u16],
    ) -> Result<&[u8], RecordError> {
        let len = samples.len() * 2;
        check_len(mode, len)?;
        self.begin(mode, len);
        for &sample in samples {
            self.scratch.put_u16_le(sample);
        }
        Ok(&self.scratch[..])
    }

    fn begin(&mut self, mode: &FrameMode, payload_len: usize) {
        use std::fmt::Write;

        self.scratch.clear();
        // Writing into BytesMut only fails on allocation failure, which aborts.
        let _ = write!(
            self.scratch,
            "class={}\ncols={}\nrows={}\nstep={}\ntype={}\ndata=<{}|",
            CLASS_TAG,
            mode.width,
            mode.height,
            mode.step(),
            mode.element.code(),
            payload_len
        );
    }
}

fn check_len(mode: &FrameMode, payload: usize) -> Result<(), RecordError> {
    let expected = mode.payload_len();
    if payload != expected {
        return Err(RecordError::ModeMismatch { payload, expected });
    }
    Ok(())
}

/// A parsed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub class: String,
    pub cols: u32,
    pub rows: u32,
    pub step: usize,
    pub element: ElementType,
    pub payload: Bytes,
}

impl WireRecord {
    pub fn parse(input: &[u8]) -> Result<Self, RecordError> {
        let mut rest = input;

        let class = take_line(&mut rest, "class")?;
        let class = std::str::from_utf8(class)
            .map_err(|_| RecordError::BadNumber { key: "class" })?
            .to_owned();
        let cols = parse_num(take_line(&mut rest, "cols")?, "cols")?;
        let rows = parse_num(take_line(&mut rest, "rows")?, "rows")?;
        let step = parse_num(take_line(&mut rest, "step")?, "step")?;
        let code: u32 = parse_num(take_line(&mut rest, "type")?, "type")?;
        let element = ElementType::from_code(code).ok_or(RecordError::UnknownType(code))?;

        rest = rest
            .strip_prefix(DATA_MARKER)
            .ok_or(if rest.len() < DATA_MARKER.len() {
                RecordError::TruncatedHeader
            } else {
                RecordError::UnexpectedKey { expected: "data" }
            })?;
        let bar = rest
            .iter()
            .position(|&b| b == b'|')
            .ok_or(RecordError::TruncatedHeader)?;
        let declared: usize = parse_num(&rest[..bar], "data")?;
        let payload = &rest[bar + 1..];
        if payload.len() != declared {
            return Err(RecordError::PayloadLength {
                declared,
                available: payload.len(),
            });
        }

        Ok(Self {
            class,
            cols,
            rows,
            step,
            element,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn mode(&self) -> FrameMode {
        FrameMode {
            width: self.cols,
            height: self.rows,
            element: self.element,
        }
    }

    /// Payload reinterpreted as little-endian 16-bit samples
    pub fn samples(&self) -> Vec<u16> {
        self.payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

fn take_line<'a>(rest: &mut &'a [u8], key: &'static str) -> Result<&'a [u8], RecordError> {
    let nl = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(RecordError::TruncatedHeader)?;
    let line = &rest[..nl];
    let value = line
        .strip_prefix(key.as_bytes())
        .and_then(|v| v.strip_prefix(b"="))
        .ok_or(RecordError::UnexpectedKey { expected: key })?;
    *rest = &rest[nl + 1..];
    Ok(value)
}

fn parse_num<T: FromStr>(value: &[u8], key: &'static str) -> Result<T, RecordError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RecordError::BadNumber { key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::Resolution;

    #[test]
    fn depth_record_header_is_exact() {
        let mode = FrameMode::new(2, 2, ElementType::Depth16S).unwrap();
        let mut encoder = RecordEncoder::for_mode(&mode);
        let record = encoder
            .encode_samples(&mode, &[1, 0x0102, 2047, 0])
            .unwrap()
            .to_vec();

        let mut expected = b"class=Mat\ncols=2\nrows=2\nstep=4\ntype=3\ndata=<8|".to_vec();
        expected.extend_from_slice(&[1, 0, 2, 1, 0xff, 0x07, 0, 0]);
        assert_eq!(record, expected);
    }

    #[test]
    fn parse_recovers_metadata_and_payload() {
        let cases = [
            (FrameMode::new(3, 1, ElementType::Rgb8).unwrap(), 1u8),
            (FrameMode::new(5, 7, ElementType::Gray8).unwrap(), 9),
            (FrameMode::color(Resolution::Low).unwrap(), 200),
        ];
        for (mode, seed) in cases {
            let payload: Vec<u8> = (0..mode.payload_len())
                .map(|i| (i as u8).wrapping_mul(seed))
                .collect();
            let mut encoder = RecordEncoder::for_mode(&mode);
            let bytes = encoder.encode(&mode, &payload).unwrap().to_vec();

            let record = WireRecord::parse(&bytes).unwrap();
            assert_eq!(record.class, CLASS_TAG);
            assert_eq!(record.mode(), mode);
            assert_eq!(record.step, mode.step());
            assert_eq!(&record.payload[..], &payload[..]);
        }
    }

    #[test]
    fn payload_may_contain_header_bytes() {
        let mode = FrameMode::new(4, 1, ElementType::Gray8).unwrap();
        let mut encoder = RecordEncoder::for_mode(&mode);
        let bytes = encoder.encode(&mode, b"|\n=<").unwrap().to_vec();
        assert_eq!(&WireRecord::parse(&bytes).unwrap().payload[..], b"|\n=<");
    }

    #[test]
    fn samples_survive_encoding() {
        let mode = FrameMode::new(3, 1, ElementType::Depth16S).unwrap();
        let mut encoder = RecordEncoder::for_mode(&mode);
        let bytes = encoder.encode_samples(&mode, &[0, 1023, 2047]).unwrap().to_vec();
        assert_eq!(WireRecord::parse(&bytes).unwrap().samples(), vec![0, 1023, 2047]);
    }

    #[test]
    fn mismatched_payload_is_refused() {
        let mode = FrameMode::new(2, 2, ElementType::Rgb8).unwrap();
        let mut encoder = RecordEncoder::for_mode(&mode);
        assert_eq!(
            encoder.encode(&mode, &[0; 5]).unwrap_err(),
            RecordError::ModeMismatch {
                payload: 5,
                expected: 12
            }
        );
    }

    #[test]
    fn short_payload_is_detected() {
        let mode = FrameMode::new(2, 1, ElementType::Gray8).unwrap();
        let mut encoder = RecordEncoder::for_mode(&mode);
        let bytes = encoder.encode(&mode, &[7, 8]).unwrap().to_vec();
        assert_eq!(
            WireRecord::parse(&bytes[..bytes.len() - 1]).unwrap_err(),
            RecordError::PayloadLength {
                declared: 2,
                available: 1
            }
        );
    }

    #[test]
    fn truncated_and_garbled_headers_are_detected() {
        assert_eq!(
            WireRecord::parse(b"class=Mat\ncols=").unwrap_err(),
            RecordError::TruncatedHeader
        );
        assert_eq!(
            WireRecord::parse(b"class=Mat\nrows=1\n").unwrap_err(),
            RecordError::UnexpectedKey { expected: "cols" }
        );
        assert_eq!(
            WireRecord::parse(b"class=Mat\ncols=x\n").unwrap_err(),
            RecordError::BadNumber { key: "cols" }
        );
        assert_eq!(
            WireRecord::parse(b"class=Mat\ncols=1\nrows=1\nstep=1\ntype=9\n").unwrap_err(),
            RecordError::UnknownType(9)
        );
        assert_eq!(WireRecord::parse(b"").unwrap_err(), RecordError::TruncatedHeader);
    }

    #[test]
    fn oversized_header_values_are_rejected() {
        assert_eq!(
            WireRecord::parse(b"class=Mat\ncols=4294967298\nrows=1\nstep=2\ntype=3\ndata=<0|")
                .unwrap_err(),
            RecordError::BadNumber { key: "cols" }
        );
        assert_eq!(
            WireRecord::parse(b"class=Mat\ncols=1\nrows=1\nstep=2\ntype=4294967299\ndata=<0|")
                .unwrap_err(),
            RecordError::BadNumber { key: "type" }
        );
    }
}
