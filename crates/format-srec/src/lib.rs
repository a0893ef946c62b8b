//! Decoder for Motorola-style S-record images.
//!
//! Records start with `S` (an image for the bridge itself) or `T` (an image
//! for the target machine). The decoder is a pure transition function over
//! [`DecoderState`]; [`SrecDecoder`] wraps it for streaming use and
//! [`decode`] collects a whole image.

mod decoder;

pub use decoder::{DecoderState, Event, Phase, SrecDecoder, Target, step};

use thiserror::Error;

/// Errors from [`decode`]. Record numbers count from 1.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SrecError {
    #[error("checksum mismatch in record {record}")]
    Checksum { record: usize },
    #[error("malformed record {record}")]
    BadRecord { record: usize },
    #[error("image contains no data records")]
    Empty,
}

/// A fully decoded image.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SrecImage {
    /// Data chunks in file order.
    pub chunks: Vec<(u32, Vec<u8>)>,
    /// Execution start address, if the image names one.
    pub start: Option<u32>,
    /// Target selected by the record prefix of the last data record.
    pub target: Option<Target>,
}

impl SrecImage {
    /// Total number of data bytes.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.chunks.iter().map(|(_, bytes)| bytes.len()).sum()
    }
}

/// Decode a complete image, stopping at the first bad record.
///
/// # Errors
///
/// Returns an error on a checksum mismatch, a malformed record, or an
/// image with no data records at all.
pub fn decode(text: &[u8]) -> Result<SrecImage, SrecError> {
    let mut decoder = SrecDecoder::new();
    let mut image = SrecImage::default();
    let mut record = 0;

    for &ch in text {
        let Some(event) = decoder.push(ch) else {
            continue;
        };
        record += 1;
        match event {
            Event::Data { target, addr, bytes } => {
                image.target = Some(target);
                image.chunks.push((addr, bytes));
            }
            Event::Start { addr, .. } => image.start = Some(addr),
            Event::Header { .. } | Event::Count { .. } => {}
            Event::ChecksumError => return Err(SrecError::Checksum { record }),
            Event::BadRecord => return Err(SrecError::BadRecord { record }),
        }
    }

    if image.chunks.is_empty() {
        return Err(SrecError::Empty);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn record(prefix: char, rec_type: u8, addr: u32, addr_bytes: usize, data: &[u8]) -> String {
        let mut bytes = vec![(addr_bytes + data.len() + 1) as u8];
        bytes.extend_from_slice(&addr.to_be_bytes()[4 - addr_bytes..]);
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let mut line = format!("{prefix}{rec_type}");
        for b in bytes {
            line.push_str(&format!("{b:02X}"));
        }
        line.push_str(&format!("{:02X}\r\n", !sum));
        line
    }

    #[rstest]
    #[case::s1(1, 2, 0x1234)]
    #[case::s2(2, 3, 0x12_3456)]
    #[case::s3(3, 4, 0x1234_5678)]
    fn address_width_follows_record_type(#[case] rec_type: u8, #[case] width: usize, #[case] addr: u32) {
        let text = record('S', rec_type, addr, width, &[0xAA, 0x55]);
        let image = decode(text.as_bytes()).unwrap();
        assert_eq!(image.chunks, vec![(addr, vec![0xAA, 0x55])]);
    }

    #[test]
    fn header_count_and_start_records() {
        let mut text = record('T', 0, 0, 2, b"hdr");
        text += &record('T', 1, 0x8000, 2, &[1, 2, 3]);
        text += &record('T', 5, 1, 2, &[]);
        text += &record('T', 9, 0x8000, 2, &[]);
        let image = decode(text.as_bytes()).unwrap();
        assert_eq!(image.target, Some(Target::Machine));
        assert_eq!(image.start, Some(0x8000));
        assert_eq!(image.data_len(), 3);
    }

    #[test]
    fn error_names_the_failing_record() {
        let mut text = record('S', 1, 0, 2, &[1]);
        text += "S1040000FFFF\n";
        assert_eq!(decode(text.as_bytes()), Err(SrecError::Checksum { record: 2 }));
    }

    #[test]
    fn no_data_is_an_error() {
        assert_eq!(decode(b"S9030000FC"), Err(SrecError::Empty));
    }

    proptest! {
        #[test]
        fn decodes_generated_images(
            chunks in prop::collection::vec(
                (any::<u16>(), prop::collection::vec(any::<u8>(), 1..32)),
                1..6,
            )
        ) {
            let text: String = chunks
                .iter()
                .map(|(addr, data)| record('S', 1, u32::from(*addr), 2, data))
                .collect();
            let image = decode(text.as_bytes()).unwrap();
            let expected: Vec<(u32, Vec<u8>)> =
                chunks.iter().map(|(a, d)| (u32::from(*a), d.clone())).collect();
            prop_assert_eq!(image.chunks, expected);
        }
    }
}
