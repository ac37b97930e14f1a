//! Zero-copy, single-pass decoder for Teltonika Codec 8 / Codec 8E AVL frames.
//!
//! The decoder is a pure function: bytes in, [`DecodedPacket`] or
//! [`DecodeError`] out. It never retains a reference to its input past the
//! call and never reads past the end of the slice it was given.

mod crc;
mod reader;

pub use crc::crc16_ibm;
use reader::ByteReader;

use crate::model::{GpsFix, Priority};

const PREAMBLE: u32 = 0x0000_0000;
const CODEC_8: u8 = 0x08;
const CODEC_8E: u8 = 0x8E;

/// NX ids whose payload is interpreted as a NUL-stripped ASCII string.
const TEXT_NX_IDS: [u16; 3] = [256, 281, 385];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of frame at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("invalid preamble at offset {offset}")]
    InvalidPreamble { offset: usize },
    #[error("unknown codec id 0x{codec_id:02X} at offset {offset}")]
    UnknownCodec { codec_id: u8, offset: usize },
    #[error("numberOfData1 ({first}) != numberOfData2 ({second}) at offset {offset}")]
    RecordCountMismatch { first: u8, second: u8, offset: usize },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnexpectedEof { offset }
            | DecodeError::InvalidPreamble { offset }
            | DecodeError::UnknownCodec { offset, .. }
            | DecodeError::RecordCountMismatch { offset, .. } => *offset,
        }
    }
}

/// Codec 8 uses 1-byte IO ids/counts; Codec 8E widens both to 2 bytes and adds the NX group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecVariant {
    Standard,
    Extended,
}

impl CodecVariant {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            CODEC_8 => Some(CodecVariant::Standard),
            CODEC_8E => Some(CodecVariant::Extended),
            _ => None,
        }
    }

    /// Byte width of an IO element id and of a per-width-group count field.
    fn id_and_count_width(self) -> usize {
        match self {
            CodecVariant::Standard => 1,
            CodecVariant::Extended => 2,
        }
    }
}

/// A single decoded IO element, still in wire-native form (pre-normalization).
#[derive(Debug, Clone)]
pub struct IoElementRaw {
    pub id: u16,
    pub value: IoValueRaw,
}

#[derive(Debug, Clone)]
pub enum IoValueRaw {
    Unsigned { value: u64, width: u8 },
    Text(String),
    Hex(String),
}

/// One decoded AVL record, prior to IO-table normalization.
#[derive(Debug, Clone)]
pub struct AvlRecordRaw {
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub gps: GpsFix,
    pub trigger_event_id: u16,
    pub io_elements: Vec<IoElementRaw>,
}

/// A fully decoded AVL frame.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub codec: CodecVariant,
    pub records: Vec<AvlRecordRaw>,
    pub number_of_data: u8,
    pub crc16_trailer: u32,
    pub crc16_computed: u16,
}

/// Decodes one whole frame of bytes.
///
/// `input` must contain exactly one frame (preamble through the trailing
/// CRC field). Framing/accumulation across TCP reads is the session
/// layer's job, not the codec's.
pub fn decode(input: &[u8]) -> Result<DecodedPacket, DecodeError> {
    let mut reader = ByteReader::new(input);

    let preamble = reader.u32()?;
    if preamble != PREAMBLE {
        return Err(DecodeError::InvalidPreamble { offset: 0 });
    }

    let data_field_length = reader.u32()? as usize;
    let payload_start = reader.offset();

    let codec_id = reader.u8()?;
    let codec = CodecVariant::from_id(codec_id).ok_or(DecodeError::UnknownCodec {
        codec_id,
        offset: payload_start,
    })?;

    let number_of_data1 = reader.u8()?;

    let mut records = Vec::with_capacity(number_of_data1 as usize);
    for _ in 0..number_of_data1 {
        records.push(decode_record(&mut reader, codec)?);
    }

    let number_of_data2 = reader.u8()?;
    if number_of_data1 != number_of_data2 {
        return Err(DecodeError::RecordCountMismatch {
            first: number_of_data1,
            second: number_of_data2,
            offset: reader.offset() - 1,
        });
    }

    let payload_end = reader.offset();
    let crc16_computed = crc16_ibm(&input[payload_start..payload_end]);

    let crc16_trailer = reader.u32()?;

    let _ = data_field_length; // validated implicitly by the caller's framing slice length.

    Ok(DecodedPacket {
        codec,
        records,
        number_of_data: number_of_data1,
        crc16_trailer,
        crc16_computed,
    })
}

fn decode_record(reader: &mut ByteReader, codec: CodecVariant) -> Result<AvlRecordRaw, DecodeError> {
    let timestamp_ms = reader.u64()?;
    let priority = Priority::from_raw(reader.u8()?);

    let longitude = reader.u32()? as i32 as f64 / 10_000_000.0;
    let latitude = reader.u32()? as i32 as f64 / 10_000_000.0;
    let altitude = reader.u16()? as i16;
    let angle = reader.u16()?;
    let satellites = reader.u8()?;
    let speed = reader.u16()?;

    let gps = GpsFix {
        latitude,
        longitude,
        altitude,
        angle,
        satellites,
        speed,
    };

    let idw = codec.id_and_count_width();
    let trigger_event_id = reader.uint(idw)? as u16;
    let _total_io_count = reader.uint(idw)?;

    let mut io_elements = Vec::new();
    for width in [1usize, 2, 4, 8] {
        let count = reader.uint(idw)?;
        for _ in 0..count {
            let id = reader.uint(idw)? as u16;
            let value = reader.uint(width)?;
            io_elements.push(IoElementRaw {
                id,
                value: IoValueRaw::Unsigned {
                    value,
                    width: width as u8,
                },
            });
        }
    }

    if codec == CodecVariant::Extended {
        let nx_count = reader.uint(idw)?;
        for _ in 0..nx_count {
            let id = reader.u16()?;
            let length = reader.u16()? as usize;
            let payload = reader.bytes(length)?;
            let value = if TEXT_NX_IDS.contains(&id) {
                let text = payload
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect::<String>();
                IoValueRaw::Text(text)
            } else {
                IoValueRaw::Hex(hex_encode(payload))
            };
            io_elements.push(IoElementRaw { id, value });
        }
    }

    Ok(AvlRecordRaw {
        timestamp_ms,
        priority,
        gps,
        trigger_event_id,
        io_elements,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FrameBuilder;

    #[test]
    fn decodes_single_codec8e_record_scenario() {
        // Codec 8E, one record with timestamp/priority/GPS/IO all populated.
        let frame = FrameBuilder::new()
            .extended()
            .add_record(|r| {
                r.timestamp_ms(1_704_067_200_000)
                    .priority(1)
                    .gps(440_000_000, 260_000_000, 100, 90, 9, 50)
                    .io_u8(239, 1)
                    .io_u32(16, 123_456)
            })
            .build();

        let decoded = decode(&frame).expect("frame decodes");
        assert_eq!(decoded.codec, CodecVariant::Extended);
        assert_eq!(decoded.number_of_data, 1);
        assert_eq!(decoded.records.len(), 1);

        let record = &decoded.records[0];
        assert_eq!(record.timestamp_ms, 1_704_067_200_000);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.gps.satellites, 9);
        assert_eq!(record.gps.speed, 50);
        assert!(record
            .io_elements
            .iter()
            .any(|io| io.id == 239 && matches!(io.value, IoValueRaw::Unsigned { value: 1, .. })));
        assert!(record
            .io_elements
            .iter()
            .any(|io| io.id == 16 && matches!(io.value, IoValueRaw::Unsigned { value: 123_456, .. })));
    }

    #[test]
    fn bounded_read_never_panics_on_truncated_input() {
        let frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0).io_u8(1, 1))
            .build();

        for len in 0..frame.len() {
            let result = decode(&frame[..len]);
            assert!(result.is_err(), "expected error for truncated input of len {len}");
        }
    }

    #[test]
    fn record_count_mismatch_is_fatal() {
        let mut frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0))
            .build();
        // Corrupt numberOfData2 (the byte right before the 4-byte CRC trailer).
        let idx = frame.len() - 5;
        frame[idx] = 99;

        let err = decode(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::RecordCountMismatch { .. }));
    }

    #[test]
    fn nx_vin_element_is_decoded_as_text() {
        let frame = FrameBuilder::new()
            .extended()
            .add_record(|r| {
                r.priority(1)
                    .gps(0, 0, 0, 0, 1, 0)
                    .io_nx_text(256, "W1T96302X10704959")
            })
            .build();

        let decoded = decode(&frame).expect("frame decodes");
        let vin_element = decoded.records[0]
            .io_elements
            .iter()
            .find(|io| io.id == 256)
            .expect("vin element present");
        match &vin_element.value {
            IoValueRaw::Text(text) => assert_eq!(text, "W1T96302X10704959"),
            other => panic!("expected text value, got {other:?}"),
        }
    }
}
