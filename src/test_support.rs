//! Builders for constructing raw Codec 8 / Codec 8E byte frames in tests.
//!
//! Shaped like a fluent AVL frame/record builder, but emits plain bytes for
//! this crate's own codec rather than a parser-combinator AST.
#![cfg(test)]

use crate::codec::crc16_ibm;

pub struct FrameBuilder {
    extended: bool,
    records: Vec<Vec<u8>>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        FrameBuilder {
            extended: false,
            records: Vec::new(),
        }
    }

    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    pub fn add_record(mut self, f: impl FnOnce(RecordBuilder) -> RecordBuilder) -> Self {
        let builder = f(RecordBuilder::new(self.extended));
        self.records.push(builder.build());
        self
    }

    /// Encodes the whole frame: preamble, length, codec id, records, trailer CRC.
    pub fn build(self) -> Vec<u8> {
        let codec_id: u8 = if self.extended { 0x8E } else { 0x08 };
        let number_of_data = self.records.len() as u8;

        let mut payload = Vec::new();
        payload.push(codec_id);
        payload.push(number_of_data);
        for record in &self.records {
            payload.extend_from_slice(record);
        }
        payload.push(number_of_data);

        let crc = crc16_ibm(&payload) as u32;

        let mut frame = Vec::new();
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }
}

enum NxValue {
    Text(String),
    Hex(Vec<u8>),
}

pub struct RecordBuilder {
    extended: bool,
    timestamp_ms: u64,
    priority: u8,
    lon: i32,
    lat: i32,
    altitude: i16,
    angle: u16,
    satellites: u8,
    speed: u16,
    trigger_event_id: u16,
    groups: [Vec<(u16, u64)>; 4], // widths 1, 2, 4, 8
    nx: Vec<(u16, NxValue)>,
}

impl RecordBuilder {
    fn new(extended: bool) -> Self {
        RecordBuilder {
            extended,
            timestamp_ms: 0,
            priority: 0,
            lon: 0,
            lat: 0,
            altitude: 0,
            angle: 0,
            satellites: 0,
            speed: 0,
            trigger_event_id: 0,
            groups: [vec![], vec![], vec![], vec![]],
            nx: Vec::new(),
        }
    }

    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = ts;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Raw GPS ints as they appear on the wire: lon/lat already scaled by 1e7.
    pub fn gps(mut self, lon: i32, lat: i32, altitude: i16, angle: u16, satellites: u8, speed: u16) -> Self {
        self.lon = lon;
        self.lat = lat;
        self.altitude = altitude;
        self.angle = angle;
        self.satellites = satellites;
        self.speed = speed;
        self
    }

    pub fn trigger_event_id(mut self, id: u16) -> Self {
        self.trigger_event_id = id;
        self
    }

    pub fn io_u8(mut self, id: u16, value: u8) -> Self {
        self.groups[0].push((id, value as u64));
        self
    }

    pub fn io_u16(mut self, id: u16, value: u16) -> Self {
        self.groups[1].push((id, value as u64));
        self
    }

    pub fn io_u32(mut self, id: u16, value: u32) -> Self {
        self.groups[2].push((id, value as u64));
        self
    }

    pub fn io_u64(mut self, id: u16, value: u64) -> Self {
        self.groups[3].push((id, value));
        self
    }

    pub fn io_nx_text(mut self, id: u16, text: &str) -> Self {
        self.nx.push((id, NxValue::Text(text.to_string())));
        self
    }

    pub fn io_nx_hex(mut self, id: u16, bytes: Vec<u8>) -> Self {
        self.nx.push((id, NxValue::Hex(bytes)));
        self
    }

    fn build(self) -> Vec<u8> {
        let idw = if self.extended { 2 } else { 1 };
        let mut out = Vec::new();
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.push(self.priority);
        out.extend_from_slice(&self.lon.to_be_bytes());
        out.extend_from_slice(&self.lat.to_be_bytes());
        out.extend_from_slice(&self.altitude.to_be_bytes());
        out.extend_from_slice(&self.angle.to_be_bytes());
        out.push(self.satellites);
        out.extend_from_slice(&self.speed.to_be_bytes());

        push_uint(&mut out, idw, self.trigger_event_id as u64);
        let total: usize = self.groups.iter().map(|g| g.len()).sum::<usize>() + self.nx.len();
        push_uint(&mut out, idw, total as u64);

        for (width, group) in [1usize, 2, 4, 8].into_iter().zip(self.groups.into_iter()) {
            push_uint(&mut out, idw, group.len() as u64);
            for (id, value) in group {
                push_uint(&mut out, idw, id as u64);
                push_uint(&mut out, width, value);
            }
        }

        if self.extended {
            push_uint(&mut out, idw, self.nx.len() as u64);
            for (id, value) in self.nx {
                out.extend_from_slice(&id.to_be_bytes());
                let bytes = match value {
                    NxValue::Text(text) => text.into_bytes(),
                    NxValue::Hex(bytes) => bytes,
                };
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(&bytes);
            }
        }

        out
    }
}

fn push_uint(out: &mut Vec<u8>, width: usize, value: u64) {
    match width {
        1 => out.push(value as u8),
        2 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        4 => out.extend_from_slice(&(value as u32).to_be_bytes()),
        8 => out.extend_from_slice(&value.to_be_bytes()),
        _ => unreachable!("unsupported width {width}"),
    }
}
