//! Per-TCP-connection state machine: login, authorization, AVL frame
//! accumulation/decoding, and acknowledgment.

mod map;

pub use map::{SessionHandle, SessionMap};

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::codec::{decode, DecodeError};
use crate::model::RawFrame;
use crate::normalizer::{find_vin, normalize};
use crate::store::Store;

const UNAUTHENTICATED_TIMEOUT: Duration = Duration::from_secs(15);
const LIVENESS_TICK: Duration = Duration::from_secs(5);
const LOGIN_IMEI_LEN: usize = 15;
const FRAME_ENVELOPE_LEN: usize = 12; // preamble(4) + dataFieldLength(4) + crc(4)
const DEFAULT_DEVICE_TYPE: &str = "FMC003";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingLogin,
    AwaitingAuth,
    Streaming,
    Closed,
}

/// Drives one accepted connection through its whole life cycle. Consumes
/// the stream; returns once the connection is closed for any reason.
pub async fn handle_connection<S>(
    mut stream: S,
    remote: std::net::SocketAddr,
    store: Arc<dyn Store>,
    session_map: SessionMap,
    logs_dir: String,
) where
    S: AsyncReadExt + AsyncWriteExt + Unpin + Send,
{
    let mut state = SessionState::AwaitingLogin;

    let imei = match read_login(&mut stream).await {
        Ok(Some(imei)) => imei,
        _ => {
            debug!("connection from {remote} closed during login");
            return;
        }
    };

    state = SessionState::AwaitingAuth;

    let approved = match store.get_device(&imei).await {
        Ok(Some(device)) => device.approved,
        Ok(None) => false,
        Err(err) => {
            warn!(target: &imei, "store lookup failed during auth: {err}");
            false
        }
    };

    if stream.write_u8(if approved { 0x01 } else { 0x00 }).await.is_err() {
        return;
    }

    if !approved {
        info!(target: &imei, "rejected: not an approved device");
        return;
    }

    state = SessionState::Streaming;
    session_map.insert(remote, SessionHandle::new(imei.clone())).await;

    let liveness_imei = imei.clone();
    let liveness_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIVENESS_TICK);
        loop {
            ticker.tick().await;
            debug!(target: &liveness_imei, "liveness tick (observability only, never written to the wire)");
        }
    });

    run_streaming(&mut stream, &imei, store.as_ref(), &logs_dir).await;

    liveness_handle.abort();
    session_map.remove(&remote).await;
    let _ = state;
    info!(target: &imei, "session closed");
}

/// Reads the 2-byte length + ASCII-digit login frame. `Ok(None)` means the
/// peer sent a malformed login and must be dropped without a reply.
///
/// The whole read is wrapped in a single timeout so a slow peer can't buy a
/// second 15s window by trickling the length and IMEI bytes separately.
async fn read_login<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<Option<String>> {
    let read = async {
        let length = stream.read_u16().await?;
        if length as usize != LOGIN_IMEI_LEN {
            return Ok(None);
        }

        let mut buf = vec![0u8; LOGIN_IMEI_LEN];
        stream.read_exact(&mut buf).await?;

        if !buf.iter().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&buf).to_string()))
    };

    match timeout(UNAUTHENTICATED_TIMEOUT, read).await {
        Ok(result) => result,
        Err(_) => Ok(None),
    }
}

/// Accumulates and processes AVL frames for the remainder of the
/// connection's lifetime, once it has reached the `Streaming` state.
async fn run_streaming<S>(stream: &mut S, imei: &str, store: &dyn Store, logs_dir: &str)
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; 4096];

    loop {
        match try_take_frame(&mut buffer) {
            Some(frame_bytes) => {
                process_frame(stream, imei, store, logs_dir, &frame_bytes).await;
                continue;
            }
            None => {}
        }

        match stream.read(&mut read_buf).await {
            Ok(0) => {
                info!(target: imei, "peer closed connection");
                return;
            }
            Ok(n) => buffer.extend_from_slice(&read_buf[..n]),
            Err(err) => {
                warn!(target: imei, "socket error: {err}");
                return;
            }
        }
    }
}

/// Pulls one whole frame out of `buffer` if enough bytes have accumulated,
/// leaving any excess bytes (the start of the next frame) in place.
fn try_take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buffer.len() < 8 {
        return None;
    }
    let data_field_length = u32::from_be_bytes(buffer[4..8].try_into().unwrap()) as usize;
    let total_len = 8 + data_field_length + 4; // header + payload + CRC trailer
    if buffer.len() < total_len {
        return None;
    }
    let frame = buffer[..total_len].to_vec();
    buffer.drain(..total_len);
    Some(frame)
}

async fn process_frame<S>(stream: &mut S, imei: &str, store: &dyn Store, logs_dir: &str, frame_bytes: &[u8])
where
    S: AsyncWriteExt + Unpin,
{
    write_raw_frame_log(logs_dir, imei, frame_bytes);

    match decode(frame_bytes) {
        Ok(packet) => {
            if packet.crc16_trailer as u16 != packet.crc16_computed {
                debug!(target: imei, "CRC mismatch (non-fatal, accepted regardless)");
            }

            let records: Vec<_> = packet.records.iter().map(|raw| normalize(imei, raw)).collect();
            let vin = find_vin(&records);

            let now = Utc::now();
            if let Err(err) = store
                .insert_raw_frame(
                    DEFAULT_DEVICE_TYPE,
                    RawFrame {
                        imei: imei.to_string(),
                        vin: vin.clone(),
                        modem_type: DEFAULT_DEVICE_TYPE.to_string(),
                        raw_hex: hex_encode(frame_bytes),
                        timestamp: now,
                    },
                )
                .await
            {
                warn!(target: imei, "failed to persist raw frame: {err}");
            }

            for record in records {
                if let Err(err) = store.insert_record(DEFAULT_DEVICE_TYPE, record).await {
                    warn!(target: imei, "failed to persist record: {err}");
                }
            }

            touch_device(store, imei, vin, now).await;

            let ack = (packet.number_of_data as u32).to_be_bytes();
            let _ = stream.write_all(&ack).await;
        }
        Err(err) => match err {
            DecodeError::UnexpectedEof { .. } => {
                warn!(target: imei, "truncated frame (should not happen post-framing): {err}");
            }
            other => {
                warn!(target: imei, "failed to decode frame: {other}");
            }
        },
    }
}

/// Updates `lastSeen` on every accepted frame, and `vin` whenever the
/// payload carries one the device record doesn't already have.
async fn touch_device(store: &dyn Store, imei: &str, vin: Option<String>, now: chrono::DateTime<Utc>) {
    let mut device = match store.get_device(imei).await {
        Ok(Some(device)) => device,
        Ok(None) => return,
        Err(err) => {
            warn!(target: imei, "failed to load device for lastSeen/vin update: {err}");
            return;
        }
    };

    device.last_seen = Some(now);
    device.updated_at = now;
    if vin.is_some() {
        device.vin = vin;
    }

    if let Err(err) = store.upsert_device(device).await {
        warn!(target: imei, "failed to persist device lastSeen/vin update: {err}");
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Appends a base64-encoded copy of the raw frame to
/// `LOGS_DIR/<imei>/YYYY-MM-DD_HH.txt`, one line per frame, rotating hourly.
fn write_raw_frame_log(logs_dir: &str, imei: &str, frame_bytes: &[u8]) {
    let dir = std::path::Path::new(logs_dir).join(imei);
    if let Err(err) = std::fs::create_dir_all(&dir) {
        warn!(target: imei, "failed to create log directory: {err}");
        return;
    }
    let file_path = dir.join(format!("{}.txt", Utc::now().format("%Y-%m-%d_%H")));
    let encoded = base64::prelude::BASE64_STANDARD.encode(frame_bytes);
    use std::io::Write;
    match std::fs::OpenOptions::new().create(true).append(true).open(&file_path) {
        Ok(mut file) => {
            if let Err(err) = writeln!(file, "{encoded}") {
                warn!(target: imei, "failed to write raw frame log: {err}");
            }
        }
        Err(err) => warn!(target: imei, "failed to open raw frame log: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::test_support::FrameBuilder;
    use crate::utils::imei::get_random_imei;
    use tokio::io::duplex;

    fn temp_logs_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create temp logs dir")
    }

    async fn read_all_available(stream: &mut tokio::io::DuplexStream, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let n = timeout(Duration::from_millis(200), stream.read(&mut buf)).await.unwrap().unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn unapproved_device_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let imei = get_random_imei();
        let (mut client, server) = duplex(8192);

        let map = SessionMap::new();
        let store_clone = store.clone();
        let logs_dir = temp_logs_dir();
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:1".parse().unwrap(),
            store_clone,
            map,
            logs_dir.path().to_str().unwrap().to_string(),
        ));

        client.write_u16(imei.len() as u16).await.unwrap();
        client.write_all(imei.as_bytes()).await.unwrap();

        let reply = read_all_available(&mut client, 1).await;
        assert_eq!(reply, vec![0x00]);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn approved_device_is_accepted_and_acked() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let imei = get_random_imei();
        store
            .upsert_device(crate::model::Device {
                approved: true,
                ..crate::model::Device::new(imei.clone())
            })
            .await
            .unwrap();

        let (mut client, server) = duplex(1 << 16);
        let map = SessionMap::new();
        let logs_dir = temp_logs_dir();
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:2".parse().unwrap(),
            store.clone(),
            map,
            logs_dir.path().to_str().unwrap().to_string(),
        ));

        client.write_u16(imei.len() as u16).await.unwrap();
        client.write_all(imei.as_bytes()).await.unwrap();
        let login_reply = read_all_available(&mut client, 1).await;
        assert_eq!(login_reply, vec![0x01]);

        let frame = FrameBuilder::new()
            .extended()
            .add_record(|r| r.timestamp_ms(1_700_000_000_000).priority(1).gps(0, 0, 0, 0, 5, 10).io_u8(239, 1))
            .build();
        client.write_all(&frame).await.unwrap();

        let ack = read_all_available(&mut client, 4).await;
        assert_eq!(ack, 1u32.to_be_bytes().to_vec());

        drop(client);
        handle.await.unwrap();

        let count = store.count_records(DEFAULT_DEVICE_TYPE, &imei).await.unwrap();
        assert_eq!(count, 1);

        let device = store.get_device(&imei).await.unwrap().expect("device still on record");
        assert!(device.last_seen.is_some(), "lastSeen should be touched on an accepted frame");
    }

    #[tokio::test]
    async fn vin_carried_by_a_frame_is_written_onto_the_device() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let imei = get_random_imei();
        store
            .upsert_device(crate::model::Device {
                approved: true,
                ..crate::model::Device::new(imei.clone())
            })
            .await
            .unwrap();

        let (mut client, server) = duplex(1 << 16);
        let map = SessionMap::new();
        let logs_dir = temp_logs_dir();
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:4".parse().unwrap(),
            store.clone(),
            map,
            logs_dir.path().to_str().unwrap().to_string(),
        ));

        client.write_u16(imei.len() as u16).await.unwrap();
        client.write_all(imei.as_bytes()).await.unwrap();
        read_all_available(&mut client, 1).await;

        let frame = FrameBuilder::new()
            .extended()
            .add_record(|r| r.priority(1).gps(0, 0, 0, 0, 5, 10).io_nx_text(256, "W1T96302X10704959"))
            .build();
        client.write_all(&frame).await.unwrap();
        read_all_available(&mut client, 4).await;

        drop(client);
        handle.await.unwrap();

        let device = store.get_device(&imei).await.unwrap().unwrap();
        assert_eq!(device.vin.as_deref(), Some("W1T96302X10704959"));
    }

    #[tokio::test]
    async fn malformed_login_closes_without_reply() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let (mut client, server) = duplex(1024);
        let map = SessionMap::new();
        let logs_dir = temp_logs_dir();
        let handle = tokio::spawn(handle_connection(
            server,
            "127.0.0.1:3".parse().unwrap(),
            store,
            map,
            logs_dir.path().to_str().unwrap().to_string(),
        ));

        client.write_u16(4).await.unwrap();
        client.write_all(b"abcd").await.unwrap();
        drop(client);

        handle.await.unwrap();
    }

    #[test]
    fn splits_frame_and_leaves_trailing_bytes_buffered() {
        let frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0).io_u8(1, 1))
            .build();
        let mut buffer = frame.clone();
        buffer.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let taken = try_take_frame(&mut buffer).unwrap();
        assert_eq!(taken, frame);
        assert_eq!(buffer, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn partial_frame_yields_none() {
        let frame = FrameBuilder::new()
            .add_record(|r| r.priority(0).gps(0, 0, 0, 0, 0, 0).io_u8(1, 1))
            .build();
        let mut buffer = frame[..frame.len() - 2].to_vec();
        assert!(try_take_frame(&mut buffer).is_none());
    }

    #[test]
    fn raw_frame_log_appends_base64_lines_under_imei_subdir() {
        let logs_dir = temp_logs_dir();
        let imei = "864275079658715";

        write_raw_frame_log(logs_dir.path().to_str().unwrap(), imei, &[0xDE, 0xAD, 0xBE, 0xEF]);
        write_raw_frame_log(logs_dir.path().to_str().unwrap(), imei, &[0x01, 0x02]);

        let this_hour = Utc::now().format("%Y-%m-%d_%H");
        let file_path = logs_dir.path().join(imei).join(format!("{this_hour}.txt"));
        let contents = std::fs::read_to_string(file_path).expect("log file written");
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines, vec!["3q2+7w==", "AQI="]);
    }
}
