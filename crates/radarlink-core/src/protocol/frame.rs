//! Frame codec for both wire families.
//!
//! Binary frames (register protocol):
//! `START_MARKER | LEN (2B LE) | packet | END_MARKER`, where `packet` is a
//! type byte followed by the payload and `LEN = packet.len() - 1`. Decoding
//! therefore reads `LEN + 2` bytes after the length field: the packet plus
//! the end marker.
//!
//! JSON-line frames (streaming protocol): one JSON object terminated by
//! `\n`, optionally followed by exactly `payload_size` raw bytes with no
//! further framing.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::warn;

use super::constants::{END_MARKER, LEN_FIELD_SIZE, MAX_FRAME_LEN, START_MARKER};
use crate::error::{Error, Result};
use crate::link::Link;

/// Encode a packet (type byte + payload) into a binary frame.
pub fn encode_frame(packet: &[u8]) -> Result<Vec<u8>> {
    if packet.is_empty() {
        return Err(Error::protocol("cannot encode an empty packet"));
    }
    let len = packet.len() - 1;
    if len > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "packet too long for length field: {} bytes",
            packet.len()
        )));
    }
    let mut frame = Vec::with_capacity(packet.len() + 4);
    frame.push(START_MARKER);
    let mut len_field = [0u8; LEN_FIELD_SIZE];
    LittleEndian::write_u16(&mut len_field, len as u16);
    frame.extend_from_slice(&len_field);
    frame.extend_from_slice(packet);
    frame.push(END_MARKER);
    Ok(frame)
}

/// Read one binary frame and return its packet.
///
/// A wrong marker triggers resynchronization: the stream is scanned forward
/// for the next plausible `START_MARKER | LEN` prefix whose end marker
/// validates, so a single corrupted frame is dropped without desynchronizing
/// everything after it. Recovery is bounded by the link timeout.
pub fn read_frame(link: &mut dyn Link) -> Result<Vec<u8>> {
    let mut window = link.recv(1 + LEN_FIELD_SIZE)?;
    if window[0] == START_MARKER {
        let len = LittleEndian::read_u16(&window[1..3]) as usize;
        window.extend(link.recv(len + 2)?);
        if window[window.len() - 1] == END_MARKER {
            return Ok(window[3..3 + len + 1].to_vec());
        }
    }
    resync(link, window)
}

/// Scan forward for the next valid frame. `window` holds the bytes already
/// consumed from the stream, starting at what should have been a start
/// marker.
fn resync(link: &mut dyn Link, mut window: Vec<u8>) -> Result<Vec<u8>> {
    let mut scan_from = 1usize.min(window.len());
    loop {
        match window[scan_from..].iter().position(|&b| b == START_MARKER) {
            Some(rel) => {
                let start = scan_from + rel;
                while window.len() < start + 1 + LEN_FIELD_SIZE {
                    window.extend(link.recv(1)?);
                }
                let len = LittleEndian::read_u16(&window[start + 1..start + 3]) as usize;
                let end = start + 3 + len + 1;
                if window.len() <= end {
                    let more = link.recv(end + 1 - window.len())?;
                    window.extend(more);
                }
                if window[end] == END_MARKER {
                    warn!(
                        skipped = start,
                        "Recovered frame sync after corrupted frame"
                    );
                    return Ok(window[start + 3..end].to_vec());
                }
                scan_from = start + 1;
            }
            None => {
                scan_from = window.len();
                window.extend(link.recv(1)?);
            }
        }
    }
}

/// Send one newline-terminated JSON message.
pub fn write_json_line<T: Serialize>(link: &mut dyn Link, msg: &T) -> Result<()> {
    let mut line =
        serde_json::to_vec(msg).map_err(|e| Error::protocol(format!("command encoding: {e}")))?;
    line.push(b'\n');
    link.send(&line)?;
    Ok(())
}

/// Read one newline-terminated JSON message.
pub fn read_json_line(link: &mut dyn Link) -> Result<serde_json::Value> {
    let line = link.recv_until(b"\n")?;
    serde_json::from_slice(&line).map_err(|e| Error::parse(format!("invalid JSON header: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkError, MockLink};
    use crate::protocol::constants::*;

    fn roundtrip(packet: &[u8]) {
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(&encode_frame(packet).unwrap());
        assert_eq!(read_frame(&mut link).unwrap(), packet);
    }

    #[test]
    fn roundtrip_all_packet_kinds() {
        roundtrip(&[REG_READ_REQUEST, REG_STATUS]);
        roundtrip(&[REG_READ_RESPONSE, REG_STATUS, 1, 2, 3, 4]);
        roundtrip(&[REG_WRITE_REQUEST, REG_MAIN_CONTROL, 0, 0, 0, 0]);
        roundtrip(&[REG_WRITE_RESPONSE, REG_MAIN_CONTROL, 0, 0, 0, 0]);
        roundtrip(&[STREAM_PACKET, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn roundtrip_boundary_lengths() {
        // Smallest possible packet: just the type byte, LEN = 0.
        roundtrip(&[STREAM_PACKET]);
        roundtrip(&[STREAM_PACKET, 0x00]);
        // Largest LEN-representable packet.
        let mut big = vec![STREAM_PACKET];
        big.extend(std::iter::repeat(0x5A).take(MAX_FRAME_LEN));
        roundtrip(&big);
    }

    #[test]
    fn length_field_excludes_type_byte() {
        let frame = encode_frame(&[REG_READ_REQUEST, 0x06]).unwrap();
        assert_eq!(frame[0], START_MARKER);
        // Packet is 2 bytes; the length field must say 1.
        assert_eq!(LittleEndian::read_u16(&frame[1..3]), 1);
        assert_eq!(*frame.last().unwrap(), END_MARKER);
    }

    #[test]
    fn oversized_packet_rejected() {
        let too_big = vec![0u8; MAX_FRAME_LEN + 2];
        assert!(matches!(
            encode_frame(&too_big),
            Err(crate::error::Error::Protocol(_))
        ));
    }

    #[test]
    fn recovers_after_corrupted_end_marker() {
        let packet_a = [STREAM_PACKET, 1, 2, 3];
        let packet_b = [STREAM_PACKET, 4, 5, 6];
        let packet_c = [STREAM_PACKET, 7, 8, 9];

        let mut corrupted = encode_frame(&packet_b).unwrap();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(&encode_frame(&packet_a).unwrap());
        link.queue_read(&corrupted);
        link.queue_read(&encode_frame(&packet_c).unwrap());

        // A decodes normally, B is dropped, C is recovered in sync.
        assert_eq!(read_frame(&mut link).unwrap(), packet_a);
        assert_eq!(read_frame(&mut link).unwrap(), packet_c);
    }

    #[test]
    fn recovery_gives_up_on_timeout() {
        let packet = [STREAM_PACKET, 1, 2, 3];
        let mut corrupted = encode_frame(&packet).unwrap();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(&corrupted);

        // Nothing valid follows: recovery must end in a link timeout, not a
        // crash or a bogus frame.
        assert!(matches!(
            read_frame(&mut link),
            Err(Error::Link(LinkError::RecvTimeout))
        ));
    }

    #[test]
    fn recovers_from_leading_garbage() {
        let packet = [REG_READ_RESPONSE, REG_STATUS, 9, 9, 9, 9];
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(&[0x00, 0x13, 0x37]);
        link.queue_read(&encode_frame(&packet).unwrap());

        assert_eq!(read_frame(&mut link).unwrap(), packet);
    }

    #[test]
    fn json_line_roundtrip() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        write_json_line(&mut link, &serde_json::json!({"cmd": "stop_streaming"})).unwrap();

        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with(b"\n"));

        link.queue_read(b"{\"status\": \"ok\"}\n");
        let value = read_json_line(&mut link).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let mut link = MockLink::new();
        link.connect().unwrap();
        link.queue_read(b"{not json}\n");
        assert!(matches!(read_json_line(&mut link), Err(Error::Parse(_))));
    }
}
