//! MPEG-TS framing constants
//!
//! Just enough transport-stream knowledge to frame the fallback feed: the
//! fixed packet size, the pipe read granularity, and the null packet used
//! as a keepalive when no encoder output is available.

use bytes::Bytes;

/// Fixed MPEG-TS packet size in bytes
pub const PACKET_SIZE: usize = 188;

/// Transport stream sync byte, first byte of every packet
pub const SYNC_BYTE: u8 = 0x47;

/// PID reserved for null packets
pub const NULL_PID: u16 = 0x1FFF;

/// Pipe read granularity: seven packets, the conventional TS-over-IP burst
pub const CHUNK_SIZE: usize = PACKET_SIZE * 7;

/// A complete null packet: sync byte, PID 0x1FFF, payload-only flags,
/// zeroed payload
const NULL_PACKET: [u8; PACKET_SIZE] = {
    let mut packet = [0u8; PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = (NULL_PID >> 8) as u8;
    packet[2] = (NULL_PID & 0xFF) as u8;
    packet[3] = 0x10;
    packet
};

/// One null packet, shared without copying
pub fn null_packet() -> Bytes {
    Bytes::from_static(&NULL_PACKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_packet_layout() {
        let packet = null_packet();

        assert_eq!(packet.len(), PACKET_SIZE);
        assert_eq!(packet[0], SYNC_BYTE);
        // 13-bit PID spans the low 5 bits of byte 1 and all of byte 2
        let pid = (u16::from(packet[1] & 0x1F) << 8) | u16::from(packet[2]);
        assert_eq!(pid, NULL_PID);
        // Payload-only, continuity counter zero
        assert_eq!(packet[3], 0x10);
        assert!(packet[4..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_chunk_is_packet_aligned() {
        assert_eq!(CHUNK_SIZE % PACKET_SIZE, 0);
    }
}
