//! Wire protocol of the YDLIDAR T-mini Plus.
//!
//! Measurement packets are laid out as
//! `[0xAA 0x55] [type] [count] [start u16le] [end u16le] [checksum u16le] [count x (distance u16le, intensity u8)]`.

use super::scan::{LidarPoint, MAX_DISTANCE_MM};
use crate::error::RoverError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub const SYNC_MARKER: [u8; 2] = [0xAA, 0x55];
pub const HEADER_LEN: usize = 10;
pub const SAMPLE_LEN: usize = 3;
pub const HEALTH_REPLY_MARKER: [u8; 2] = [0xA5, 0x5A];
const CHECKSUM_SEED: u16 = 0x55AA;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidarCommand {
    StartScan,
    StopScan,
    SoftReboot,
    HealthQuery,
}

impl LidarCommand {
    pub fn bytes(&self) -> [u8; 2] {
        match self {
            LidarCommand::StartScan => [0xA5, 0x60],
            LidarCommand::StopScan => [0xA5, 0x65],
            LidarCommand::SoftReboot => [0xA5, 0x40],
            LidarCommand::HealthQuery => [0xA5, 0x92],
        }
    }
}

/// One checksum-validated measurement packet.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarPacket {
    pub packet_type: u8,
    pub sample_count: u8,
    pub start_angle: f32,
    pub end_angle: f32,
    /// Samples that passed the distance filter, in wire order
    pub points: Vec<LidarPoint>,
}

pub fn decode_angle(code: u16) -> f32 {
    (code >> 1) as f32 / 64.0
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(SYNC_MARKER.len())
        .position(|window| window == SYNC_MARKER)
}

fn packet_checksum(packet: &[u8], sample_count: usize) -> u16 {
    let mut checksum = CHECKSUM_SEED;
    checksum ^= u16::from(packet[2]) | (u16::from(packet[3]) << 8);
    checksum ^= read_u16(packet, 4);
    checksum ^= read_u16(packet, 6);
    for i in 0..sample_count {
        checksum ^= read_u16(packet, HEADER_LEN + i * SAMPLE_LEN);
    }
    checksum
}

fn is_valid_distance(distance_mm: u16) -> bool {
    distance_mm > 0 && distance_mm < MAX_DISTANCE_MM
}

/// Stateless codec over the accumulation buffer.
///
/// Bad sync, truncated packets and checksum mismatches are resolved by
/// resynchronising, never reported as errors.
#[derive(Debug, Default)]
pub struct LidarProtocol;

impl Decoder for LidarProtocol {
    type Item = LidarPacket;
    type Error = RoverError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(sync_index) = find_sync(buf) else {
                // keep a trailing byte, it may be the first half of a marker
                let keep = buf.len().min(1);
                let dropped = buf.len() - keep;
                if dropped > 0 {
                    trace!("No sync marker, dropping {} bytes", dropped);
                    buf.advance(dropped);
                }
                return Ok(None);
            };
            if sync_index > 0 {
                trace!("Skipping {} bytes of garbage before sync", sync_index);
                buf.advance(sync_index);
            }
            if buf.len() < HEADER_LEN {
                return Ok(None);
            }

            let sample_count = buf[3] as usize;
            let packet_len = HEADER_LEN + sample_count * SAMPLE_LEN;
            if buf.len() < packet_len {
                return Ok(None);
            }

            let expected = read_u16(buf, 8);
            let actual = packet_checksum(buf, sample_count);
            if expected != actual {
                trace!(
                    "Checksum mismatch: expected {:#06x}, got {:#06x}",
                    expected,
                    actual
                );
                buf.advance(SYNC_MARKER.len());
                continue;
            }

            let packet = buf.split_to(packet_len);
            return Ok(Some(parse_packet(&packet, sample_count)));
        }
    }
}

fn parse_packet(packet: &[u8], sample_count: usize) -> LidarPacket {
    let start_angle = decode_angle(read_u16(packet, 4));
    let end_angle = decode_angle(read_u16(packet, 6));

    let angle_step = if sample_count > 1 {
        let mut span = end_angle - start_angle;
        if end_angle < start_angle {
            span += 360.0;
        }
        span / (sample_count - 1) as f32
    } else {
        0.0
    };

    let points = (0..sample_count)
        .filter_map(|i| {
            let offset = HEADER_LEN + i * SAMPLE_LEN;
            let distance_mm = read_u16(packet, offset);
            if !is_valid_distance(distance_mm) {
                return None;
            }
            let angle = (start_angle + i as f32 * angle_step).rem_euclid(360.0);
            Some(LidarPoint::new(angle, distance_mm, packet[offset + 2]))
        })
        .collect();

    LidarPacket {
        packet_type: packet[2],
        sample_count: sample_count as u8,
        start_angle,
        end_angle,
        points,
    }
}

impl Encoder<LidarCommand> for LidarProtocol {
    type Error = RoverError;

    fn encode(&mut self, command: LidarCommand, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = command.bytes();
        buf.reserve(bytes.len());
        buf.put_slice(&bytes);
        Ok(())
    }
}

/// Byte accumulator that turns arbitrary chunks into packets.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    protocol: LidarProtocol,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            protocol: LidarProtocol,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends `chunk` and lazily yields every complete packet now in the buffer.
    ///
    /// Dropping the iterator early leaves the remaining bytes for the next call.
    pub fn feed<'a>(&'a mut self, chunk: &[u8]) -> impl Iterator<Item = LidarPacket> + 'a {
        self.buffer.extend_from_slice(chunk);
        let Self { protocol, buffer } = self;
        std::iter::from_fn(move || protocol.decode(buffer).ok().flatten())
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Counts in-range samples without validating checksums.
///
/// Used as a cheap "is the device streaming" check during recovery.
pub fn count_plausible_samples(data: &[u8]) -> usize {
    let mut count = 0;
    let mut cursor = 0;
    while let Some(offset) = find_sync(&data[cursor..]) {
        let start = cursor + offset;
        if start + HEADER_LEN > data.len() {
            break;
        }
        let sample_count = data[start + 3] as usize;
        let samples_end = (start + HEADER_LEN + sample_count * SAMPLE_LEN).min(data.len());
        let mut sample_offset = start + HEADER_LEN;
        while sample_offset + 2 <= samples_end {
            if is_valid_distance(read_u16(data, sample_offset)) {
                count += 1;
            }
            sample_offset += SAMPLE_LEN;
        }
        cursor = (start + SYNC_MARKER.len()).max(samples_end);
    }
    count
}

pub fn contains_health_reply(data: &[u8]) -> bool {
    data.windows(HEALTH_REPLY_MARKER.len())
        .any(|window| window == HEALTH_REPLY_MARKER)
}

#[cfg(test)]
pub(crate) mod test_packets {
    use super::*;

    pub fn angle_code(angle: f32) -> u16 {
        (((angle * 64.0) as u16) << 1) | 1
    }

    /// Builds a wire packet with a correct checksum.
    pub fn packet(start_angle: f32, end_angle: f32, distances: &[u16]) -> Vec<u8> {
        let mut buf = vec![0xAA, 0x55, 0x00, distances.len() as u8];
        buf.extend_from_slice(&angle_code(start_angle).to_le_bytes());
        buf.extend_from_slice(&angle_code(end_angle).to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        for (i, distance) in distances.iter().enumerate() {
            buf.extend_from_slice(&distance.to_le_bytes());
            buf.push(100 + i as u8);
        }
        let checksum = packet_checksum(&buf, distances.len());
        buf[8..10].copy_from_slice(&checksum.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::test_packets::packet;
    use super::*;
    use approx::assert_relative_eq;

    fn decode_all(decoder: &mut FrameDecoder, chunk: &[u8]) -> Vec<LidarPacket> {
        decoder.feed(chunk).collect()
    }

    #[test]
    fn decodes_single_packet() {
        let mut decoder = FrameDecoder::new();
        let packets = decode_all(&mut decoder, &packet(10.0, 20.0, &[1000, 2000, 3000]));
        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert_eq!(packet.sample_count, 3);
        assert_eq!(packet.points.len(), 3);
        assert_relative_eq!(packet.points[0].angle, 10.0);
        assert_relative_eq!(packet.points[1].angle, 15.0);
        assert_relative_eq!(packet.points[2].angle, 20.0);
        assert_eq!(packet.points[1].distance_mm, 2000);
        assert_eq!(packet.points[1].intensity, 101);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn resyncs_across_garbage() {
        let mut stream = packet(10.0, 20.0, &[1000, 1100]);
        stream.extend_from_slice(&[0x01, 0x02, 0xAA, 0x13, 0x37, 0x55]);
        stream.extend_from_slice(&packet(30.0, 40.0, &[1200, 1300]));

        let mut decoder = FrameDecoder::new();
        let packets = decode_all(&mut decoder, &stream);
        assert_eq!(packets.len(), 2);
        assert_relative_eq!(packets[0].start_angle, 10.0);
        assert_relative_eq!(packets[1].start_angle, 30.0);
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let mut stream = vec![0x00, 0x11, 0x22, 0x33];
        stream.extend_from_slice(&packet(90.0, 95.0, &[500, 600]));
        let mut decoder = FrameDecoder::new();
        assert_eq!(decode_all(&mut decoder, &stream).len(), 1);
    }

    #[test]
    fn corrupted_distance_bytes_fail_checksum() {
        let original = packet(10.0, 20.0, &[1000, 2000, 3000]);
        let distance_offsets = [10, 11, 13, 14, 16, 17];
        for offset in distance_offsets {
            let mut corrupted = original.clone();
            corrupted[offset] ^= 0x04;
            corrupted.extend_from_slice(&packet(50.0, 60.0, &[700, 800]));

            let mut decoder = FrameDecoder::new();
            let packets = decode_all(&mut decoder, &corrupted);
            assert_eq!(packets.len(), 1, "corrupting byte {}", offset);
            assert_relative_eq!(packets[0].start_angle, 50.0);
        }
    }

    #[test]
    fn truncated_packet_waits_without_consuming() {
        let full = packet(10.0, 20.0, &[1000, 2000, 3000]);
        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, &full[..12]).is_empty());
        assert_eq!(decoder.buffered_len(), 12);
        let packets = decode_all(&mut decoder, &full[12..]);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn sync_marker_split_across_chunks() {
        let full = packet(10.0, 20.0, &[1000, 2000]);
        let mut decoder = FrameDecoder::new();
        let mut first = vec![0x42, 0x43];
        first.push(full[0]);
        assert!(decode_all(&mut decoder, &first).is_empty());
        // only the possible half marker survives
        assert_eq!(decoder.buffered_len(), 1);
        assert_eq!(decode_all(&mut decoder, &full[1..]).len(), 1);
    }

    #[test]
    fn buffer_without_sync_keeps_last_byte() {
        let mut decoder = FrameDecoder::new();
        assert!(decode_all(&mut decoder, &[0u8; 300]).is_empty());
        assert_eq!(decoder.buffered_len(), 1);
    }

    #[test]
    fn out_of_range_samples_are_dropped() {
        let mut decoder = FrameDecoder::new();
        let packets = decode_all(&mut decoder, &packet(0.0, 3.0, &[0, 500, 12000, 11999]));
        assert_eq!(packets.len(), 1);
        let distances: Vec<u16> = packets[0].points.iter().map(|p| p.distance_mm).collect();
        assert_eq!(distances, vec![500, 11999]);
        assert_relative_eq!(packets[0].points[0].angle, 1.0);
    }

    #[test]
    fn angles_wrap_across_zero() {
        let mut decoder = FrameDecoder::new();
        let packets = decode_all(&mut decoder, &packet(350.0, 10.0, &[1000, 1000, 1000, 1000, 1000]));
        let angles: Vec<f32> = packets[0].points.iter().map(|p| p.angle).collect();
        assert_relative_eq!(angles[0], 350.0);
        assert_relative_eq!(angles[1], 355.0);
        assert_relative_eq!(angles[2], 0.0);
        assert_relative_eq!(angles[3], 5.0);
        assert_relative_eq!(angles[4], 10.0);
    }

    #[test]
    fn single_sample_packet_uses_start_angle() {
        let mut decoder = FrameDecoder::new();
        let packets = decode_all(&mut decoder, &packet(123.0, 123.0, &[900]));
        assert_relative_eq!(packets[0].points[0].angle, 123.0);
    }

    #[test]
    fn angle_decoding_drops_check_bit() {
        assert_relative_eq!(decode_angle(0x0001), 0.0);
        assert_relative_eq!(decode_angle((90 * 64) << 1 | 1), 90.0);
    }

    #[test]
    fn commands_encode_to_two_bytes() {
        let mut buf = BytesMut::new();
        LidarProtocol.encode(LidarCommand::StartScan, &mut buf).unwrap();
        LidarProtocol.encode(LidarCommand::HealthQuery, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0xA5, 0x60, 0xA5, 0x92]);
    }

    #[test]
    fn plausible_samples_ignore_checksum() {
        let mut stream = packet(10.0, 20.0, &[1000, 0, 3000]);
        stream[8] ^= 0xFF;
        stream.extend_from_slice(&packet(30.0, 40.0, &[12500, 400]));
        assert_eq!(count_plausible_samples(&stream), 3);
        assert_eq!(count_plausible_samples(&[0x01, 0x02]), 0);
    }

    #[test]
    fn health_reply_detection() {
        assert!(contains_health_reply(&[0x00, 0xA5, 0x5A, 0x03]));
        assert!(!contains_health_reply(&[0xA5, 0x92]));
    }
}
