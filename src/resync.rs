//! Binary frame resynchronization.
//!
//! The scanner walks the accumulated serial buffer looking for the
//! `SYNC_BYTE_1 SYNC_BYTE_2 ... END_BYTE` envelope. Any candidate that fails a
//! check costs exactly one byte, so a single corrupted or injected byte never
//! pushes the stream permanently out of alignment.

use log::trace;

use crate::protocol::{END_BYTE, HEADER_LEN, SYNC_BYTE_1, SYNC_BYTE_2};

/// Counters kept across scans, reset with the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Frames handed to the decoder.
    pub frames: u64,
    /// Bytes thrown away while hunting for a valid frame.
    pub discarded: u64,
}

/// Extracts fixed-length frames from a byte buffer.
#[derive(Debug, Clone)]
pub struct FrameScanner {
    packet_len: usize,
    stats: ScanStats,
}

impl FrameScanner {
    pub fn new(packet_len: usize) -> Self {
        Self {
            packet_len,
            stats: ScanStats::default(),
        }
    }

    pub fn packet_len(&self) -> usize {
        self.packet_len
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Smallest frame length that still has room for a payload.
    fn is_usable(&self) -> bool {
        self.packet_len >= HEADER_LEN + 2
    }

    /// Pull every complete, valid frame out of `buffer`, in stream order.
    ///
    /// On return the buffer holds fewer than `packet_len` bytes, all of which
    /// may still be the beginning of a frame.
    pub fn extract(&mut self, buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if !self.is_usable() {
            return frames;
        }
        let len = self.packet_len;

        while buffer.len() >= len {
            let Some(sync) = buffer.iter().position(|&b| b == SYNC_BYTE_1) else {
                self.discard(buffer, buffer.len());
                break;
            };
            if sync > 0 {
                self.discard(buffer, sync);
            }
            if buffer.len() < len {
                break;
            }
            if buffer[1] != SYNC_BYTE_2 {
                self.discard(buffer, 1);
                continue;
            }
            if buffer[len - 1] != END_BYTE {
                self.discard(buffer, 1);
                continue;
            }

            frames.push(buffer.drain(..len).collect());
            self.stats.frames += 1;
        }

        frames
    }

    fn discard(&mut self, buffer: &mut Vec<u8>, count: usize) {
        trace!("dropping {} byte(s) while resyncing", count);
        buffer.drain(..count);
        self.stats.discarded += count as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet_len_for;

    fn frame(channels: &[u16]) -> Vec<u8> {
        let mut out = vec![SYNC_BYTE_1, SYNC_BYTE_2, 0x00];
        for v in channels {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.push(END_BYTE);
        out
    }

    #[test]
    fn extracts_back_to_back_frames() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        let mut buf = frame(&[1, 2]);
        buf.extend(frame(&[3, 4]));
        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, vec![frame(&[1, 2]), frame(&[3, 4])]);
        assert!(buf.is_empty());
        assert_eq!(scanner.stats().frames, 2);
        assert_eq!(scanner.stats().discarded, 0);
    }

    #[test]
    fn skips_leading_garbage() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        let mut buf = vec![0x55, 0x13, 0x00];
        buf.extend(frame(&[10, 20]));
        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, vec![frame(&[10, 20])]);
        assert_eq!(scanner.stats().discarded, 3);
    }

    #[test]
    fn drops_whole_buffer_without_sync_byte() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        let mut buf = vec![0x00; 20];
        assert!(scanner.extract(&mut buf).is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn false_sync_costs_one_byte() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        // A lone SYNC_BYTE_1 immediately before a real frame.
        let mut buf = vec![SYNC_BYTE_1];
        buf.extend(frame(&[7, 8]));
        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, vec![frame(&[7, 8])]);
        assert_eq!(scanner.stats().discarded, 1);
    }

    #[test]
    fn bad_end_marker_rescans_inside_candidate() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        let mut corrupt = frame(&[1, 1]);
        *corrupt.last_mut().unwrap() = 0xEE;
        let mut buf = corrupt;
        buf.extend(frame(&[5, 6]));
        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, vec![frame(&[5, 6])]);
        assert!(buf.is_empty());
    }

    #[test]
    fn sync_pattern_inside_payload_is_recovered() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        // Payload carries 0xC77C; truncate the first frame so the scanner
        // has to find the real one behind it.
        let embedded = frame(&[0xC77C, 0x0001]);
        let mut buf = embedded[..4].to_vec();
        buf.extend(frame(&[0xC77C, 0x0001]));
        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, vec![embedded]);
    }

    #[test]
    fn waits_for_partial_frame() {
        let mut scanner = FrameScanner::new(packet_len_for(2));
        let full = frame(&[9, 9]);
        let mut buf = full[..5].to_vec();
        assert!(scanner.extract(&mut buf).is_empty());
        assert_eq!(buf, full[..5].to_vec());
        buf.extend_from_slice(&full[5..]);
        assert_eq!(scanner.extract(&mut buf), vec![full]);
    }

    #[test]
    fn unusable_length_is_ignored() {
        let mut scanner = FrameScanner::new(HEADER_LEN + 1);
        let mut buf = vec![SYNC_BYTE_1, SYNC_BYTE_2, 0x00, END_BYTE];
        assert!(scanner.extract(&mut buf).is_empty());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn garbage_interleaving_yields_only_valid_frames() {
        let mut scanner = FrameScanner::new(packet_len_for(3));
        let valid = [frame(&[1, 2, 3]), frame(&[4, 5, 6]), frame(&[7, 8, 9])];
        let garbage: [&[u8]; 4] = [
            &[0x10, SYNC_BYTE_1],
            &[SYNC_BYTE_1, SYNC_BYTE_2, 0x00, 0x00],
            &[],
            &[0xFF, 0xC7, 0x7C, 0x01, 0x02],
        ];
        let mut buf = Vec::new();
        for (g, f) in garbage.iter().zip(valid.iter()) {
            buf.extend_from_slice(g);
            buf.extend_from_slice(f);
        }
        buf.extend_from_slice(garbage[3]);

        let frames = scanner.extract(&mut buf);
        assert_eq!(frames, valid.to_vec());
        assert!(buf.len() < scanner.packet_len());
    }
}
