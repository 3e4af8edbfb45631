// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Reading and writing Ogg-Opus bit-streams.
//!
//! [`OggPacketizer`] walks a complete Ogg-Opus byte blob (as handed back
//! whole by a TTS provider) and yields the raw Opus packets it carries,
//! validating the leading `OpusHead` identification page along the way.
//! [`OggWriter`] does the inverse for the outbound direction the speech
//! recognizer expects: framing a stream of captured Opus packets as Ogg
//! pages with the same two header packets.

use bytes::Bytes;
use kitt_core::{KittError, Result};
use ogg::{PacketWriteEndInfo, PacketWriter};
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::opus::{Toc, SAMPLE_RATE};

const OGG_CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const OPUS_HEAD_SIGNATURE: &[u8] = b"OpusHead";

/// One demultiplexed Opus packet plus the metadata the outbound track needs
/// to pace and caption it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusPacket {
    pub data: Bytes,
    pub duration_us: u32,
}

/// Parses a complete Ogg-Opus byte blob into its constituent Opus packets.
///
/// Construction validates that the stream begins with a well-formed
/// `OpusHead` page; the identification and comment header packets
/// (`OpusHead`, `OpusTags`) are consumed during parsing and never appear
/// in the packet list the caller gets back.
pub struct OggPacketizer {
    packets: std::vec::IntoIter<OpusPacket>,
}

impl OggPacketizer {
    /// Parses `data` eagerly, returning an error if the capture pattern,
    /// checksum, or `OpusHead` signature don't match.
    pub fn new(data: &[u8]) -> Result<Self> {
        let raw_packets = split_into_packets(data)?;

        let mut iter = raw_packets.into_iter();
        let head = iter.next().ok_or_else(|| KittError::InvalidPacket("empty Ogg stream".to_string()))?;
        if !head.starts_with(OPUS_HEAD_SIGNATURE) {
            return Err(KittError::InvalidPacket("first Ogg packet is not an OpusHead".to_string()));
        }
        // The comment header (OpusTags) carries no audio; skip it too.
        let _tags = iter.next().ok_or_else(|| KittError::InvalidPacket("Ogg stream has no OpusTags packet".to_string()))?;

        let packets = iter
            .map(|raw| {
                let toc = Toc::decode(raw.first().copied().unwrap_or(0));
                let duration_us = toc.validated_duration_us(raw.get(1).copied())?;
                Ok(OpusPacket { duration_us, data: Bytes::from(raw) })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { packets: packets.into_iter() })
    }
}

impl Iterator for OggPacketizer {
    type Item = OpusPacket;

    fn next(&mut self) -> Option<Self::Item> {
        self.packets.next()
    }
}

/// Splits a full Ogg bit-stream into its raw packet payloads, without
/// interpreting their contents. Handles packets spanning multiple pages
/// via the continuation flag and lacing values of 255.
fn split_into_packets(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut packets = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut pos = 0usize;
    let mut first_page = true;

    while pos < data.len() {
        let page = parse_page(data, pos)?;

        if first_page {
            if page.header_type & 0x02 == 0 {
                return Err(KittError::InvalidPacket("first Ogg page is missing the beginning-of-stream flag".to_string()));
            }
            first_page = false;
        }

        if page.header_type & 0x01 == 0 {
            pending.clear();
        }

        let mut offset = 0usize;
        let mut run_start = 0usize;
        let mut i = 0usize;
        while i < page.segment_table.len() {
            let len = page.segment_table[i] as usize;
            offset += len;
            if len < 255 {
                pending.extend_from_slice(&page.body[run_start..offset]);
                packets.push(std::mem::take(&mut pending));
                run_start = offset;
            }
            i += 1;
        }
        // Trailing 255-length segment: packet continues onto the next page.
        if run_start < offset {
            pending.extend_from_slice(&page.body[run_start..offset]);
        }

        pos = page.end;
    }

    Ok(packets)
}

struct Page<'a> {
    header_type: u8,
    segment_table: Vec<u8>,
    body: &'a [u8],
    end: usize,
}

fn parse_page(data: &[u8], start: usize) -> Result<Page<'_>> {
    let header = data
        .get(start..start + 27)
        .ok_or_else(|| KittError::InvalidPacket("truncated Ogg page header".to_string()))?;

    if &header[0..4] != OGG_CAPTURE_PATTERN {
        return Err(KittError::InvalidPacket("bad Ogg capture pattern".to_string()));
    }

    let header_type = header[5];
    let segment_count = header[26] as usize;

    let segment_table_start = start + 27;
    let segment_table = data
        .get(segment_table_start..segment_table_start + segment_count)
        .ok_or_else(|| KittError::InvalidPacket("truncated Ogg segment table".to_string()))?
        .to_vec();

    let body_len: usize = segment_table.iter().map(|&b| b as usize).sum();
    let body_start = segment_table_start + segment_count;
    let body = data
        .get(body_start..body_start + body_len)
        .ok_or_else(|| KittError::InvalidPacket("truncated Ogg page body".to_string()))?;

    verify_crc(data, start, body_start + body_len)?;

    Ok(Page { header_type, segment_table, body, end: body_start + body_len })
}

fn verify_crc(data: &[u8], page_start: usize, page_end: usize) -> Result<()> {
    let page = &data[page_start..page_end];
    let stored = u32::from_le_bytes([page[22], page[23], page[24], page[25]]);

    let mut crc = 0u32;
    for (i, &byte) in page.iter().enumerate() {
        let b = if (22..26).contains(&i) { 0 } else { byte };
        crc = crc32_update(crc, b);
    }

    if crc != stored {
        return Err(KittError::InvalidPacket("Ogg page CRC mismatch".to_string()));
    }
    Ok(())
}

fn crc32_update(crc: u32, byte: u8) -> u32 {
    let mut crc = crc ^ (u32::from(byte) << 24);
    for _ in 0..8 {
        crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04c1_1db7 } else { crc << 1 };
    }
    crc
}

/// Validates that `head_page` looks like a well-formed 19-byte `OpusHead`
/// payload. Exposed for tests that hand-build pages.
#[cfg(test)]
fn opus_head_payload(channels: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(19);
    payload.extend_from_slice(OPUS_HEAD_SIGNATURE);
    payload.push(1); // version
    payload.push(channels);
    payload.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
    payload.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    payload.extend_from_slice(&0i16.to_le_bytes()); // output gain
    payload.push(0); // channel mapping family
    payload
}

/// A shared, thread-safe buffer implementing `io::Write`, used to get
/// around `ogg::PacketWriter` borrowing its sink for its own lifetime:
/// `OggWriter` hands it a fresh `PacketWriter` per call and drains the
/// accumulated bytes afterwards.
#[derive(Clone)]
struct SharedPacketBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedPacketBuffer {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }
}

impl Write for SharedPacketBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).flush()
    }
}

/// Frames a sequence of captured microphone Opus packets as an Ogg
/// bit-stream, the format the speech recognizer's streaming upload expects.
///
/// Mirrors the identification/comment header layout used for the agent's
/// own outbound Ogg encoding, with a vendor string identifying this agent
/// rather than any upstream library. One `OggWriter` lives for one STT
/// streaming session: a fresh instance is built (and its ID/comment
/// headers re-emitted) every time `Transcriber` rotates sessions.
pub struct OggWriter {
    buffer: SharedPacketBuffer,
    serial: u32,
    granule: u64,
    samples_per_packet: u64,
    wrote_headers: bool,
}

impl OggWriter {
    #[must_use]
    pub fn new(serial: u32) -> Self {
        Self { buffer: SharedPacketBuffer::new(), serial, granule: 0, samples_per_packet: 960, wrote_headers: false }
    }

    fn write_headers(&mut self, channels: u8) -> std::io::Result<()> {
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(OPUS_HEAD_SIGNATURE);
        head.push(1);
        head.push(channels);
        head.extend_from_slice(&0u16.to_le_bytes());
        head.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0);
        let mut writer = PacketWriter::new(&mut self.buffer);
        writer.write_packet(head, self.serial, PacketWriteEndInfo::EndPage, 0)?;

        let mut tags = Vec::new();
        tags.extend_from_slice(b"OpusTags");
        let vendor = b"kitt";
        tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        tags.extend_from_slice(vendor);
        tags.extend_from_slice(&0u32.to_le_bytes()); // no user comments
        writer.write_packet(tags, self.serial, PacketWriteEndInfo::EndPage, 0)?;

        self.wrote_headers = true;
        Ok(())
    }

    /// Writes one captured Opus packet, framing it in its own Ogg page so
    /// the recognizer can start decoding before the utterance ends, and
    /// returns the Ogg bytes produced (headers included, the first time).
    pub fn write_packet(&mut self, packet: &[u8], channels: u8, end_of_stream: bool) -> std::io::Result<Vec<u8>> {
        if !self.wrote_headers {
            self.write_headers(channels)?;
        }

        self.granule += self.samples_per_packet;
        let end_info = if end_of_stream { PacketWriteEndInfo::EndStream } else { PacketWriteEndInfo::EndPage };
        let mut writer = PacketWriter::new(&mut self.buffer);
        writer.write_packet(packet.to_vec(), self.serial, end_info, self.granule)?;
        drop(writer);
        Ok(self.buffer.drain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc32_whole(page: &[u8]) -> u32 {
        let mut crc = 0u32;
        for (i, &byte) in page.iter().enumerate() {
            let b = if (22..26).contains(&i) { 0 } else { byte };
            crc = crc32_update(crc, b);
        }
        crc
    }

    fn build_page(serial: u32, sequence: u32, header_type: u8, granule: u64, payload: &[u8]) -> Vec<u8> {
        let mut segments = Vec::new();
        let mut remaining = payload.len();
        if remaining == 0 {
            segments.push(0);
        }
        while remaining > 0 {
            if remaining >= 255 {
                segments.push(255);
                remaining -= 255;
            } else {
                segments.push(remaining as u8);
                remaining = 0;
            }
        }

        let mut page = Vec::new();
        page.extend_from_slice(OGG_CAPTURE_PATTERN);
        page.push(0); // version
        page.push(header_type);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes()); // checksum placeholder
        page.push(segments.len() as u8);
        page.extend_from_slice(&segments);
        page.extend_from_slice(payload);

        let crc = crc32_whole(&page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }

    fn sample_stream() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(build_page(1, 0, 0x02, 0, &opus_head_payload(1)));
        data.extend(build_page(1, 1, 0x00, 0, b"OpusTags\0\0\0\0\0\0\0\0\0\0\0\0"));
        // A single CELT 20ms mono packet: config=19, stereo=0, frame_count_code=0.
        let audio_packet = [(19u8 << 3), 0xAA, 0xBB];
        data.extend(build_page(1, 2, 0x04, 960, &audio_packet));
        data
    }

    #[test]
    fn parses_head_tags_and_one_audio_packet() {
        let data = sample_stream();
        let packets: Vec<_> = OggPacketizer::new(&data).expect("parses").collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data.as_ref(), [(19u8 << 3), 0xAA, 0xBB]);
        assert_eq!(packets[0].duration_us, 20_000);
    }

    #[test]
    fn rejects_missing_bos_flag() {
        let mut data = Vec::new();
        data.extend(build_page(1, 0, 0x00, 0, &opus_head_payload(1)));
        assert!(OggPacketizer::new(&data).is_err());
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut data = sample_stream();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(OggPacketizer::new(&data).is_err());
    }

    #[test]
    fn writer_round_trips_through_packetizer() {
        let mut writer = OggWriter::new(42);
        let mut buf = writer.write_packet(&[(19u8 << 3), 1, 2, 3], 1, false).expect("writes");
        buf.extend(writer.write_packet(&[(19u8 << 3), 4, 5, 6], 1, true).expect("writes"));

        let packets: Vec<_> = OggPacketizer::new(&buf).expect("parses").collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].data.as_ref(), [(19u8 << 3), 1, 2, 3]);
        assert_eq!(packets[1].data.as_ref(), [(19u8 << 3), 4, 5, 6]);
    }
}
