//! Shared-Frame Channel (spec.md §4.2): a fixed-size memory-mapped data
//! region with a single producer. The producer copies a frame payload into
//! the next slot, then returns a metadata record describing where it landed;
//! callers publish that record on the sync channel. Readers are external
//! processes — the core never reads its own channel back.
//!
//! Grounded on the teacher's `data::ring_buffer::RingBuffer`: a
//! memory-mapped file, a fixed header, and atomic offset bookkeeping so a
//! writer never blocks on a lock per frame.

use crate::error::Result;
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const MAGIC: u64 = 0x15_1E_1E_0F_00_00_00_01;
const HEADER_SIZE: usize = 64;

/// A published frame's location and identity. This is what travels on the
/// sync channel — readers fetch the payload themselves via `offset_bytes`/
/// `size_bytes` against the mapped region.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FrameMetadata {
    pub frame_id: u64,
    pub timestamp_us: i64,
    pub frame_index: u32,
    pub direction: Option<String>,
    pub angle_deg: Option<f32>,
    pub width_px: u32,
    pub height_px: u32,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

/// Single-producer memory-mapped region for one frame stream (camera or
/// stimulus each own their own channel, per spec.md §4.2 concurrency note).
///
/// # Safety
/// `data_ptr` aliases into `mmap`'s backing memory and is valid exactly as
/// long as `mmap` is alive. Only the single producer writes through it;
/// `write_offset` is advanced with `Ordering::Release` so an external reader
/// that has observed the resulting `FrameMetadata` is guaranteed to see the
/// completed write.
pub struct SharedFrameChannel {
    mmap: MmapMut,
    data_ptr: *mut u8,
    capacity: u64,
    write_offset: AtomicU64,
    frame_seq: AtomicU64,
}

// SAFETY: only the owning producer thread calls `publish`; the pointer is
// never aliased mutably from more than one place at a time.
unsafe impl Send for SharedFrameChannel {}
unsafe impl Sync for SharedFrameChannel {}

impl SharedFrameChannel {
    /// Creates (or truncates) the backing file at `path` sized to hold
    /// `capacity_bytes` of frame payloads plus a small header.
    pub fn create(path: &Path, capacity_bytes: u64) -> Result<Self> {
        let total = HEADER_SIZE as u64 + capacity_bytes;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total)?;

        let mut mmap = unsafe { MmapOptions::new().len(total as usize).map_mut(&file)? };
        mmap[0..8].copy_from_slice(&MAGIC.to_le_bytes());
        mmap[8..16].copy_from_slice(&capacity_bytes.to_le_bytes());

        let data_ptr = unsafe { mmap.as_mut_ptr().add(HEADER_SIZE) };
        Ok(Self {
            mmap,
            data_ptr,
            capacity: capacity_bytes,
            write_offset: AtomicU64::new(0),
            frame_seq: AtomicU64::new(0),
        })
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Copies `payload` into the next slot, wrapping to the start of the
    /// data region if it would overrun, and returns the metadata record to
    /// publish. A wrap is a valid "stale read" scenario for downstream
    /// subscribers (spec.md §4.2) — the core does not wait for readers.
    pub fn publish(
        &self,
        payload: &[u8],
        direction: Option<String>,
        frame_index: u32,
        timestamp_us: i64,
        angle_deg: Option<f32>,
        width_px: u32,
        height_px: u32,
    ) -> FrameMetadata {
        let size = payload.len() as u64;
        debug_assert!(size <= self.capacity, "frame payload exceeds channel capacity");

        let mut offset = self.write_offset.load(Ordering::Relaxed);
        if offset + size > self.capacity {
            offset = 0;
        }

        unsafe {
            let dst = self.data_ptr.add(offset as usize);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), dst, payload.len());
        }
        self.write_offset.store(offset + size, Ordering::Release);
        let frame_id = self.frame_seq.fetch_add(1, Ordering::Relaxed);

        FrameMetadata {
            frame_id,
            timestamp_us,
            frame_index,
            direction,
            angle_deg,
            width_px,
            height_px,
            offset_bytes: HEADER_SIZE as u64 + offset,
            size_bytes: size,
        }
    }

    /// Reads back a previously published payload. Only used by tests and by
    /// in-process playback code that wants to confirm what landed; external
    /// readers map the file independently.
    #[cfg(test)]
    fn read_at(&self, meta: &FrameMetadata) -> &[u8] {
        &self.mmap[meta.offset_bytes as usize..(meta.offset_bytes + meta.size_bytes) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn publish_round_trips_payload() {
        let dir = tempdir().unwrap();
        let channel = SharedFrameChannel::create(&dir.path().join("frames.bin"), 4096).unwrap();
        let payload = vec![7u8; 64];
        let meta = channel.publish(&payload, Some("LR".into()), 0, 1_000, Some(12.5), 8, 8);
        assert_eq!(channel.read_at(&meta), payload.as_slice());
        assert_eq!(meta.frame_id, 0);
    }

    #[test]
    fn frame_ids_increase_monotonically() {
        let dir = tempdir().unwrap();
        let channel = SharedFrameChannel::create(&dir.path().join("frames.bin"), 4096).unwrap();
        let a = channel.publish(&[1u8; 16], None, 0, 0, None, 4, 4);
        let b = channel.publish(&[2u8; 16], None, 1, 1, None, 4, 4);
        assert!(b.frame_id > a.frame_id);
    }

    #[test]
    fn publish_wraps_when_capacity_exceeded() {
        let dir = tempdir().unwrap();
        let channel = SharedFrameChannel::create(&dir.path().join("frames.bin"), 32).unwrap();
        let _first = channel.publish(&[1u8; 20], None, 0, 0, None, 4, 4);
        let second = channel.publish(&[2u8; 20], None, 1, 1, None, 4, 4);
        assert_eq!(second.offset_bytes, HEADER_SIZE as u64);
    }
}
