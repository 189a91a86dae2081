//! The packet pool: a fixed-capacity arena of [`Packet`] slots with a LIFO
//! free list and atomic refcounts (spec.md §4.2).

use crate::packet::{BinId, Packet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Stable index into a [`PacketPool`]'s slot array. Valid for the pool's
/// lifetime; never reused while a slot's refcount is nonzero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PktMemIndex(pub u32);

/// Controls how [`PacketPool::get`] / [`PacketPool::clone_packet`] stamp a
/// packet's receive time (`original_source/iron/common/include/packet.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketRecvTimeMode {
    /// Leave `recv_time` unset.
    NoTimestamp,
    /// Stamp with the current instant.
    #[default]
    NowTimestamp,
    /// Copy the source packet's `recv_time` (only meaningful for clones).
    CopyTimestamp,
}

struct Slot {
    packet: Packet,
    refcount: AtomicU32,
}

/// Fixed-capacity arena of packet buffers, backing every `Packet` handed to
/// the bpf and its collaborators. `get` never allocates past the
/// configured capacity: when the free list is empty it is a fatal
/// condition, not an error to propagate, matching the original's
/// fail-fast posture under memory pressure.
pub struct PacketPool {
    slots: Vec<Mutex<Option<Packet>>>,
    refcounts: Vec<AtomicU32>,
    free_list: Mutex<Vec<u32>>,
    capacity: usize,
}

impl PacketPool {
    /// Build a pool with `capacity` slots, all initially free.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        let refcounts = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        let free_list = Mutex::new((0..capacity as u32).rev().collect());
        PacketPool {
            slots,
            refcounts,
            free_list,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.free_list.lock().expect("pool free list poisoned").len()
    }

    fn take_free_slot(&self) -> u32 {
        let mut free = self.free_list.lock().expect("pool free list poisoned");
        match free.pop() {
            Some(idx) => idx,
            None => {
                tracing::error!(capacity = self.capacity, "packet pool exhausted");
                std::process::abort();
            }
        }
    }

    /// Claim a slot, copy `data` into it, and return its index with
    /// refcount 1. Fatal (process abort, after logging) if the pool is
    /// exhausted, matching spec.md §4.2.
    pub fn get(&self, data: &[u8], src_bin_id: BinId, mode: PacketRecvTimeMode) -> PktMemIndex {
        let idx = self.take_free_slot();
        let mut packet = Packet::new(data, src_bin_id);
        if mode == PacketRecvTimeMode::NowTimestamp {
            packet.set_recv_time(std::time::Instant::now());
        }
        self.refcounts[idx as usize].store(1, Ordering::SeqCst);
        *self.slots[idx as usize].lock().expect("pool slot poisoned") = Some(packet);
        PktMemIndex(idx)
    }

    /// Deep copy of the packet at `idx` into a new slot, with its own
    /// refcount of 1. `mode` governs whether the clone's `recv_time` is
    /// copied, reset to now, or left unset.
    pub fn clone_packet(&self, idx: PktMemIndex, mode: PacketRecvTimeMode) -> PktMemIndex {
        let new_idx = self.take_free_slot();
        let cloned = {
            let guard = self.slots[idx.0 as usize].lock().expect("pool slot poisoned");
            let src = guard.as_ref().expect("clone of freed packet slot");
            let mut c = src.clone();
            match mode {
                PacketRecvTimeMode::NoTimestamp => c.set_recv_time_opt(None),
                PacketRecvTimeMode::NowTimestamp => c.set_recv_time(std::time::Instant::now()),
                PacketRecvTimeMode::CopyTimestamp => {}
            }
            c
        };
        self.refcounts[new_idx as usize].store(1, Ordering::SeqCst);
        *self.slots[new_idx as usize].lock().expect("pool slot poisoned") = Some(cloned);
        PktMemIndex(new_idx)
    }

    /// Clone only header-relevant bytes (IP/UDP/TCP headers plus the
    /// packet's non-payload metadata), truncating the payload. Used when a
    /// duplicate only needs to carry forwarding metadata, e.g. zombie
    /// demotion of an already-admitted packet.
    pub fn clone_header_only(&self, idx: PktMemIndex, header_len: usize) -> PktMemIndex {
        let new_idx = self.take_free_slot();
        let cloned = {
            let guard = self.slots[idx.0 as usize].lock().expect("pool slot poisoned");
            let src = guard.as_ref().expect("clone of freed packet slot");
            let mut c = src.clone();
            let extra = c.len().saturating_sub(header_len);
            if extra > 0 {
                c.remove_tail(extra);
            }
            c
        };
        self.refcounts[new_idx as usize].store(1, Ordering::SeqCst);
        *self.slots[new_idx as usize].lock().expect("pool slot poisoned") = Some(cloned);
        PktMemIndex(new_idx)
    }

    /// Claim a slot for an already-constructed packet (e.g. a freshly built
    /// zombie), giving it refcount 1. Fatal (process abort) if the pool is
    /// exhausted, matching [`PacketPool::get`].
    pub fn insert(&self, packet: Packet) -> PktMemIndex {
        let new_idx = self.take_free_slot();
        self.refcounts[new_idx as usize].store(1, Ordering::SeqCst);
        *self.slots[new_idx as usize].lock().expect("pool slot poisoned") = Some(packet);
        PktMemIndex(new_idx)
    }

    /// Take another reference on the slot at `idx` without copying the
    /// buffer: bumps the atomic refcount and returns the same index. Used
    /// when the same packet is queued for multiple multicast destinations.
    pub fn shallow_copy(&self, idx: PktMemIndex) -> PktMemIndex {
        self.refcounts[idx.0 as usize].fetch_add(1, Ordering::SeqCst);
        idx
    }

    /// Release one reference on `idx`. When the refcount reaches zero the
    /// slot is cleared and returned to the free list.
    pub fn recycle(&self, idx: PktMemIndex) {
        let prev = self.refcounts[idx.0 as usize].fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            *self.slots[idx.0 as usize].lock().expect("pool slot poisoned") = None;
            self.free_list.lock().expect("pool free list poisoned").push(idx.0);
        } else if prev == 0 {
            tracing::warn!(slot = idx.0, "recycle called on already-free pool slot");
            self.refcounts[idx.0 as usize].store(0, Ordering::SeqCst);
        }
    }

    /// Run `f` with a reference to the packet at `idx`.
    pub fn with_packet<R>(&self, idx: PktMemIndex, f: impl FnOnce(&Packet) -> R) -> R {
        let guard = self.slots[idx.0 as usize].lock().expect("pool slot poisoned");
        let pkt = guard.as_ref().expect("access to freed packet slot");
        f(pkt)
    }

    /// Run `f` with a mutable reference to the packet at `idx`.
    pub fn with_packet_mut<R>(&self, idx: PktMemIndex, f: impl FnOnce(&mut Packet) -> R) -> R {
        let mut guard = self.slots[idx.0 as usize].lock().expect("pool slot poisoned");
        let pkt = guard.as_mut().expect("access to freed packet slot");
        f(pkt)
    }

    /// Refcount currently held on `idx`, for diagnostics and tests.
    pub fn refcount(&self, idx: PktMemIndex) -> u32 {
        self.refcounts[idx.0 as usize].load(Ordering::SeqCst)
    }

    /// `idx` reinterpreted back into a [`PktMemIndex`] after being passed
    /// through an opaque wire-level handle (e.g. a channel message
    /// carrying only the raw slot number).
    pub fn get_from_index(&self, raw: u32) -> PktMemIndex {
        PktMemIndex(raw)
    }
}
