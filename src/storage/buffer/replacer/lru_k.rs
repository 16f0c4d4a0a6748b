use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::error::ReplacerError;

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    access_count: usize,
    evictable: bool,
    in_history: bool,
}

#[derive(Debug)]
struct ReplacerState {
    /// Frames with fewer than K accesses, oldest insertion at the front
    history: VecDeque<FrameId>,
    /// Frames with at least K accesses, oldest promotion at the front
    cache: VecDeque<FrameId>,
    entries: HashMap<FrameId, FrameEntry>,
    /// Number of evictable tracked frames
    curr_size: usize,
}

/// LRU-K page replacement policy.
///
/// A frame's first K-1 accesses keep it in a FIFO history list; its Kth
/// access promotes it to the cache list, and later accesses refresh its
/// position there. Victims are taken from history before cache, oldest
/// first, so frames without K references always lose to frames with them.
///
/// Capacity bounds the evictable population, not the frame ids themselves:
/// the replacer is full once `capacity` tracked frames are evictable.
pub struct LruKReplacer {
    capacity: usize,
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            capacity,
            k,
            state: Mutex::new(ReplacerState {
                history: VecDeque::with_capacity(capacity),
                cache: VecDeque::with_capacity(capacity),
                entries: HashMap::with_capacity(capacity),
                curr_size: 0,
            }),
        }
    }

    /// Record an access to `frame_id`, admitting the frame if it is new.
    ///
    /// Fails with [`ReplacerError::Full`] when an untracked frame arrives
    /// while the replacer is full; the caller must evict before recording.
    pub fn record_access(&self, frame_id: FrameId) -> Result<(), ReplacerError> {
        let state = &mut *self.state.lock();

        if !state.entries.contains_key(&frame_id) {
            if state.curr_size >= self.capacity {
                return Err(ReplacerError::Full(frame_id));
            }
            state.entries.insert(
                frame_id,
                FrameEntry {
                    access_count: 0,
                    evictable: false,
                    in_history: true,
                },
            );
            state.history.push_back(frame_id);
        }

        let entry = state.entries.get_mut(&frame_id).unwrap();
        entry.access_count += 1;
        if entry.access_count < self.k {
            return Ok(());
        }

        // Kth or later access: move to the back of the cache list.
        let was_in_history = entry.in_history;
        entry.in_history = false;
        if was_in_history {
            remove_from(&mut state.history, frame_id);
        } else {
            remove_from(&mut state.cache, frame_id);
        }
        state.cache.push_back(frame_id);
        Ok(())
    }

    /// Flip whether `frame_id` may be chosen as a victim. Untracked frames
    /// are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let state = &mut *self.state.lock();
        let Some(entry) = state.entries.get_mut(&frame_id) else {
            return;
        };
        if entry.evictable != evictable {
            entry.evictable = evictable;
            if evictable {
                state.curr_size += 1;
            } else {
                state.curr_size -= 1;
            }
        }
    }

    /// Choose and untrack a victim frame, or `None` if nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let state = &mut *self.state.lock();

        let entries = &state.entries;
        let victim = state
            .history
            .iter()
            .copied()
            .find(|id| entries[id].evictable)
            .or_else(|| {
                state
                    .cache
                    .iter()
                    .copied()
                    .find(|id| entries[id].evictable)
            })?;

        let entry = state.entries.remove(&victim).unwrap();
        if entry.in_history {
            remove_from(&mut state.history, victim);
        } else {
            remove_from(&mut state.cache, victim);
        }
        state.curr_size -= 1;
        Some(victim)
    }

    /// Untrack `frame_id` regardless of its position. Removing a
    /// non-evictable frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let state = &mut *self.state.lock();
        let Some(entry) = state.entries.remove(&frame_id) else {
            return;
        };
        assert!(entry.evictable, "removed frame {} is pinned", frame_id);
        if entry.in_history {
            remove_from(&mut state.history, frame_id);
        } else {
            remove_from(&mut state.cache, frame_id);
        }
        state.curr_size -= 1;
    }

    /// Number of evictable frames currently tracked
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&id| id == frame_id) {
        list.remove(pos);
    }
}
