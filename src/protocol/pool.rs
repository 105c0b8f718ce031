//! Reply Buffer Pool
//!
//! Connections format their replies into buffers borrowed from a pool shared
//! by the whole server, so steady traffic does not allocate a fresh buffer
//! per reply.
//!
//! Buffers are grouped in capacity tiers. Each tier keeps at most
//! `max_per_tier` idle buffers; extra buffers are simply dropped.
//! [`BufferPool::release`] takes the buffer by value, so a buffer cannot be
//! touched after it went back to the pool.

use bytes::BytesMut;
use std::sync::{Mutex, PoisonError};

/// Capacities of the pool tiers, smallest first.
pub const TIERS: [usize; 3] = [256, 4 * 1024, 64 * 1024];

/// Default number of idle buffers retained per tier.
pub const DEFAULT_MAX_PER_TIER: usize = 64;

/// A tiered pool of reusable `BytesMut` buffers.
#[derive(Debug)]
pub struct BufferPool {
    tiers: [Mutex<Vec<BytesMut>>; TIERS.len()],
    max_per_tier: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_TIER)
    }
}

impl BufferPool {
    /// Creates an empty pool retaining at most `max_per_tier` buffers per tier.
    pub fn new(max_per_tier: usize) -> Self {
        Self {
            tiers: Default::default(),
            max_per_tier,
        }
    }

    /// Takes an empty buffer able to hold at least `size_hint` bytes.
    pub fn acquire(&self, size_hint: usize) -> BytesMut {
        match tier_for(size_hint) {
            Some(tier) => {
                let reused = self.tiers[tier]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop();
                reused.unwrap_or_else(|| BytesMut::with_capacity(TIERS[tier]))
            }
            None => BytesMut::with_capacity(size_hint),
        }
    }

    /// Gives a buffer back to the pool.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();

        // A buffer goes back to the largest tier it can still serve.
        let Some(tier) = TIERS.iter().rposition(|&cap| buf.capacity() >= cap) else {
            return;
        };
        if buf.capacity() > TIERS[TIERS.len() - 1] * 2 {
            return;
        }

        let mut idle = self.tiers[tier]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_per_tier {
            idle.push(buf);
        }
    }

    /// Number of idle buffers per tier.
    pub fn idle_counts(&self) -> [usize; TIERS.len()] {
        std::array::from_fn(|tier| {
            self.tiers[tier]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        })
    }
}

fn tier_for(size: usize) -> Option<usize> {
    TIERS.iter().position(|&cap| size <= cap)
}
