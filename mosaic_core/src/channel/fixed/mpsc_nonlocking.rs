//! Multiple-producer single-consumer channel, fixed-size tokens,
//! non-locking variant.
//!
//! The consumer owns one independent SPSC channel per producer; each
//! producer owns exactly one of them. No global lock exists and the hot
//! push/pop paths are wait-free; the price is one coordination buffer and
//! one progress pump per producer on the consumer side.

use crate::channel::fixed::spsc;
use crate::error::{MosaicError, MosaicResult};

/// A non-locking MPSC producer is exactly an SPSC producer over its own
/// sub-channel
pub type Producer = spsc::Producer;

/// Consumer endpoint over a bank of SPSC sub-channels, one per producer.
///
/// Fairness policy: peeks scan the sub-channels round-robin, starting from
/// the one after the last served; a sub-channel that stayed empty since the
/// last scan is skipped.
pub struct Consumer {
    channels: Vec<spsc::Consumer>,
    last_served: usize,
    last_peeked: Option<usize>,
}

impl Consumer {
    /// Build the consumer over its sub-channel consumers, indexed by
    /// producer id
    pub fn new(channels: Vec<spsc::Consumer>) -> MosaicResult<Self> {
        if channels.is_empty() {
            return Err(MosaicError::logic(
                "attempting to create an MPSC consumer with zero sub-channels",
            ));
        }
        let last_served = channels.len() - 1;
        Ok(Self {
            channels,
            last_served,
            last_peeked: None,
        })
    }

    /// Number of sub-channels (producers)
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Refresh every sub-channel's depth
    pub fn update_depth(&mut self) -> MosaicResult<()> {
        for channel in &mut self.channels {
            channel.update_depth()?;
        }
        Ok(())
    }

    /// Total number of tokens across all sub-channels, as last observed
    pub fn depth(&self) -> u64 {
        self.channels.iter().map(spsc::Consumer::depth).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(spsc::Consumer::is_empty)
    }

    /// Find the next non-empty sub-channel round-robin and return
    /// `(channel id, position within its token buffer)` of its oldest token.
    ///
    /// Fails with `WouldUnderflow` when every sub-channel is empty.
    pub fn peek(&mut self) -> MosaicResult<(usize, usize)> {
        let count = self.channels.len();
        for step in 1..=count {
            let id = (self.last_served + step) % count;
            let channel = &mut self.channels[id];
            channel.update_depth()?;
            if channel.is_empty() {
                continue;
            }
            let position = channel.peek(0)?;
            self.last_served = id;
            self.last_peeked = Some(id);
            return Ok((id, position));
        }
        Err(MosaicError::WouldUnderflow {
            requested: 1,
            depth: 0,
        })
    }

    /// Pop the token returned by the most recent `peek`.
    ///
    /// A pop with no preceding peek is API misuse.
    pub fn pop(&mut self) -> MosaicResult<()> {
        let id = self
            .last_peeked
            .take()
            .ok_or_else(|| MosaicError::logic("pop without a preceding peek"))?;
        self.channels[id].pop(1)
    }

    /// Direct access to one sub-channel consumer, e.g. to size reads off a
    /// peeked position
    pub fn channel(&self, id: usize) -> Option<&spsc::Consumer> {
        self.channels.get(id)
    }
}
