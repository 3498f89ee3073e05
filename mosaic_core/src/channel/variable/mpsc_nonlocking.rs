//! Multiple-producer single-consumer channel, variable-size messages,
//! non-locking variant.
//!
//! Mirrors the fixed-size non-locking layout: the consumer owns one
//! variable-size SPSC channel per producer and serves them round-robin.

use crate::channel::variable::spsc;
use crate::error::{MosaicError, MosaicResult};

/// A non-locking MPSC producer is exactly a variable-size SPSC producer
/// over its own sub-channel
pub type Producer = spsc::Producer;

/// Consumer endpoint over a bank of variable-size SPSC sub-channels.
///
/// Fairness policy: round-robin starting from the sub-channel after the
/// last served one.
pub struct Consumer {
    channels: Vec<spsc::Consumer>,
    last_served: usize,
    last_peeked: Option<usize>,
}

impl Consumer {
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

    /// Total number of messages across all sub-channels, as last observed
    pub fn depth(&self) -> u64 {
        self.channels.iter().map(spsc::Consumer::depth).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(spsc::Consumer::is_empty)
    }

    /// Find the next non-empty sub-channel round-robin and return
    /// `(channel id, [offset, length])` of its oldest message
    pub fn peek(&mut self) -> MosaicResult<(usize, [usize; 2])> {
        let count = self.channels.len();
        for step in 1..=count {
            let id = (self.last_served + step) % count;
            let channel = &mut self.channels[id];
            channel.update_depth()?;
            if channel.is_empty() {
                continue;
            }
            let entry = channel.peek()?;
            self.last_served = id;
            self.last_peeked = Some(id);
            return Ok((id, entry));
        }
        Err(MosaicError::WouldUnderflow {
            requested: 1,
            depth: 0,
        })
    }

    /// Pop the message returned by the most recent `peek`
    pub fn pop(&mut self) -> MosaicResult<()> {
        let id = self
            .last_peeked
            .take()
            .ok_or_else(|| MosaicError::logic("pop without a preceding peek"))?;
        self.channels[id].pop()
    }

    pub fn channel(&self, id: usize) -> Option<&spsc::Consumer> {
        self.channels.get(id)
    }

    pub fn channel_mut(&mut self, id: usize) -> Option<&mut spsc::Consumer> {
        self.channels.get_mut(id)
    }
}
