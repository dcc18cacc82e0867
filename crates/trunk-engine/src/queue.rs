//! Sample batch queues
//!
//! A source thread hands off batches of samples to a channel pipeline
//! without ever blocking: the producer side is an unbounded send, the
//! consumer side is drained by the fixed-period drain task with a bounded
//! batch cap per tick. Unconsumed batches accumulate between ticks rather
//! than backpressuring the source.

use std::time::Duration;

use tokio::sync::mpsc;

/// Fixed period of the per-pipeline drain task
pub const DRAIN_PERIOD: Duration = Duration::from_millis(50);

/// Maximum complex batches drained per tick
pub const COMPLEX_DRAIN_MAX: usize = 16;

/// Maximum real batches drained per tick
pub const REAL_DRAIN_MAX: usize = 4;

/// One complex (I/Q) baseband sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexSample {
    /// In-phase component
    pub i: f32,
    /// Quadrature component
    pub q: f32,
}

/// An immutable batch of complex samples handed off by a source
#[derive(Debug, Clone, Default)]
pub struct ComplexBatch(pub Vec<ComplexSample>);

/// An immutable batch of real (demodulated) samples handed off by a source
#[derive(Debug, Clone, Default)]
pub struct RealBatch(pub Vec<f32>);

/// Producer half of a sample batch queue
///
/// Cheap to clone; `send` never blocks and may be called from any thread.
#[derive(Debug)]
pub struct BatchSender<B>(mpsc::UnboundedSender<B>);

impl<B> Clone for BatchSender<B> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<B> BatchSender<B> {
    /// Enqueue a batch; returns false when the consumer side is gone
    pub fn send(&self, batch: B) -> bool {
        self.0.send(batch).is_ok()
    }
}

/// Consumer half of a sample batch queue
#[derive(Debug)]
pub struct BatchQueue<B>(mpsc::UnboundedReceiver<B>);

impl<B> BatchQueue<B> {
    /// Pop at most `max` batches into `out` without waiting
    ///
    /// Returns the number of batches drained. Never blocks: a tick under
    /// an empty queue drains nothing and returns immediately.
    pub fn drain_into(&mut self, out: &mut Vec<B>, max: usize) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.0.try_recv() {
                Ok(batch) => {
                    out.push(batch);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        drained
    }
}

/// Create a connected producer/consumer queue pair
pub fn batch_queue<B>() -> (BatchSender<B>, BatchQueue<B>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BatchSender(tx), BatchQueue(rx))
}
