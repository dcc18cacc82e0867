//! Recorders
//!
//! Recorders persist a channel's audio or baseband output. File formats
//! and disk I/O live behind the `Recorder` trait; the pipeline only starts
//! them, stops them, and wires their sink to the matching decoder tap.

use std::io;

use tokio::sync::mpsc;

use crate::channel::ChannelConfig;
use crate::queue::ComplexSample;

/// The sample stream a recorder consumes
#[derive(Debug)]
pub enum RecorderSink {
    /// Demodulated audio samples from the decoder's real output
    Audio(mpsc::UnboundedSender<f32>),
    /// Complex baseband samples from the decoder's complex output
    Baseband(mpsc::UnboundedSender<ComplexSample>),
}

/// A recorder for one channel's output
pub trait Recorder: Send {
    /// File name this recorder writes to, for logging
    fn file_name(&self) -> &str;

    /// Open the output; failure skips this recorder only
    fn start(&mut self) -> io::Result<()>;

    /// Flush and close the output
    fn stop(&mut self) -> io::Result<()>;

    /// The sink the pipeline should feed from the decoder
    fn sink(&self) -> RecorderSink;
}

/// Builds the recorders configured for a channel
pub trait RecorderProvider: Send + Sync {
    /// Build recorders for the channel; empty when recording is off
    fn build(&self, config: &ChannelConfig) -> Vec<Box<dyn Recorder>>;
}
