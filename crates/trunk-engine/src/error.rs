//! Error types for the channel engine

use thiserror::Error;

use crate::channel::ChannelId;
use crate::decoder::DecodeError;
use crate::scheduler::ScheduleError;
use crate::source::SourceError;

/// Errors that can occur while operating a channel pipeline
///
/// Failures local to one collaborator never abort the pipeline as a whole;
/// these errors report the degraded capability to the caller and the
/// unified event stream while the rest of the pipeline keeps running.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Source acquisition failed; the pipeline continues sourceless
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// The drain task could not be scheduled; the fresh source was disposed
    #[error("drain task scheduling rejected: {0}")]
    SchedulingRejected(#[from] ScheduleError),

    /// A recorder failed to start or stop
    #[error("recorder I/O failure on [{file}]: {source}")]
    RecorderIo {
        /// Recorder file name
        file: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Decode fault surfaced outside a drain tick
    #[error("decode fault: {0}")]
    Decode(#[from] DecodeError),

    /// Unknown channel identifier
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Operation on a pipeline that was already disposed
    #[error("pipeline already disposed")]
    Disposed,
}
