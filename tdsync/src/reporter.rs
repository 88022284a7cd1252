use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::types::StreamId;

/// Completion status of a stream as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Running,
    Complete,
    Incomplete,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Running => write!(f, "running"),
            StreamStatus::Complete => write!(f, "complete"),
            StreamStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Outcome of one stream for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncSummary {
    /// Number of records written, or `None` when it was not tracked.
    ///
    /// `None` does not mean zero: consumers must assume an unknown, non-zero number of
    /// records was written. See [`StreamSyncSummary::may_have_written_records`].
    pub records_written: Option<u64>,
    pub status_from_source: StreamStatus,
}

impl StreamSyncSummary {
    /// Returns `true` unless the summary proves that nothing was written.
    ///
    /// Retry and accounting decisions must rely on this instead of reading
    /// `records_written` directly.
    pub fn may_have_written_records(&self) -> bool {
        self.records_written.is_none_or(|written| written > 0)
    }
}

/// Builds stream summaries from the producer and materialization counts.
pub struct SyncOutcomeReporter;

impl SyncOutcomeReporter {
    /// Summarizes a stream whose pipeline ran to completion.
    ///
    /// The written count comes from the record producer when it tracked one, otherwise from
    /// materialization when it saw any record. A stream the source still reports as running
    /// is invalid input once its pipeline finished.
    pub fn summarize(
        stream: &StreamId,
        producer_written: Option<u64>,
        applied: Option<u64>,
        status_from_source: StreamStatus,
    ) -> SyncResult<StreamSyncSummary> {
        if status_from_source == StreamStatus::Running {
            bail!(
                ErrorKind::InvalidData,
                "Source reported a finished stream as still running",
                format!("stream {stream}")
            );
        }

        let records_written = match (producer_written, applied) {
            (Some(written), _) => Some(written),
            (None, Some(applied)) if applied > 0 => Some(applied),
            _ => None,
        };

        Ok(StreamSyncSummary {
            records_written,
            status_from_source,
        })
    }

    /// Summarizes a stream whose pipeline failed.
    pub fn summarize_failure(producer_written: Option<u64>) -> StreamSyncSummary {
        StreamSyncSummary {
            records_written: producer_written,
            status_from_source: StreamStatus::Incomplete,
        }
    }
}

/// Outcome of one stream in a [`SyncReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub summary: StreamSyncSummary,
    /// Error that stopped the stream pipeline, if any.
    pub error: Option<SyncError>,
}

/// Outcome of a sync run, one entry per requested stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    streams: BTreeMap<StreamId, StreamReport>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a stream. A stream can only be reported once.
    pub fn insert(&mut self, stream: StreamId, report: StreamReport) -> SyncResult<()> {
        if self.streams.contains_key(&stream) {
            bail!(
                ErrorKind::InvalidData,
                "Stream was reported more than once",
                format!("stream {stream}")
            );
        }

        self.streams.insert(stream, report);

        Ok(())
    }

    pub fn get(&self, stream: &StreamId) -> Option<&StreamReport> {
        self.streams.get(stream)
    }

    pub fn summary(&self, stream: &StreamId) -> Option<&StreamSyncSummary> {
        self.streams.get(stream).map(|report| &report.summary)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamId, &StreamReport)> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns `true` if every stream completed without error.
    pub fn is_success(&self) -> bool {
        self.streams.values().all(|report| {
            report.error.is_none() && report.summary.status_from_source == StreamStatus::Complete
        })
    }

    /// Returns the errors of failed streams, in stream order.
    pub fn errors(&self) -> Vec<&SyncError> {
        self.streams
            .values()
            .filter_map(|report| report.error.as_ref())
            .collect()
    }
}
