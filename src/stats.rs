//! Per-response latency statistics.
//!
//! Each worker owns a pre-sized sample buffer and appends one [`Sample`] per
//! response it collects, so the hot path never allocates and never takes a
//! lock. On shutdown the buffers are drained into a whitespace-separated
//! report, one row per response.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::protocol::MsgKind;

/// One collected response.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// Responding participant id.
    pub participant: i16,
    /// Participant-side retransmissions, as echoed in the message.
    pub client_rtos: i16,
    /// Coordinator-side retransmissions, as echoed in the message.
    pub server_rtos: i16,
    /// Request send time, microseconds since the epoch.
    pub start_us: i64,
    /// Response receive time, microseconds since the epoch.
    pub end_us: i64,
    /// Response kind.
    pub kind: MsgKind,
}

/// Fixed-capacity sample buffer owned by one worker.
pub struct StatsBuffer {
    worker: usize,
    samples: Vec<Sample>,
}

impl StatsBuffer {
    pub fn new(worker: usize, capacity: usize) -> Self {
        Self {
            worker,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample. Fails when the buffer is at capacity, which ends the
    /// run rather than silently dropping measurements.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if self.samples.len() == self.samples.capacity() {
            return Err(Error::StatsExhausted(self.worker));
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// Write the report for all workers' buffers.
///
/// Columns: start time relative to the earliest sample, worker, participant,
/// both retransmission counters, absolute start and end, the start-to-end
/// delta and the response kind. Times in microseconds.
pub fn write_report<W: Write>(out: &mut W, buffers: &[StatsBuffer]) -> io::Result<()> {
    writeln!(
        out,
        "rel_start worker participant c_rtos s_rtos start end delta kind"
    )?;

    let earliest = buffers
        .iter()
        .flat_map(|b| b.samples.iter())
        .map(|s| s.start_us)
        .min()
        .unwrap_or(0);

    for buffer in buffers {
        for s in &buffer.samples {
            writeln!(
                out,
                "{} {} {} {} {} {} {} {} {}",
                s.start_us - earliest,
                buffer.worker,
                s.participant,
                s.client_rtos,
                s.server_rtos,
                s.start_us,
                s.end_us,
                s.end_us - s.start_us,
                s.kind,
            )?;
        }
    }
    Ok(())
}

/// Write the report to a file, creating or truncating it.
pub fn write_report_to_path(path: &Path, buffers: &[StatsBuffer]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_report(&mut out, buffers)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(participant: i16, start_us: i64, end_us: i64) -> Sample {
        Sample {
            participant,
            client_rtos: 0,
            server_rtos: 0,
            start_us,
            end_us,
            kind: MsgKind::VoteYes,
        }
    }

    #[test]
    fn test_buffer_fills_then_errors() {
        let mut buf = StatsBuffer::new(0, 2);
        buf.push(sample(1, 10, 20)).unwrap();
        buf.push(sample(2, 11, 21)).unwrap();
        assert!(matches!(
            buf.push(sample(3, 12, 22)),
            Err(Error::StatsExhausted(0))
        ));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_report_rows_and_relative_start() {
        let mut a = StatsBuffer::new(0, 8);
        a.push(sample(1, 1_000, 1_450)).unwrap();
        let mut b = StatsBuffer::new(1, 8);
        b.push(sample(2, 1_200, 1_500)).unwrap();

        let mut out = Vec::new();
        write_report(&mut out, &[a, b]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("rel_start worker participant"));
        // Earliest sample is the zero point; delta is end minus start.
        assert_eq!(lines[1], "0 0 1 0 0 1000 1450 450 vote-yes");
        assert_eq!(lines[2], "200 1 2 0 0 1200 1500 300 vote-yes");
    }

    #[test]
    fn test_empty_report_has_header_only() {
        let mut out = Vec::new();
        write_report(&mut out, &[StatsBuffer::new(0, 4)]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
