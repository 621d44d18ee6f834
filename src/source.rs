use crate::error::{MirrorError, Result};
use crate::event::RemoteEvent;
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One event handed out by an [`EventSource`], identified by a tag the
/// source uses to match the acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub event: RemoteEvent,
}

/// A subscription to the remote event stream.
///
/// Sources deliver events for a given key in the order the remote side
/// emitted them. An unacknowledged delivery may be handed out again later;
/// the reconciler treats redelivery as a no-op.
pub trait EventSource {
    /// The next delivery, or `None` once the stream is exhausted.
    fn next_delivery(&mut self) -> Result<Option<Delivery>>;

    /// Confirm that the delivery with `tag` was durably applied.
    fn ack(&mut self, tag: u64) -> Result<()>;
}

/// Cooperative cancellation shared between the caller and a running
/// reconciler.
///
/// ```
/// use mirrorfold::Shutdown;
///
/// let shutdown = Shutdown::new();
/// let handle = shutdown.clone();
/// handle.trigger();
/// assert!(shutdown.is_triggered());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Shutdown::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory source with at-least-once semantics.
///
/// Deliveries that were handed out but never acknowledged can be put back
/// at the front of the queue with [`MemorySource::requeue_unacked`], which is
/// how a real subscription behaves after a consumer failure.
#[derive(Debug, Default)]
pub struct MemorySource {
    pending: VecDeque<Delivery>,
    in_flight: Vec<Delivery>,
    acked: Vec<u64>,
    next_tag: u64,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = RemoteEvent>) -> Self {
        let mut source = MemorySource::new();
        for event in events {
            source.push(event);
        }
        source
    }

    /// Queue an event and return its tag.
    pub fn push(&mut self, event: RemoteEvent) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.pending.push_back(Delivery { tag, event });
        tag
    }

    /// Put every unacknowledged delivery back in front, in original order.
    pub fn requeue_unacked(&mut self) -> usize {
        let count = self.in_flight.len();
        for delivery in self.in_flight.drain(..).rev() {
            self.pending.push_front(delivery);
        }
        count
    }

    pub fn acked(&self) -> &[u64] {
        &self.acked
    }

    pub fn unacked(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl EventSource for MemorySource {
    fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        let Some(delivery) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.in_flight.push(delivery.clone());
        Ok(Some(delivery))
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        let Some(pos) = self.in_flight.iter().position(|d| d.tag == tag) else {
            return Err(MirrorError::Source(
                format!("ack for unknown delivery {tag}").into(),
            ));
        };
        self.in_flight.remove(pos);
        self.acked.push(tag);
        Ok(())
    }
}

/// Events captured as JSON lines, one [`RemoteEvent`] per line. The tag is
/// the 1-based line number; blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line_no: u64,
    last_acked: Option<u64>,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource {
            reader,
            line_no: 0,
            last_acked: None,
        }
    }

    /// Line number of the newest acknowledged event, for resuming a capture.
    pub fn last_acked(&self) -> Option<u64> {
        self.last_acked
    }
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| MirrorError::Source(Box::new(e)))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = serde_json::from_str(line).map_err(|e| {
                MirrorError::Source(format!("line {}: {e}", self.line_no).into())
            })?;
            return Ok(Some(Delivery {
                tag: self.line_no,
                event,
            }));
        }
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        self.last_acked = Some(self.last_acked.map_or(tag, |t| t.max(tag)));
        Ok(())
    }
}
