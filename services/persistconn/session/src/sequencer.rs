//! Ordered response sequencing.
//!
//! Every event that produces output reserves a slot in arrival order. Slots
//! complete in any order; the flusher writes the longest contiguous run of
//! completed slots starting at the head, so output order always equals
//! reservation order.
//!
//! Reservation and completion are split between a cloneable [`Sequencer`]
//! (used by the read loop and handler tasks) and a single [`Flusher`] that
//! owns the output stream. Completions travel over an unbounded channel, so
//! completing a slot never blocks on output.

use crate::error::ServerError;
use bytes::BytesMut;
use pconn_wire::Outbound;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Body written for a slot whose ticket was dropped without a response
pub const ABANDONED_BODY: &str = "response slot abandoned";

/// Position of a slot in the output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u64);

#[derive(Debug)]
struct Completion {
    id: SlotId,
    outbound: Outbound,
}

/// Completed-but-unflushed slots, keyed by position.
///
/// `head` is the first slot not yet flushed. Everything below it has been
/// handed out by [`PendingQueue::drain_ready`] exactly once.
#[derive(Debug, Default)]
pub struct PendingQueue {
    head: u64,
    waiting: BTreeMap<u64, Outbound>,
}

impl PendingQueue {
    /// Empty queue expecting slot 0 first
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed slot.
    ///
    /// Returns `false` when the slot was already flushed or already
    /// completed; the first completion wins.
    pub fn complete(&mut self, id: SlotId, outbound: Outbound) -> bool {
        if id.0 < self.head || self.waiting.contains_key(&id.0) {
            return false;
        }
        self.waiting.insert(id.0, outbound);
        true
    }

    /// Remove and return the contiguous completed run at the head
    pub fn drain_ready(&mut self) -> Vec<Outbound> {
        let mut ready = Vec::new();
        while let Some(outbound) = self.waiting.remove(&self.head) {
            ready.push(outbound);
            self.head += 1;
        }
        ready
    }

    /// First slot not yet flushed
    pub fn head(&self) -> SlotId {
        SlotId(self.head)
    }

    /// Number of completed slots waiting behind an incomplete one
    pub fn blocked(&self) -> usize {
        self.waiting.len()
    }
}

/// Create a connected sequencer/flusher pair
pub fn channel() -> (Sequencer, Flusher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sequencer = Sequencer {
        next: Arc::new(AtomicU64::new(0)),
        completions: tx,
    };
    let flusher = Flusher {
        queue: PendingQueue::new(),
        completions: rx,
    };
    (sequencer, flusher)
}

/// Hands out slots in call order
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: Arc<AtomicU64>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Sequencer {
    /// Reserve the next slot.
    ///
    /// Must be called from the read loop in frame arrival order; the
    /// reservation order is the output order.
    pub fn reserve(&self) -> SlotTicket {
        let id = SlotId(self.next.fetch_add(1, Ordering::SeqCst));
        debug!(component = "sequencer", slot = id.0, "Reserved slot");
        SlotTicket {
            id,
            completions: Some(self.completions.clone()),
        }
    }

    /// Reserve a slot that is already complete
    pub fn push_ready(&self, outbound: impl Into<Outbound>) -> SlotId {
        let ticket = self.reserve();
        let id = ticket.id();
        ticket.complete(outbound);
        id
    }

    /// Number of slots reserved so far
    pub fn reserved(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Exclusive right to complete one slot.
///
/// A ticket dropped without [`SlotTicket::complete`] completes its slot
/// with a 500 so later slots are never held back forever.
#[derive(Debug)]
pub struct SlotTicket {
    id: SlotId,
    completions: Option<mpsc::UnboundedSender<Completion>>,
}

impl SlotTicket {
    /// Position of this ticket's slot
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Fill the slot and signal the flusher
    pub fn complete(mut self, outbound: impl Into<Outbound>) {
        self.send(outbound.into());
    }

    fn send(&mut self, outbound: Outbound) {
        if let Some(tx) = self.completions.take() {
            if tx
                .send(Completion {
                    id: self.id,
                    outbound,
                })
                .is_err()
            {
                debug!(
                    component = "sequencer",
                    slot = self.id.0,
                    "Flusher gone; dropping completion"
                );
            }
        }
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        if self.completions.is_some() {
            warn!(
                component = "sequencer",
                slot = self.id.0,
                "Slot ticket dropped without a response"
            );
            self.send(Outbound::Response(pconn_wire::Response::internal_error(
                ABANDONED_BODY,
            )));
        }
    }
}

/// Sole writer of the output stream
#[derive(Debug)]
pub struct Flusher {
    queue: PendingQueue,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl Flusher {
    /// Write every completed prefix until all sequencers and tickets are gone.
    ///
    /// Returns the total number of slots written.
    pub async fn run<W>(mut self, mut writer: W) -> Result<u64, ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;

        while let Some(completion) = self.completions.recv().await {
            self.accept(completion);
            // Coalesce whatever else is already queued into one write
            while let Ok(completion) = self.completions.try_recv() {
                self.accept(completion);
            }
            written += self.flush_ready(&mut writer).await? as u64;
        }

        if self.queue.blocked() > 0 {
            warn!(
                component = "sequencer",
                blocked = self.queue.blocked(),
                head = self.queue.head().0,
                "Output closed with unflushed slots"
            );
        }

        debug!(component = "sequencer", written, "Flusher finished");
        Ok(written)
    }

    fn accept(&mut self, completion: Completion) {
        let Completion { id, outbound } = completion;
        if !self.queue.complete(id, outbound) {
            warn!(
                component = "sequencer",
                slot = id.0,
                "Ignoring duplicate completion"
            );
        }
    }

    /// Write the ready prefix, returning how many slots were flushed
    async fn flush_ready<W>(&mut self, writer: &mut W) -> Result<usize, ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        let ready = self.queue.drain_ready();
        if ready.is_empty() {
            return Ok(0);
        }

        let mut buf = BytesMut::new();
        for outbound in &ready {
            match outbound.encode() {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(e) => {
                    // A response that cannot be serialized still owns its position
                    warn!(component = "sequencer", "Failed to encode response: {}", e);
                    let fallback =
                        Outbound::Response(pconn_wire::Response::internal_error(e.to_string()))
                            .encode()?;
                    buf.extend_from_slice(&fallback);
                }
            }
        }

        writer.write_all(&buf).await.map_err(ServerError::Output)?;
        writer.flush().await.map_err(ServerError::Output)?;

        debug!(
            component = "sequencer",
            flushed = ready.len(),
            head = self.queue.head().0,
            "Flushed ready slots"
        );
        Ok(ready.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pconn_wire::{OutboundReader, Response};

    fn body(outbound: &Outbound) -> &str {
        match outbound {
            Outbound::Response(response) => &response.body,
            Outbound::InitAck => "<ack>",
        }
    }

    #[test]
    fn test_prefix_only_flush() {
        let mut queue = PendingQueue::new();

        assert!(queue.complete(SlotId(1), Response::ok("b").into()));
        assert!(queue.complete(SlotId(2), Response::ok("c").into()));
        assert!(queue.drain_ready().is_empty());
        assert_eq!(queue.blocked(), 2);

        assert!(queue.complete(SlotId(0), Response::ok("a").into()));
        let ready = queue.drain_ready();
        assert_eq!(ready.iter().map(body).collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(queue.head(), SlotId(3));
        assert_eq!(queue.blocked(), 0);
    }

    #[test]
    fn test_duplicate_and_stale_completions() {
        let mut queue = PendingQueue::new();
        assert!(queue.complete(SlotId(0), Response::ok("first").into()));
        assert!(!queue.complete(SlotId(0), Response::ok("second").into()));

        let ready = queue.drain_ready();
        assert_eq!(body(&ready[0]), "first");
        assert!(!queue.complete(SlotId(0), Response::ok("late").into()));
    }

    #[test]
    fn test_reserve_is_monotonic() {
        let (sequencer, _flusher) = channel();
        let clone = sequencer.clone();

        let a = sequencer.reserve();
        let b = clone.reserve();
        let c = sequencer.reserve();
        assert_eq!((a.id(), b.id(), c.id()), (SlotId(0), SlotId(1), SlotId(2)));
        assert_eq!(sequencer.reserved(), 3);
    }

    #[tokio::test]
    async fn test_flusher_writes_in_reservation_order() {
        let (sequencer, flusher) = channel();
        let (client, server) = tokio::io::duplex(4096);
        let flush_task = tokio::spawn(flusher.run(server));

        let first = sequencer.reserve();
        let ack = sequencer.reserve();
        let third = sequencer.reserve();

        third.complete(Response::ok("third"));
        ack.complete(Outbound::InitAck);
        first.complete(Response::ok("first"));
        drop(sequencer);

        assert_eq!(flush_task.await.unwrap().unwrap(), 3);

        let outputs = OutboundReader::new(tokio::io::BufReader::new(client))
            .read_all()
            .await
            .unwrap();
        assert_eq!(
            outputs.iter().map(body).collect::<Vec<_>>(),
            ["first", "<ack>", "third"]
        );
    }

    #[tokio::test]
    async fn test_dropped_ticket_releases_later_slots() {
        let (sequencer, flusher) = channel();
        let (client, server) = tokio::io::duplex(4096);
        let flush_task = tokio::spawn(flusher.run(server));

        let lost = sequencer.reserve();
        sequencer.push_ready(Response::ok("after"));
        drop(lost);
        drop(sequencer);

        assert_eq!(flush_task.await.unwrap().unwrap(), 2);

        let outputs = OutboundReader::new(tokio::io::BufReader::new(client))
            .read_all()
            .await
            .unwrap();
        match &outputs[0] {
            Outbound::Response(response) => {
                assert_eq!(response.status_code, 500);
                assert_eq!(response.body, ABANDONED_BODY);
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert_eq!(body(&outputs[1]), "after");
    }
}
