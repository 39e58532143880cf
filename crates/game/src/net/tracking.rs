use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::packet::sequence_greater_than;

#[derive(Debug, Clone)]
struct PendingPacket {
    sequence: u32,
    send_time: Instant,
    chunk: Option<u32>,
    acked: bool,
}

/// Packets sent but not yet acknowledged, with smoothed RTT.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    /// Records an outgoing packet and the reliable chunk it carried, if any.
    pub fn track_packet(&mut self, sequence: u32, chunk: Option<u32>, now: Instant) {
        // Chunks of evicted packets are recovered by the resend timer.
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: now,
            chunk,
            acked: false,
        });
    }

    /// Applies a remote ack window and returns the chunks it confirmed.
    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32, now: Instant) -> Vec<u32> {
        let mut acked_chunks = Vec::new();
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= 32 && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                acked_chunks.extend(pending.chunk);
                rtt_samples.push(now.duration_since(pending.send_time).as_secs_f32() * 1000.0);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while self.pending.front().is_some_and(|p| p.acked) {
            self.pending.pop_front();
        }

        acked_chunks
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    /// Retransmission timeout: smoothed RTT plus four deviations, floored.
    pub fn resend_timeout(&self, floor: Duration) -> Duration {
        let rto = Duration::from_secs_f32((self.srtt + 4.0 * self.rtt_var).max(0.0) / 1000.0);
        rto.max(floor)
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Remote packet sequences seen recently, summarised as an ack window.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u32,
    received_bitfield: u32,
    recent_sequences: VecDeque<u32>,
    max_recent: usize,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
        }
    }

    /// Returns false for a duplicate.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            self.received_bitfield = if diff <= 32 {
                self.received_bitfield.checked_shl(diff).unwrap_or(0) | (1 << (diff - 1))
            } else {
                0
            };
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > 0 && diff <= 32 {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        true
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.last_received, self.received_bitfield)
    }
}

#[derive(Debug)]
struct OutgoingChunk {
    data: Vec<u8>,
    last: bool,
    last_sent: Option<Instant>,
}

/// A chunk that must go out now, fresh or as a resend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueChunk {
    pub chunk: u32,
    pub last: bool,
    pub data: Vec<u8>,
    pub resend: bool,
}

/// Reliable, ordered stream of messages split into numbered chunks.
///
/// A message is one or more consecutive chunks, the final one flagged
/// `last`. Chunks are delivered strictly in order, so the receiver
/// reassembles by concatenation.
#[derive(Debug)]
pub struct ReliableChannel {
    chunk_size: usize,
    next_send: u32,
    outbox: BTreeMap<u32, OutgoingChunk>,
    next_deliver: u32,
    inbox: BTreeMap<u32, (bool, Vec<u8>)>,
    partial: Vec<u8>,
}

impl ReliableChannel {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            next_send: 0,
            outbox: BTreeMap::new(),
            next_deliver: 0,
            inbox: BTreeMap::new(),
            partial: Vec::new(),
        }
    }

    pub fn queue(&mut self, message: &[u8]) {
        let mut chunks = message.chunks(self.chunk_size).peekable();
        if chunks.peek().is_none() {
            self.push_chunk(Vec::new(), true);
            return;
        }
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            self.push_chunk(chunk.to_vec(), last);
        }
    }

    fn push_chunk(&mut self, data: Vec<u8>, last: bool) {
        self.outbox.insert(
            self.next_send,
            OutgoingChunk {
                data,
                last,
                last_sent: None,
            },
        );
        self.next_send = self.next_send.wrapping_add(1);
    }

    /// Chunks never sent, or unacknowledged for longer than `resend_after`.
    pub fn due(&mut self, now: Instant, resend_after: Duration) -> Vec<DueChunk> {
        let mut due = Vec::new();
        for (&chunk, outgoing) in &mut self.outbox {
            let resend = match outgoing.last_sent {
                None => false,
                Some(sent) if now.duration_since(sent) >= resend_after => true,
                Some(_) => continue,
            };
            outgoing.last_sent = Some(now);
            due.push(DueChunk {
                chunk,
                last: outgoing.last,
                data: outgoing.data.clone(),
                resend,
            });
        }
        due
    }

    pub fn acknowledge(&mut self, chunks: &[u32]) {
        for chunk in chunks {
            self.outbox.remove(chunk);
        }
    }

    pub fn unacked(&self) -> usize {
        self.outbox.len()
    }

    /// Accepts a remote chunk and returns every message it completed.
    pub fn receive(&mut self, chunk: u32, last: bool, data: Vec<u8>) -> Vec<Vec<u8>> {
        if chunk == self.next_deliver || sequence_greater_than(chunk, self.next_deliver) {
            self.inbox.entry(chunk).or_insert((last, data));
        }

        let mut completed = Vec::new();
        while let Some((last, data)) = self.inbox.remove(&self.next_deliver) {
            self.partial.extend_from_slice(&data);
            if last {
                completed.push(std::mem::take(&mut self.partial));
            }
            self.next_deliver = self.next_deliver.wrapping_add(1);
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
        assert!(!tracker.record_received(2));
    }

    #[test]
    fn ack_releases_chunks() {
        let now = Instant::now();
        let mut tracker = AckTracker::new(32);
        tracker.track_packet(1, Some(0), now);
        tracker.track_packet(2, None, now);
        tracker.track_packet(3, Some(1), now);

        let acked = tracker.process_ack(3, 0b10, now + Duration::from_millis(20));
        assert_eq!(acked, vec![0, 1]);
        assert_eq!(tracker.unacked_count(), 1);
        assert!(tracker.srtt() < 100.0);
    }

    #[test]
    fn channel_resends_until_acked() {
        let start = Instant::now();
        let mut channel = ReliableChannel::new(4);
        channel.queue(b"abcdefghij");

        let first = channel.due(start, Duration::from_millis(100));
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|c| !c.resend));
        assert!(first[2].last);

        assert!(channel.due(start, Duration::from_millis(100)).is_empty());

        channel.acknowledge(&[0, 2]);
        let again = channel.due(start + Duration::from_millis(150), Duration::from_millis(100));
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].chunk, 1);
        assert!(again[0].resend);
    }

    #[test]
    fn channel_reassembles_in_order() {
        let mut sender = ReliableChannel::new(3);
        sender.queue(b"snapshot");
        sender.queue(b"");
        let chunks = sender.due(Instant::now(), Duration::from_secs(1));

        let mut receiver = ReliableChannel::new(3);
        let mut delivered = Vec::new();
        for chunk in chunks.iter().rev() {
            delivered.extend(receiver.receive(chunk.chunk, chunk.last, chunk.data.clone()));
        }
        // Duplicates of delivered chunks are ignored.
        delivered.extend(receiver.receive(0, false, b"sna".to_vec()));

        assert_eq!(delivered, vec![b"snapshot".to_vec(), Vec::new()]);
    }
}
