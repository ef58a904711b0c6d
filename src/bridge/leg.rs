//! One physical telephony media connection.
//!
//! A [`Leg`] holds the connection's outbound send capability (a channel into
//! the connection's sender task, never the socket itself), its role and the
//! playback accounting used to time interruptions.
//!
//! # Playback accounting
//!
//! Every outbound chunk for the current item is numbered from 1. The mark
//! sent after chunk `n` is named `<item>:n`, so an acknowledged count of `n`
//! means the first `n` chunks have been played. The byte offset at the end of
//! each chunk is kept so an acknowledged count converts to milliseconds.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::role::Role;
use crate::core::telephony::{AudioCodec, MediaStreamRoute};

/// Snapshot of an utterance that was still playing when it was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    /// Utterance that was playing
    pub item_id: String,
    /// Chunks the transport has acknowledged as played
    pub acked_chunks: u64,
    /// Wire bytes covered by the acknowledged chunks
    pub acked_bytes: u64,
    /// Wire bytes sent for the utterance so far
    pub sent_bytes: u64,
}

/// What to do with an outbound chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDecision {
    /// Deliver the chunk and follow it with mark number `chunk`. When the chunk
    /// starts a new utterance while another is still playing, `preempted`
    /// carries the interrupted one.
    Send {
        chunk: u64,
        preempted: Option<PlaybackSnapshot>,
    },
    /// The utterance was interrupted; its remaining audio is discarded.
    Drop,
}

/// Result of applying a progress mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Counter moved to the acknowledged value (or already held it)
    Accepted,
    /// Count lower than what was already acknowledged
    OutOfOrder,
    /// Mark refers to an utterance that is no longer current
    Stale,
}

/// Interrupted utterances remembered until the AI finishes them.
const MAX_INTERRUPTED_ITEMS: usize = 8;

#[derive(Debug, Default)]
struct PlaybackState {
    current_item: Option<String>,
    /// Utterances cut short by an interruption; late chunks for them are
    /// dropped until their generation completes
    interrupted: VecDeque<String>,
    chunk_end_offsets: Vec<u64>,
    last_acked_chunk: u64,
    idle: bool,
}

impl PlaybackState {
    fn is_active(&self) -> bool {
        self.current_item.is_some() && !self.idle && !self.chunk_end_offsets.is_empty()
    }

    fn sent_bytes(&self) -> u64 {
        self.chunk_end_offsets.last().copied().unwrap_or(0)
    }

    fn snapshot(&self) -> Option<PlaybackSnapshot> {
        if !self.is_active() {
            return None;
        }
        let item_id = self.current_item.clone()?;
        let acked_bytes = match self.last_acked_chunk {
            0 => 0,
            n => self
                .chunk_end_offsets
                .get(n as usize - 1)
                .copied()
                .unwrap_or_else(|| self.sent_bytes()),
        };
        Some(PlaybackSnapshot {
            item_id,
            acked_chunks: self.last_acked_chunk,
            acked_bytes,
            sent_bytes: self.sent_bytes(),
        })
    }

    fn suppress(&mut self, item_id: String) {
        if self.interrupted.iter().any(|id| *id == item_id) {
            return;
        }
        if self.interrupted.len() == MAX_INTERRUPTED_ITEMS {
            self.interrupted.pop_front();
        }
        self.interrupted.push_back(item_id);
    }

    fn is_suppressed(&self, item_id: &str) -> bool {
        self.interrupted.iter().any(|id| id == item_id)
    }

    fn reset_counters(&mut self) {
        self.chunk_end_offsets.clear();
        self.last_acked_chunk = 0;
    }
}

/// One side of a call.
#[derive(Debug)]
pub struct Leg {
    id: Uuid,
    role: Role,
    pairing_key: Option<String>,
    stream_sid: String,
    codec: AudioCodec,
    outbound: mpsc::Sender<MediaStreamRoute>,
    close_token: CancellationToken,
    playback: Mutex<PlaybackState>,
}

impl Leg {
    pub fn new(
        role: Role,
        pairing_key: Option<String>,
        stream_sid: impl Into<String>,
        codec: AudioCodec,
        outbound: mpsc::Sender<MediaStreamRoute>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            role,
            pairing_key,
            stream_sid: stream_sid.into(),
            codec,
            outbound,
            close_token: CancellationToken::new(),
            playback: Mutex::new(PlaybackState::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pairing_key(&self) -> Option<&str> {
        self.pairing_key.as_deref()
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    pub fn codec(&self) -> &AudioCodec {
        &self.codec
    }

    pub(crate) fn outbound(&self) -> &mpsc::Sender<MediaStreamRoute> {
        &self.outbound
    }

    /// Ask the owning connection to close. Used when a newer connection
    /// takes over this leg's role.
    pub fn request_close(&self) {
        self.close_token.cancel();
    }

    /// Resolves once [`Leg::request_close`] has been called.
    pub fn close_requested(&self) -> CancellationToken {
        self.close_token.clone()
    }

    // ===== Playback accounting =====

    /// Account for one outbound chunk of `item_id` carrying `wire_len` bytes.
    pub fn record_outbound_chunk(&self, item_id: &str, wire_len: usize) -> ChunkDecision {
        let mut state = self.playback.lock();

        if state.is_suppressed(item_id) {
            return ChunkDecision::Drop;
        }

        let mut preempted = None;
        if state.current_item.as_deref() != Some(item_id) {
            preempted = state.snapshot();
            if let Some(snapshot) = &preempted {
                state.suppress(snapshot.item_id.clone());
            }
            state.current_item = Some(item_id.to_string());
            state.reset_counters();
        }

        state.idle = false;
        let end = state.sent_bytes() + wire_len as u64;
        state.chunk_end_offsets.push(end);

        ChunkDecision::Send {
            chunk: state.chunk_end_offsets.len() as u64,
            preempted,
        }
    }

    /// Apply a progress mark. Counts never move backwards.
    pub fn ack_progress(&self, item_id: &str, chunk: u64) -> AckOutcome {
        let mut state = self.playback.lock();
        if state.current_item.as_deref() != Some(item_id) || state.idle {
            return AckOutcome::Stale;
        }
        if chunk < state.last_acked_chunk {
            return AckOutcome::OutOfOrder;
        }
        let sent = state.chunk_end_offsets.len() as u64;
        state.last_acked_chunk = chunk.min(sent);
        AckOutcome::Accepted
    }

    /// Apply a completion mark: the counter resets and the leg goes idle.
    pub fn ack_done(&self, item_id: &str) -> AckOutcome {
        let mut state = self.playback.lock();
        if state.current_item.as_deref() != Some(item_id) {
            return AckOutcome::Stale;
        }
        state.reset_counters();
        state.idle = true;
        AckOutcome::Accepted
    }

    /// Take the playing utterance, leaving the leg idle. Returns `None` when
    /// nothing is playing, so a second call is a no-op.
    pub fn take_active_playback(&self) -> Option<PlaybackSnapshot> {
        let mut state = self.playback.lock();
        let snapshot = state.snapshot()?;
        state.suppress(snapshot.item_id.clone());
        state.reset_counters();
        state.idle = true;
        Some(snapshot)
    }

    /// True when `item_id` was interrupted and its audio is being discarded.
    pub fn is_suppressed(&self, item_id: &str) -> bool {
        self.playback.lock().is_suppressed(item_id)
    }

    /// The AI finished generating `item_id`; no more late audio can arrive
    /// for it, so it no longer needs suppressing.
    pub fn item_generated(&self, item_id: &str) {
        self.playback.lock().interrupted.retain(|id| id != item_id);
    }

    pub fn current_item(&self) -> Option<String> {
        self.playback.lock().current_item.clone()
    }

    pub fn last_acknowledged_chunk(&self) -> u64 {
        self.playback.lock().last_acked_chunk
    }

    pub fn sent_chunks(&self) -> u64 {
        self.playback.lock().chunk_end_offsets.len() as u64
    }

    pub fn is_playing(&self) -> bool {
        self.playback.lock().is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_leg() -> (Arc<Leg>, mpsc::Receiver<MediaStreamRoute>) {
        let (tx, rx) = mpsc::channel(16);
        let leg = Leg::new(
            Role::B,
            Some("c1".to_string()),
            "MZ1",
            AudioCodec::default(),
            tx,
        );
        (leg, rx)
    }

    fn send(leg: &Leg, item: &str, len: usize) -> u64 {
        match leg.record_outbound_chunk(item, len) {
            ChunkDecision::Send { chunk, .. } => chunk,
            ChunkDecision::Drop => panic!("chunk for {item} was dropped"),
        }
    }

    #[test]
    fn test_chunks_numbered_from_one() {
        let (leg, _rx) = test_leg();
        assert_eq!(send(&leg, "item1", 160), 1);
        assert_eq!(send(&leg, "item1", 160), 2);
        assert_eq!(leg.sent_chunks(), 2);
        assert_eq!(leg.current_item().as_deref(), Some("item1"));
        assert!(leg.is_playing());
    }

    #[test]
    fn test_first_item_does_not_preempt() {
        let (leg, _rx) = test_leg();
        assert_eq!(
            leg.record_outbound_chunk("item1", 160),
            ChunkDecision::Send {
                chunk: 1,
                preempted: None
            }
        );
    }

    #[test]
    fn test_new_item_preempts_playing_item() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        send(&leg, "item1", 160);
        assert_eq!(leg.ack_progress("item1", 1), AckOutcome::Accepted);

        match leg.record_outbound_chunk("item2", 80) {
            ChunkDecision::Send { chunk, preempted } => {
                assert_eq!(chunk, 1);
                let snapshot = preempted.unwrap();
                assert_eq!(snapshot.item_id, "item1");
                assert_eq!(snapshot.acked_chunks, 1);
                assert_eq!(snapshot.acked_bytes, 160);
                assert_eq!(snapshot.sent_bytes, 320);
            }
            ChunkDecision::Drop => panic!("new item dropped"),
        }

        assert_eq!(leg.last_acknowledged_chunk(), 0);
        // Late audio of the preempted item is discarded
        assert_eq!(leg.record_outbound_chunk("item1", 160), ChunkDecision::Drop);
    }

    #[test]
    fn test_new_item_after_done_does_not_preempt() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        assert_eq!(leg.ack_done("item1"), AckOutcome::Accepted);
        assert!(!leg.is_playing());

        assert_eq!(
            leg.record_outbound_chunk("item2", 160),
            ChunkDecision::Send {
                chunk: 1,
                preempted: None
            }
        );
    }

    #[test]
    fn test_ack_progress_monotonic() {
        let (leg, _rx) = test_leg();
        for _ in 0..40 {
            send(&leg, "item1", 160);
        }
        assert_eq!(leg.ack_progress("item1", 12), AckOutcome::Accepted);
        assert_eq!(leg.ack_progress("item1", 30), AckOutcome::Accepted);
        assert_eq!(leg.last_acknowledged_chunk(), 30);

        assert_eq!(leg.ack_progress("item1", 12), AckOutcome::OutOfOrder);
        assert_eq!(leg.last_acknowledged_chunk(), 30);
    }

    #[test]
    fn test_ack_for_other_item_is_stale() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        assert_eq!(leg.ack_progress("item0", 1), AckOutcome::Stale);
        assert_eq!(leg.ack_done("item0"), AckOutcome::Stale);
        assert_eq!(leg.last_acknowledged_chunk(), 0);
    }

    #[test]
    fn test_ack_done_resets() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        send(&leg, "item1", 160);
        leg.ack_progress("item1", 2);
        assert_eq!(leg.ack_done("item1"), AckOutcome::Accepted);
        assert_eq!(leg.last_acknowledged_chunk(), 0);
        assert_eq!(leg.sent_chunks(), 0);
        assert_eq!(leg.ack_progress("item1", 3), AckOutcome::Stale);
    }

    #[test]
    fn test_take_active_playback_idempotent() {
        let (leg, _rx) = test_leg();
        assert!(leg.take_active_playback().is_none());

        send(&leg, "item1", 160);
        let snapshot = leg.take_active_playback().unwrap();
        assert_eq!(snapshot.item_id, "item1");
        assert_eq!(snapshot.acked_bytes, 0);
        assert!(leg.take_active_playback().is_none());
        assert_eq!(leg.record_outbound_chunk("item1", 160), ChunkDecision::Drop);
    }

    #[test]
    fn test_interrupted_item_stays_suppressed_across_new_item() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        assert!(leg.take_active_playback().is_some());

        // A fresh utterance starts while nothing is playing
        assert_eq!(
            leg.record_outbound_chunk("item2", 160),
            ChunkDecision::Send {
                chunk: 1,
                preempted: None
            }
        );

        // Late audio of the barged-in item must not preempt item2
        assert!(leg.is_suppressed("item1"));
        assert_eq!(leg.record_outbound_chunk("item1", 160), ChunkDecision::Drop);
        assert_eq!(leg.current_item().as_deref(), Some("item2"));
        assert_eq!(leg.sent_chunks(), 1);
    }

    #[test]
    fn test_item_generated_lifts_suppression() {
        let (leg, _rx) = test_leg();
        send(&leg, "item1", 160);
        leg.take_active_playback();
        assert!(leg.is_suppressed("item1"));

        leg.item_generated("item1");
        assert!(!leg.is_suppressed("item1"));
    }

    #[test]
    fn test_suppression_list_is_bounded() {
        let (leg, _rx) = test_leg();
        for i in 0..=MAX_INTERRUPTED_ITEMS {
            send(&leg, &format!("item{i}"), 160);
            leg.take_active_playback();
        }
        assert!(!leg.is_suppressed("item0"));
        assert!(leg.is_suppressed(&format!("item{MAX_INTERRUPTED_ITEMS}")));
    }

    #[test]
    fn test_request_close_cancels_token() {
        let (leg, _rx) = test_leg();
        let token = leg.close_requested();
        assert!(!token.is_cancelled());
        leg.request_close();
        assert!(token.is_cancelled());
    }
}
