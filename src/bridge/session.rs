//! AI session handle.
//!
//! Wraps one speech-to-speech client for one [`Direction`] of a pair. The
//! handle owns two tasks: a connect task bounded by the connect timeout, and
//! an event pump that feeds provider events, in order, into
//! [`dispatch::handle_realtime_event`](super::dispatch::handle_realtime_event).
//! Audio arriving before the session is connected is dropped, never queued.
//!
//! Neither path waits on the other leg. Provider events that find the pump's
//! queue full are dropped, and caller audio is dropped while the client is
//! busy with a control request, so one stalled transport never holds up the
//! other side of the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::alerts::{AlertKind, BridgeAlert};
use super::dispatch;
use super::pair::Pair;
use super::role::Direction;
use crate::core::realtime::{BoxedRealtime, RealtimeError, RealtimeEvent, RealtimeResult};

/// Provider events buffered between the provider task and the pump.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on a provider disconnect during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

pub struct AiSession {
    direction: Direction,
    pairing_key: String,
    state: watch::Sender<SessionState>,
    speaking: AtomicBool,
    client: Mutex<BoxedRealtime>,
    events: parking_lot::Mutex<Option<mpsc::Receiver<RealtimeEvent>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    alerts: broadcast::Sender<BridgeAlert>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl AiSession {
    /// Wrap an unconnected client. The event callback is registered here so
    /// no provider event can be missed.
    pub fn new(
        direction: Direction,
        pairing_key: impl Into<String>,
        mut client: BoxedRealtime,
        alerts: broadcast::Sender<BridgeAlert>,
    ) -> RealtimeResult<Arc<Self>> {
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(EVENT_CHANNEL_CAPACITY);

        client.on_event(Arc::new(move |event: RealtimeEvent| {
            if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
                warn!(event = event.kind(), "Realtime event queue full; dropping event");
            }
            Box::pin(async {})
        }))?;

        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Arc::new(Self {
            direction,
            pairing_key: pairing_key.into(),
            state,
            speaking: AtomicBool::new(false),
            client: Mutex::new(client),
            events: parking_lot::Mutex::new(Some(event_rx)),
            tasks: parking_lot::Mutex::new(Vec::new()),
            alerts,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// Spawn the event pump and the connect task. Only the first call has any effect.
    pub fn start(self: &Arc<Self>, pair: Weak<Pair>, connect_timeout: Duration) {
        if self.closed.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut events) = self.events.lock().take() else {
            return;
        };

        let direction = self.direction;
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(pair) = pair.upgrade() else {
                    break;
                };
                dispatch::handle_realtime_event(&pair, direction, event).await;
            }
            debug!(direction = %direction, "Realtime event pump ended");
        });

        let session = Arc::clone(self);
        let connect = tokio::spawn(async move {
            session.state.send_replace(SessionState::Connecting);
            let result = tokio::time::timeout(connect_timeout, async {
                session.client.lock().await.connect().await
            })
            .await;

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(_) => Some(RealtimeError::Timeout(format!(
                    "connect did not finish within {}s",
                    connect_timeout.as_secs_f32()
                ))),
            };

            if session.closed.load(Ordering::SeqCst) {
                return;
            }

            match failure {
                None => {
                    session.state.send_replace(SessionState::Connected);
                    info!(
                        pairing_key = %session.pairing_key,
                        direction = %session.direction,
                        "Realtime session connected"
                    );
                }
                Some(e) => {
                    session.state.send_replace(SessionState::Disconnected);
                    error!(
                        pairing_key = %session.pairing_key,
                        direction = %session.direction,
                        "Realtime session connect failed: {}",
                        e
                    );
                    session.alert(AlertKind::ConnectFailed, e.to_string());
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(pump);
        tasks.push(connect);
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait for the connect task to succeed, up to `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == SessionState::Connected)).await,
            Ok(Ok(_))
        )
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    /// Forward caller audio. Returns `Ok(false)` when the frame was dropped
    /// because the session is not connected, the client is busy with another
    /// request, or its outbound queue is full.
    pub async fn send_audio(&self, audio: Bytes) -> RealtimeResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let Ok(mut client) = self.client.try_lock() else {
            return Ok(false);
        };
        match client.send_audio(audio).await {
            Ok(()) => Ok(true),
            Err(RealtimeError::Backpressure) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn truncate(&self, item_id: &str, audio_end_ms: u32) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        self.client
            .lock()
            .await
            .truncate_item(item_id, audio_end_ms)
            .await
    }

    pub async fn create_response(&self) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        self.client.lock().await.create_response().await
    }

    /// Stop the response being generated. Audio already generated for it may
    /// still arrive afterwards.
    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        self.client.lock().await.cancel_response().await
    }

    /// Record that the provider connection ended on its own.
    pub fn mark_upstream_closed(&self) {
        self.set_speaking(false);
        if !self.is_closed() {
            self.state.send_replace(SessionState::Disconnected);
        }
    }

    /// Publish an alert; having no subscriber is fine.
    pub fn alert(&self, kind: AlertKind, message: impl Into<String>) {
        let _ = self.alerts.send(BridgeAlert {
            pairing_key: self.pairing_key.clone(),
            direction: self.direction,
            kind,
            message: message.into(),
        });
    }

    /// Stop both tasks and disconnect the provider. Runs at most once;
    /// failures are logged and swallowed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.send_replace(SessionState::Closing);
        self.set_speaking(false);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }

        let result = tokio::time::timeout(CLOSE_TIMEOUT, async {
            self.client.lock().await.disconnect().await
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                pairing_key = %self.pairing_key,
                direction = %self.direction,
                "Realtime session disconnect failed: {}",
                e
            ),
            Err(_) => warn!(
                pairing_key = %self.pairing_key,
                direction = %self.direction,
                "Realtime session disconnect timed out"
            ),
        }

        self.state.send_replace(SessionState::Disconnected);
        debug!(
            pairing_key = %self.pairing_key,
            direction = %self.direction,
            "Realtime session closed"
        );
    }
}

impl std::fmt::Debug for AiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiSession")
            .field("direction", &self.direction)
            .field("pairing_key", &self.pairing_key)
            .field("state", &self.state())
            .field("speaking", &self.is_speaking())
            .finish()
    }
}

impl Drop for AiSession {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
