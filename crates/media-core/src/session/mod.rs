//! Media session controller
//!
//! One [`MediaSession`] owns the media plane of a single call: the paced
//! send pipeline, the receive dispatcher with its optional jitter buffer,
//! the RFC 4733 DTMF machinery and the aggregated RTCP bookkeeping across
//! however many transports the call uses. Transports are held by shared
//! reference; the session never closes their sockets, it only unregisters
//! its handlers and stops sending.

pub mod events;

mod dispatch;
mod rtcp;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{AudioProcessor, AudioProcessorConfig};
use crate::dtmf::{DtmfReceiver, DtmfSender, DTMF_CLOCK_RATE};
use crate::error::{Error, Result};
use crate::jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats};
use crate::packet::RtpPacket;
use crate::pacer::{PacerTiming, SendBufferSet};
use crate::transport::MediaTransport;
use crate::types::{
    AudioPayloadType, MediaDirection, MediaSessionStats, RtcpStatistics, RtcpStatsSnapshot,
    SessionState, DEFAULT_DTMF_PAYLOAD_TYPE,
};

pub use events::MediaSessionCallbacks;

/// Lawful bounds for `set_ptime`, inclusive
const MIN_PTIME: Duration = Duration::from_millis(10);
const MAX_PTIME: Duration = Duration::from_millis(40);

/// Housekeeping worker tick
const HOUSEKEEPING_TICK: Duration = Duration::from_millis(10);

/// Media session configuration
#[derive(Debug, Clone)]
pub struct MediaSessionConfig {
    /// Required session identifier, carried in error contexts and logs
    pub session_id: String,

    /// Packetization time; zero selects the 20 ms default
    pub ptime: Duration,

    /// Session audio codec
    pub payload_type: AudioPayloadType,

    /// Route received audio through the jitter buffer
    pub jitter_enabled: bool,

    /// Soft packet bound of the jitter buffer
    pub jitter_buffer_size: usize,

    /// Initial play-out delay of the jitter buffer
    pub jitter_delay: Duration,

    /// Enable RFC 4733 telephone events
    pub dtmf_enabled: bool,

    /// Payload type for telephone events
    pub dtmf_payload_type: u8,

    /// Enable session-level RTCP from the start
    pub rtcp_enabled: bool,

    /// RTCP report interval; zero selects the 5 s default
    pub rtcp_interval: Duration,

    /// Enable the AGC stub in the send path
    pub enable_agc: bool,

    /// Enable the noise-gate stub in the send path
    pub enable_noise_reduction: bool,

    /// Initial callback slots; all may also be set after construction
    pub callbacks: MediaSessionCallbacks,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            ptime: Duration::from_millis(20),
            payload_type: AudioPayloadType::Pcmu,
            jitter_enabled: false,
            jitter_buffer_size: 10,
            jitter_delay: Duration::from_millis(60),
            dtmf_enabled: false,
            dtmf_payload_type: DEFAULT_DTMF_PAYLOAD_TYPE,
            rtcp_enabled: false,
            rtcp_interval: Duration::from_secs(5),
            enable_agc: false,
            enable_noise_reduction: false,
            callbacks: MediaSessionCallbacks::default(),
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) session_id: String,
    pub(crate) payload_type: AudioPayloadType,
    pub(crate) dtmf_enabled: bool,
    pub(crate) dtmf_payload_type: u8,
    rtcp_interval: Duration,

    state: RwLock<SessionState>,
    transports: RwLock<HashMap<String, Arc<dyn MediaTransport>>>,
    buffers: SendBufferSet,
    timing: RwLock<PacerTiming>,
    pub(crate) processor: Mutex<AudioProcessor>,
    dtmf_sender: Option<Mutex<DtmfSender>>,
    pub(crate) dtmf_receiver: Option<Mutex<DtmfReceiver>>,
    pub(crate) jitter: Option<Arc<JitterBuffer>>,
    pub(crate) callbacks: RwLock<MediaSessionCallbacks>,
    pub(crate) stats: RwLock<MediaSessionStats>,
    rtcp: rtcp::RtcpState,

    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    silence_suppression: AtomicBool,
    last_send_time: RwLock<Instant>,
}

impl SessionInner {
    /// Clone the callback slots under the callbacks lock; callers invoke
    /// the clones with no session locks held
    pub(crate) async fn callbacks_snapshot(&self) -> MediaSessionCallbacks {
        self.callbacks.read().await.clone()
    }

    /// Route a worker-side failure to the media-error callback
    pub(crate) async fn report_error(&self, err: Error, transport_key: Option<String>) {
        warn!(
            "media error on session {} (transport {:?}): {}",
            self.session_id, transport_key, err
        );
        let callback = self.callbacks_snapshot().await.on_media_error;
        if let Some(callback) = callback {
            callback(err, transport_key);
        }
    }

    /// Effective send capability: any transport that may send
    pub(crate) async fn session_can_send(&self) -> bool {
        self.transports
            .read()
            .await
            .values()
            .any(|t| t.can_send())
    }

    /// Effective receive capability: any transport that may receive
    pub(crate) async fn session_can_receive(&self) -> bool {
        self.transports
            .read()
            .await
            .values()
            .any(|t| t.can_receive())
    }

    /// Snapshot the transport map as an owned list, so transport calls run
    /// outside the map lock
    async fn transport_list(&self) -> Vec<(String, Arc<dyn MediaTransport>)> {
        self.transports
            .read()
            .await
            .iter()
            .map(|(key, transport)| (key.clone(), transport.clone()))
            .collect()
    }

    async fn effective_direction(&self) -> MediaDirection {
        match (self.session_can_send().await, self.session_can_receive().await) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }
}

/// Per-call media session
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("session_id", &self.inner.session_id)
            .finish()
    }
}

impl MediaSession {
    /// Create a session from its configuration.
    ///
    /// Validates the identifier and timing, applies the documented defaults
    /// and allocates the components the configuration enables.
    pub fn new(mut config: MediaSessionConfig) -> Result<Self> {
        if config.session_id.is_empty() {
            return Err(Error::invalid_config("session id must not be empty"));
        }
        if config.ptime.is_zero() {
            config.ptime = Duration::from_millis(20);
        }
        if config.rtcp_interval.is_zero() {
            config.rtcp_interval = Duration::from_secs(5);
        }

        let expected_payload_size = config.payload_type.expected_payload_size(config.ptime);
        if expected_payload_size == 0 {
            return Err(Error::invalid_config(format!(
                "ptime {}ms yields an empty {} frame",
                config.ptime.as_millis(),
                config.payload_type
            )));
        }

        let jitter = if config.jitter_enabled {
            let jitter_config = JitterBufferConfig {
                buffer_size: config.jitter_buffer_size,
                initial_delay: config.jitter_delay,
                packet_time: config.ptime,
                max_delay: config.ptime * config.jitter_buffer_size as u32,
                clock_rate: config.payload_type.clock_rate(),
            };
            Some(Arc::new(JitterBuffer::new(jitter_config)?))
        } else {
            None
        };

        let processor = AudioProcessor::new(
            &config.session_id,
            AudioProcessorConfig {
                payload_type: config.payload_type,
                ptime: config.ptime,
                enable_agc: config.enable_agc,
                enable_noise_reduction: config.enable_noise_reduction,
            },
        );

        let (dtmf_sender, dtmf_receiver) = if config.dtmf_enabled {
            (
                Some(Mutex::new(DtmfSender::new(config.dtmf_payload_type))),
                Some(Mutex::new(DtmfReceiver::new())),
            )
        } else {
            (None, None)
        };

        info!(
            "Creating media session {}: codec={} ptime={}ms jitter={} dtmf={} rtcp={}",
            config.session_id,
            config.payload_type,
            config.ptime.as_millis(),
            config.jitter_enabled,
            config.dtmf_enabled,
            config.rtcp_enabled
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                session_id: config.session_id,
                payload_type: config.payload_type,
                dtmf_enabled: config.dtmf_enabled,
                dtmf_payload_type: config.dtmf_payload_type,
                rtcp_interval: config.rtcp_interval,
                state: RwLock::new(SessionState::Idle),
                transports: RwLock::new(HashMap::new()),
                buffers: SendBufferSet::new(),
                timing: RwLock::new(PacerTiming {
                    ptime: config.ptime,
                    expected_payload_size,
                }),
                processor: Mutex::new(processor),
                dtmf_sender,
                dtmf_receiver,
                jitter,
                callbacks: RwLock::new(config.callbacks),
                stats: RwLock::new(MediaSessionStats::default()),
                rtcp: rtcp::RtcpState::new(config.rtcp_enabled),
                cancel: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
                silence_suppression: AtomicBool::new(false),
                last_send_time: RwLock::new(Instant::now()),
            }),
        })
    }

    /// Session identifier
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Session audio codec
    pub fn payload_type(&self) -> AudioPayloadType {
        self.inner.payload_type
    }

    /// Current life-cycle state
    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Current packetization time
    pub async fn ptime(&self) -> Duration {
        self.inner.timing.read().await.ptime
    }

    /// Expected payload size for the current `(codec, ptime)`
    pub async fn expected_payload_size(&self) -> usize {
        self.inner.timing.read().await.expected_payload_size
    }

    // ========== life cycle ==========

    /// Start the session: spawn the workers the configuration calls for and
    /// start every registered transport.
    ///
    /// Must be called from Idle exactly once. If a transport fails to start
    /// no rollback is attempted; the error is returned and the caller must
    /// `stop()` the session.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                SessionState::Idle => *state = SessionState::Active,
                SessionState::Active | SessionState::Paused => {
                    return Err(Error::SessionAlreadyStarted {
                        session_id: self.inner.session_id.clone(),
                    })
                }
                SessionState::Closed => {
                    return Err(Error::SessionClosed {
                        session_id: self.inner.session_id.clone(),
                    })
                }
            }
        }

        *self.inner.last_send_time.write().await = Instant::now();

        {
            let mut workers = self.inner.workers.lock().await;

            if self.inner.session_can_send().await {
                workers.push(tokio::spawn(run_pacer(self.inner.clone())));
            }

            if let Some(jitter) = &self.inner.jitter {
                workers.push(jitter.start_drain(self.inner.cancel.clone()));
                if let Some(rx) = jitter.take_extended_receiver() {
                    workers.push(tokio::spawn(run_jitter_consumer(self.inner.clone(), rx)));
                }
            }

            workers.push(tokio::spawn(run_housekeeping(self.inner.clone())));

            if *self.inner.rtcp.enabled.read().await {
                self.inner.rtcp.worker_running.store(true, Ordering::Release);
                workers.push(tokio::spawn(run_rtcp_worker(self.inner.clone())));
            }
        }

        for (key, transport) in self.inner.transport_list().await {
            transport.start().await.map_err(|source| Error::RtpSendFailed {
                transport_key: key,
                source,
            })?;
        }

        info!("✅ media session {} started", self.inner.session_id);
        Ok(())
    }

    /// Stop the session. Idempotent: a second call returns success without
    /// doing anything.
    ///
    /// Cancels every worker, stops the jitter buffer (closing its output
    /// channels), clears the send FIFOs, stops every transport (errors
    /// ignored) and joins the workers before returning.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }

        self.inner.cancel.cancel();

        if let Some(jitter) = &self.inner.jitter {
            jitter.stop();
        }

        self.inner.buffers.clear_all().await;

        for (key, transport) in self.inner.transport_list().await {
            transport.clear_incoming_handler().await;
            if let Err(err) = transport.stop().await {
                warn!("transport {} failed to stop: {}", key, err);
            }
        }

        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock().await;
            workers.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.await;
        }

        info!("media session {} stopped", self.inner.session_id);
        Ok(())
    }

    /// Pause the session: workers keep running but new sends are refused
    pub async fn pause(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        match *state {
            SessionState::Active => {
                *state = SessionState::Paused;
                debug!("media session {} paused", self.inner.session_id);
                Ok(())
            }
            SessionState::Paused => Ok(()),
            SessionState::Idle => Err(Error::SessionNotStarted {
                session_id: self.inner.session_id.clone(),
            }),
            SessionState::Closed => Err(Error::SessionClosed {
                session_id: self.inner.session_id.clone(),
            }),
        }
    }

    /// Resume a paused session
    pub async fn resume(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        match *state {
            SessionState::Paused => {
                *state = SessionState::Active;
                debug!("media session {} resumed", self.inner.session_id);
                Ok(())
            }
            SessionState::Active => Ok(()),
            SessionState::Idle => Err(Error::SessionNotStarted {
                session_id: self.inner.session_id.clone(),
            }),
            SessionState::Closed => Err(Error::SessionClosed {
                session_id: self.inner.session_id.clone(),
            }),
        }
    }

    // ========== transports ==========

    /// Register a transport under a session-unique key and install the
    /// session's incoming handler on it
    pub async fn add_rtp_session(
        &self,
        key: &str,
        transport: Arc<dyn MediaTransport>,
    ) -> Result<()> {
        if *self.inner.state.read().await == SessionState::Closed {
            return Err(Error::SessionClosed {
                session_id: self.inner.session_id.clone(),
            });
        }

        {
            let mut transports = self.inner.transports.write().await;
            if transports.contains_key(key) {
                return Err(Error::rtp_session(
                    &self.inner.session_id,
                    key,
                    "transport key already registered",
                ));
            }
            transports.insert(key.to_string(), transport.clone());
        }

        let expected = self.inner.timing.read().await.expected_payload_size;
        self.inner.buffers.add_key(key, expected).await;

        let sink = Arc::new(dispatch::TransportPacketSink {
            session: Arc::downgrade(&self.inner),
            transport_key: key.to_string(),
        });
        transport
            .register_incoming_handler(sink)
            .await
            .map_err(|err| {
                Error::rtp_session(
                    &self.inner.session_id,
                    key,
                    format!("failed to register incoming handler: {}", err),
                )
            })?;

        debug!(
            "added transport {} to session {} (direction {})",
            key,
            self.inner.session_id,
            transport.direction()
        );
        Ok(())
    }

    /// Unregister a transport: revoke its handler, stop it and drop its FIFO
    pub async fn remove_rtp_session(&self, key: &str) -> Result<()> {
        let transport = {
            let mut transports = self.inner.transports.write().await;
            transports.remove(key).ok_or_else(|| {
                Error::rtp_session(&self.inner.session_id, key, "no such transport key")
            })?
        };

        transport.clear_incoming_handler().await;
        if let Err(err) = transport.stop().await {
            warn!("transport {} failed to stop on removal: {}", key, err);
        }
        self.inner.buffers.remove_key(key).await;

        debug!(
            "removed transport {} from session {}",
            key, self.inner.session_id
        );
        Ok(())
    }

    /// Update one transport's direction
    pub async fn set_transport_direction(
        &self,
        key: &str,
        direction: MediaDirection,
    ) -> Result<()> {
        let transport = self.lookup_transport(key).await?;
        transport
            .set_direction(direction)
            .await
            .map_err(|source| Error::RtpSendFailed {
                transport_key: key.to_string(),
                source,
            })
    }

    /// Read one transport's direction
    pub async fn transport_direction(&self, key: &str) -> Result<MediaDirection> {
        Ok(self.lookup_transport(key).await?.direction())
    }

    /// Whether any transport may send
    pub async fn can_send(&self) -> bool {
        self.inner.session_can_send().await
    }

    /// Whether any transport may receive
    pub async fn can_receive(&self) -> bool {
        self.inner.session_can_receive().await
    }

    /// Session direction derived from the transports' capabilities
    pub async fn direction(&self) -> MediaDirection {
        self.inner.effective_direction().await
    }

    async fn lookup_transport(&self, key: &str) -> Result<Arc<dyn MediaTransport>> {
        self.inner
            .transports
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| {
                Error::rtp_session(&self.inner.session_id, key, "no such transport key")
            })
    }

    // ========== send path ==========

    /// Queue one audio frame for paced sending.
    ///
    /// The frame must be exactly the expected payload size; after codec
    /// processing a copy lands in the FIFO of every send-capable transport
    /// and leaves at the packetization rate.
    pub async fn send_audio(&self, frame: &[u8]) -> Result<()> {
        self.ensure_active("send_audio").await?;

        let send_keys: Vec<String> = {
            let transports = self.inner.transports.read().await;
            transports
                .iter()
                .filter(|(_, t)| t.can_send())
                .map(|(k, _)| k.clone())
                .collect()
        };
        if send_keys.is_empty() {
            return Err(Error::SessionInvalidDirection {
                session_id: self.inner.session_id.clone(),
                direction: self.inner.effective_direction().await,
                operation: "send audio",
            });
        }

        let encoded = {
            let mut processor = self.inner.processor.lock().await;
            processor.process_outgoing(frame)?
        };

        let expected = self.inner.timing.read().await.expected_payload_size;
        self.inner.buffers.append(&send_keys, &encoded, expected).await?;

        *self.inner.last_send_time.write().await = Instant::now();
        {
            let mut stats = self.inner.stats.write().await;
            stats.last_activity = Instant::now();
        }
        Ok(())
    }

    /// Write one frame to every send-capable transport immediately.
    ///
    /// Bypasses both pacing and codec validation, so it violates the
    /// packetization timing; keep it off the hot path.
    pub async fn write_audio_direct(&self, frame: &[u8]) -> Result<()> {
        self.ensure_active("write_audio_direct").await?;

        let ptime = self.inner.timing.read().await.ptime;
        let payload = Bytes::copy_from_slice(frame);
        let mut sent = false;
        for (key, transport) in self.inner.transport_list().await {
            if !transport.can_send() {
                continue;
            }
            sent = true;
            transport
                .send_audio(payload.clone(), ptime)
                .await
                .map_err(|source| Error::RtpSendFailed {
                    transport_key: key.clone(),
                    source,
                })?;
            let mut stats = self.inner.stats.write().await;
            stats.audio_packets_sent += 1;
            stats.audio_bytes_sent += payload.len() as u64;
        }
        if !sent {
            return Err(Error::SessionInvalidDirection {
                session_id: self.inner.session_id.clone(),
                direction: self.inner.effective_direction().await,
                operation: "write audio direct",
            });
        }
        Ok(())
    }

    /// Send whatever remains in every FIFO as one final, possibly
    /// undersized frame. A teardown courtesy; receivers must tolerate
    /// short tails.
    pub async fn flush_audio_buffer(&self) -> Result<()> {
        let ptime = self.inner.timing.read().await.ptime;
        let tails = self.inner.buffers.drain_remaining().await;
        let mut last_err = None;

        for (key, tail) in tails {
            let Ok(transport) = self.lookup_transport(&key).await else {
                continue;
            };
            if !transport.can_send() {
                continue;
            }
            debug!(
                "flushing {}B tail to transport {} on session {}",
                tail.len(),
                key,
                self.inner.session_id
            );
            if let Err(source) = transport.send_audio(tail, ptime).await {
                last_err = Some(Error::RtpSendFailed {
                    transport_key: key,
                    source,
                });
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Change the packetization time. Lawful values are 10 ms through
    /// 40 ms inclusive.
    ///
    /// Every FIFO is cleared: a partial frame at the old ptime is not a
    /// valid frame at the new one.
    pub async fn set_ptime(&self, ptime: Duration) -> Result<()> {
        if ptime < MIN_PTIME || ptime > MAX_PTIME {
            return Err(Error::AudioTimingInvalid {
                ptime_ms: ptime.as_millis() as u64,
                min_ms: MIN_PTIME.as_millis() as u64,
                max_ms: MAX_PTIME.as_millis() as u64,
            });
        }

        self.inner.buffers.clear_all().await;
        {
            let mut timing = self.inner.timing.write().await;
            timing.ptime = ptime;
            timing.expected_payload_size = self.inner.payload_type.expected_payload_size(ptime);
        }
        self.inner.processor.lock().await.set_ptime(ptime);

        info!(
            "session {} ptime set to {}ms",
            self.inner.session_id,
            ptime.as_millis()
        );
        Ok(())
    }

    // ========== DTMF ==========

    /// Send one DTMF digit as an RFC 4733 event train over the first
    /// send-capable transport
    pub async fn send_dtmf(
        &self,
        digit: char,
        duration: Duration,
        volume_dbm: i32,
    ) -> Result<()> {
        self.ensure_active("send_dtmf").await?;

        let sender = self.inner.dtmf_sender.as_ref().ok_or_else(|| {
            Error::DtmfNotEnabled {
                session_id: self.inner.session_id.clone(),
            }
        })?;

        let (key, transport) = self
            .inner
            .transport_list()
            .await
            .into_iter()
            .find(|(_, t)| t.can_send())
            .ok_or_else(|| Error::SessionInvalidDirection {
                session_id: self.inner.session_id.clone(),
                direction: MediaDirection::RecvOnly,
                operation: "send dtmf",
            })?;

        // Telephone events run on the 8 kHz event clock regardless of the
        // session codec
        let elapsed = self.inner.stats.read().await.session_start.elapsed();
        let timestamp = (elapsed.as_millis() as u64 * DTMF_CLOCK_RATE as u64 / 1000) as u32;

        let packets = {
            let mut sender = sender.lock().await;
            sender.build_event_packets(digit, duration, volume_dbm, timestamp, transport.ssrc())?
        };

        for packet in packets {
            transport
                .send_packet(packet)
                .await
                .map_err(|source| Error::DtmfSendFailed {
                    transport_key: key.clone(),
                    source,
                })?;
        }

        {
            let mut stats = self.inner.stats.write().await;
            stats.dtmf_events_sent += 1;
            stats.last_activity = Instant::now();
        }
        debug!(
            "session {} sent dtmf digit {} over transport {}",
            self.inner.session_id, digit, key
        );
        Ok(())
    }

    // ========== RTCP ==========

    /// Toggle session-level RTCP and fan the toggle out to every transport.
    ///
    /// The first transport failure aborts the fan-out. Enabling on an
    /// Active session spawns the RTCP worker.
    pub async fn enable_rtcp(&self, enabled: bool) -> Result<()> {
        {
            let mut flag = self.inner.rtcp.enabled.write().await;
            if enabled && !*flag {
                *self.inner.rtcp.session_stats.write().await = RtcpStatistics::default();
                *self.inner.rtcp.last_sent.write().await = Some(Instant::now());
            }
            *flag = enabled;
        }

        for (key, transport) in self.inner.transport_list().await {
            transport
                .enable_rtcp(enabled)
                .await
                .map_err(|source| Error::RtcpSendFailed {
                    transport_key: key,
                    source,
                })?;
        }

        if enabled
            && *self.inner.state.read().await == SessionState::Active
            && !self.inner.rtcp.worker_running.swap(true, Ordering::AcqRel)
        {
            let mut workers = self.inner.workers.lock().await;
            workers.push(tokio::spawn(run_rtcp_worker(self.inner.clone())));
        }

        debug!(
            "session {} rtcp {}",
            self.inner.session_id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Whether session-level RTCP is enabled
    pub async fn is_rtcp_enabled(&self) -> bool {
        *self.inner.rtcp.enabled.read().await
    }

    /// Ask every transport to emit an RTCP report now. The last failure is
    /// reported; `last_sent` only advances when every transport succeeded.
    pub async fn send_rtcp_report(&self) -> Result<()> {
        send_rtcp_report_inner(&self.inner).await
    }

    /// Aggregate RTCP statistics: session counters plus the sum of every
    /// RTCP-enabled transport's counters, with worst-case jitter and
    /// fraction lost (see [`get_detailed_rtcp_statistics`] for raw data).
    ///
    /// [`get_detailed_rtcp_statistics`]: Self::get_detailed_rtcp_statistics
    pub async fn get_rtcp_statistics(&self) -> RtcpStatistics {
        let session_stats = self.inner.rtcp.session_stats.read().await.clone();
        let transports = self.inner.transport_list().await;
        rtcp::aggregate_statistics(&session_stats, &transports)
    }

    /// Raw per-transport RTCP data, keyed by transport key. No aggregation.
    pub async fn get_detailed_rtcp_statistics(&self) -> HashMap<String, RtcpStatsSnapshot> {
        self.inner
            .transport_list()
            .await
            .into_iter()
            .map(|(key, transport)| (key, transport.rtcp_statistics()))
            .collect()
    }

    // ========== statistics & misc ==========

    /// Snapshot the session counters
    pub async fn get_statistics(&self) -> MediaSessionStats {
        self.inner.stats.read().await.clone()
    }

    /// Jitter buffer statistics, when the buffer is enabled
    pub async fn jitter_stats(&self) -> Option<JitterBufferStats> {
        self.inner.jitter.as_ref().map(|j| j.stats())
    }

    /// Take the legacy packet-only jitter output channel. `None` when the
    /// jitter buffer is disabled or the channel was already taken.
    pub fn take_jitter_packet_receiver(&self) -> Option<mpsc::Receiver<RtpPacket>> {
        self.inner.jitter.as_ref().and_then(|j| j.take_receiver())
    }

    /// Toggle the silence-suppression stub. Stored and reported, no signal
    /// processing is attached to it yet.
    pub fn set_silence_suppression(&self, enabled: bool) {
        self.inner
            .silence_suppression
            .store(enabled, Ordering::Release);
        debug!(
            "session {} silence suppression set to {} (stub)",
            self.inner.session_id, enabled
        );
    }

    /// Current value of the silence-suppression stub toggle
    pub fn silence_suppression(&self) -> bool {
        self.inner.silence_suppression.load(Ordering::Acquire)
    }

    // ========== callbacks ==========

    /// Install the decoded-audio callback
    pub async fn set_on_audio_received<F>(&self, callback: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_audio_received = Some(Arc::new(callback));
    }

    /// Install the undecoded-audio callback
    pub async fn set_on_raw_audio_received<F>(&self, callback: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_raw_audio_received = Some(Arc::new(callback));
    }

    /// Install the raw-packet callback, bypassing the receive pipeline
    pub async fn set_on_raw_packet_received<F>(&self, callback: F)
    where
        F: Fn(RtpPacket, String) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_raw_packet_received = Some(Arc::new(callback));
    }

    /// Install the DTMF digit-press callback
    pub async fn set_on_dtmf_received<F>(&self, callback: F)
    where
        F: Fn(crate::dtmf::DtmfDigitEvent) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_dtmf_received = Some(Arc::new(callback));
    }

    /// Install the media-error callback
    pub async fn set_on_media_error<F>(&self, callback: F)
    where
        F: Fn(Error, Option<String>) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_media_error = Some(Arc::new(callback));
    }

    /// Install the RTCP report callback
    pub async fn set_on_rtcp_report<F>(&self, callback: F)
    where
        F: Fn(RtcpStatistics) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().await.on_rtcp_report = Some(Arc::new(callback));
    }

    /// Clear every callback slot
    pub async fn clear_callbacks(&self) {
        *self.inner.callbacks.write().await = MediaSessionCallbacks::default();
    }

    async fn ensure_active(&self, operation: &'static str) -> Result<()> {
        match *self.inner.state.read().await {
            SessionState::Active => Ok(()),
            // Paused sessions refuse new sends
            SessionState::Idle | SessionState::Paused => Err(Error::SessionNotStarted {
                session_id: self.inner.session_id.clone(),
            }),
            SessionState::Closed => Err(Error::SessionClosed {
                session_id: self.inner.session_id.clone(),
            }),
        }
        .map_err(|err| {
            debug!(
                "session {} refused {}: {}",
                self.inner.session_id, operation, err
            );
            err
        })
    }
}

// ========== worker loops ==========

/// Send pacer: every ptime, extract at most one expected-size frame per
/// transport FIFO and hand it to the transport. Rate-based; no drift
/// correction beyond the underlying timer.
async fn run_pacer(inner: Arc<SessionInner>) {
    debug!("pacer started for session {}", inner.session_id);
    loop {
        let ptime = inner.timing.read().await.ptime;
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(ptime) => {
                pacer_tick(&inner).await;
            }
        }
    }
    debug!("pacer stopped for session {}", inner.session_id);
}

async fn pacer_tick(inner: &Arc<SessionInner>) {
    let timing = *inner.timing.read().await;
    for (key, transport) in inner.transport_list().await {
        if !transport.can_send() {
            continue;
        }
        let Some(frame) = inner
            .buffers
            .extract_frame(&key, timing.expected_payload_size)
            .await
        else {
            // Not a full frame buffered yet; accumulation continues
            continue;
        };
        let frame_len = frame.len();
        match transport.send_audio(frame, timing.ptime).await {
            Ok(()) => {
                let mut stats = inner.stats.write().await;
                stats.audio_packets_sent += 1;
                stats.audio_bytes_sent += frame_len as u64;
            }
            Err(source) => {
                inner
                    .report_error(
                        Error::RtpSendFailed {
                            transport_key: key.clone(),
                            source,
                        },
                        Some(key),
                    )
                    .await;
            }
        }
    }
}

/// Jitter output consumer: re-enters the dispatcher's audio delivery for
/// every packet the drain worker releases
async fn run_jitter_consumer(
    inner: Arc<SessionInner>,
    mut rx: mpsc::Receiver<(RtpPacket, String)>,
) {
    debug!("jitter consumer started for session {}", inner.session_id);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some((packet, key)) => dispatch::deliver_audio(&inner, packet, &key).await,
                None => break,
            }
        }
    }
    debug!("jitter consumer stopped for session {}", inner.session_id);
}

/// Housekeeping: 10 ms tick refreshing derived statistics
async fn run_housekeeping(inner: Arc<SessionInner>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(HOUSEKEEPING_TICK) => {
                let mut stats = inner.stats.write().await;
                stats.uptime = stats.session_start.elapsed();
            }
        }
    }
}

/// RTCP worker: periodic reports plus the aggregate statistics callback
async fn run_rtcp_worker(inner: Arc<SessionInner>) {
    debug!("rtcp worker started for session {}", inner.session_id);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.rtcp_interval) => {
                if !*inner.rtcp.enabled.read().await {
                    break;
                }
                if let Err(err) = send_rtcp_report_inner(&inner).await {
                    inner.report_error(err, None).await;
                }
                let session_stats = inner.rtcp.session_stats.read().await.clone();
                let transports = inner.transport_list().await;
                let aggregate = rtcp::aggregate_statistics(&session_stats, &transports);
                let callback = inner.callbacks_snapshot().await.on_rtcp_report;
                if let Some(callback) = callback {
                    callback(aggregate);
                }
            }
        }
    }
    inner.rtcp.worker_running.store(false, Ordering::Release);
    debug!("rtcp worker stopped for session {}", inner.session_id);
}

async fn send_rtcp_report_inner(inner: &Arc<SessionInner>) -> Result<()> {
    if !*inner.rtcp.enabled.read().await {
        return Err(Error::RtcpNotEnabled {
            session_id: inner.session_id.clone(),
        });
    }

    let mut last_err = None;
    for (key, transport) in inner.transport_list().await {
        if let Err(source) = transport.send_rtcp_report().await {
            last_err = Some(Error::RtcpSendFailed {
                transport_key: key,
                source,
            });
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => {
            *inner.rtcp.last_sent.write().await = Some(Instant::now());
            Ok(())
        }
    }
}
