//! Audio Engine Module
//!
//! This module provides the looping multi-track mixer and everything around it.
//! It is organized into sub-modules, each with a specific responsibility:
//!
//! - [`audio_stream`]: CPAL output stream and the real-time [`RtProcessor`]
//! - [`constants`]: Configuration constants and limits
//! - [`errors`]: Audio-specific error types
//! - [`asset_store`]: Bundled and recorded sound assets
//! - [`track`]: Tracks and the control-side mix state
//! - [`mixer`] / [`player_slot`]: Real-time mixing engine and its looping players
//! - [`level_monitor`]: Power measurement and the animated level meter
//! - [`bounce_recorder`]: Rendering the live mix to a file
//! - [`waveform`]: Envelope extraction for finished recordings
//! - [`progress`]: Playback progress clock
//! - [`input_monitor`]: Live microphone input
//! - [`sample_loader`] / [`channels`] / [`speed`]: Decoding and buffer preparation
//!
//! The main [`AudioEngine`] struct lives on the control thread and owns all mutable state.
//! Every change to the real-time side goes through one lock-free command ring.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::audio_engine::asset_store::{AssetStore, Category};
use crate::audio_engine::audio_stream::{
    AudioStreamHandle, RtProcessor, create_audio_stream, setup_logger, start_stream,
};
use crate::audio_engine::bounce_recorder::{BounceRecorder, BounceWriter, RecordingState};
use crate::audio_engine::constants::{
    LIVE_INPUT_LABEL, MAX_TRACKS, MESSAGE_RING_CAPACITY, MIX_CHANNELS, MIX_SAMPLE_RATE_HZ,
    SPEED_CHANGE_LEAD_SECONDS, TAP_BUFFER_FRAMES, WAVEFORM_BUCKETS,
};
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::input_monitor::InputMonitor;
use crate::audio_engine::level_monitor::LevelMeter;
use crate::audio_engine::mixer::RtMixer;
use crate::audio_engine::progress::ProgressClock;
use crate::audio_engine::sample_loader::load_sample_buffer;
use crate::audio_engine::speed::retime_for_speed;
use crate::audio_engine::track::{MixState, Track, TrackId};
use crate::audio_engine::waveform::{
    EnvelopeRequest, EnvelopeResult, WaveformEnvelope, WaveformExtractor,
};
use crate::messages::{AudioMessage, ControlMessage, PlayerId, SampleBuffer};

pub mod asset_store;
pub mod audio_stream;
pub mod bounce_recorder;
pub mod channels;
pub mod constants;
pub mod errors;
pub mod input_monitor;
pub mod level_monitor;
pub mod mixer;
pub mod player_slot;
pub mod progress;
pub mod sample_loader;
pub mod speed;
pub mod track;
pub mod waveform;

/// Engine setup. [`Default`] uses the fixed constants and relative directories.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Read-only directory holding the bundled catalog.
    pub bundle_dir: PathBuf,
    /// Directory for the bounce file and live-input recordings.
    pub writable_dir: PathBuf,
    /// Mix bus sample rate in Hz.
    pub sample_rate: u32,
    /// Mix bus channel count (1 or 2).
    pub channels: usize,
    /// Frames per output buffer.
    pub buffer_frames: u32,
    /// Bucket count of extracted waveform envelopes.
    pub waveform_buckets: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("sounds"),
            writable_dir: PathBuf::from("recordings"),
            sample_rate: MIX_SAMPLE_RATE_HZ,
            channels: MIX_CHANNELS,
            buffer_frames: TAP_BUFFER_FRAMES,
            waveform_buckets: WAVEFORM_BUCKETS,
        }
    }
}

impl EngineConfig {
    pub fn new(bundle_dir: impl Into<PathBuf>, writable_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            writable_dir: writable_dir.into(),
            ..Self::default()
        }
    }

    /// Replaces unusable values with the defaults.
    fn validated(mut self) -> Self {
        if self.sample_rate == 0 {
            self.sample_rate = MIX_SAMPLE_RATE_HZ;
        }
        self.channels = self.channels.clamp(1, 2);
        if self.buffer_frames == 0 {
            self.buffer_frames = TAP_BUFFER_FRAMES;
        }
        self.waveform_buckets = self.waveform_buckets.max(1);
        self
    }
}

/// Receiver of everything the core reports to the UI layer.
///
/// There is a single observer slot; every method defaults to a no-op.
pub trait EngineObserver {
    /// Power of the latest mix-bus (or live input) buffer, in dB.
    fn on_level_sample(&mut self, _power_db: f32) {}

    /// Envelope of the last bounce, or `None` when it could not be decoded.
    fn on_envelope_ready(&mut self, _envelope: Option<&WaveformEnvelope>) {}

    /// Bounce playback progress in `[0, 1]`.
    fn on_progress(&mut self, _fraction: f32) {}

    /// The progress clock reached 1.0 without being cancelled.
    fn on_playback_finished(&mut self) {}

    fn on_recording_finished(&mut self, _path: &Path) {}

    fn on_track_list_changed(&mut self) {}
}

/// AudioEngine is the control-domain owner of the mix.
pub struct AudioEngine {
    config: EngineConfig,
    store: AssetStore,
    mix: MixState,
    producer: Producer<ControlMessage>,
    consumer: Consumer<AudioMessage>,
    /// Real-time half, until moved into the output stream.
    processor: Option<RtProcessor>,
    stream_handle: Option<AudioStreamHandle>,
    recorder: BounceRecorder,
    waveform: WaveformExtractor,
    progress: ProgressClock,
    /// Bounce generation waiting for its envelope before playback can start.
    pending_playback: Option<u64>,
    input: Option<InputMonitor>,
    input_disabled: bool,
    meter: LevelMeter,
    observer: Option<Box<dyn EngineObserver>>,
}

impl AudioEngine {
    /// Create a new AudioEngine. No device is opened until [`run`](Self::run).
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        setup_logger();

        let config = config.validated();
        std::fs::create_dir_all(&config.writable_dir)?;

        let store = AssetStore::new(&config.bundle_dir, &config.writable_dir);
        let recorder = BounceRecorder::new(store.bounce_path());

        let (producer, control_rx) = RingBuffer::new(MESSAGE_RING_CAPACITY);
        let (audio_tx, consumer) = RingBuffer::new(MESSAGE_RING_CAPACITY);
        let processor = RtProcessor::new(RtMixer::new(config.channels), control_rx, audio_tx);

        Ok(Self {
            waveform: WaveformExtractor::new(config.waveform_buckets),
            config,
            store,
            mix: MixState::new(),
            producer,
            consumer,
            processor: Some(processor),
            stream_handle: None,
            recorder,
            progress: ProgressClock::new(),
            pending_playback: None,
            input: None,
            input_disabled: false,
            meter: LevelMeter::default(),
            observer: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn asset_store(&self) -> &AssetStore {
        &self.store
    }

    /// Installs the observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: Box<dyn EngineObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Initialize and run the output stream on the default device.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let processor = self.processor.take().ok_or(EngineError::AlreadyRunning)?;
        let handle = create_audio_stream(
            processor,
            self.config.channels as u16,
            self.config.sample_rate,
            self.config.buffer_frames,
        )?;
        start_stream(&handle.stream)?;
        self.stream_handle = Some(handle);
        Ok(())
    }

    /// Takes the real-time half to drive it without a device (offline rendering).
    pub fn take_processor(&mut self) -> Option<RtProcessor> {
        self.processor.take()
    }

    pub fn is_running(&self) -> bool {
        self.stream_handle.is_some()
    }

    /// Shut down the audio engine.
    pub fn shut_down(&mut self) {
        if let Some(monitor) = self.input.take() {
            if let Err(err) = monitor.stop() {
                log::warn!("Failed to finalize live input: {err}");
            }
        }
        self.stream_handle = None;
        log::info!("AudioEngine shut down");
    }

    fn send(&mut self, message: ControlMessage, name: &'static str) -> Result<(), EngineError> {
        self.producer
            .push(message)
            .map_err(|_| EngineError::QueueFull(name))
    }

    fn notify(&mut self, event: impl FnOnce(&mut dyn EngineObserver)) {
        if let Some(observer) = self.observer.as_deref_mut() {
            event(observer);
        }
    }

    fn load(&self, path: &Path, name: &str) -> Result<SampleBuffer, EngineError> {
        load_sample_buffer(path, self.config.channels, self.config.sample_rate).map_err(
            |source| EngineError::AssetUnreadable {
                name: name.to_string(),
                source,
            },
        )
    }

    // ---- tracks ----

    pub fn tracks(&self) -> &[Track] {
        self.mix.tracks()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.mix.get(id)
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.mix.current()
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, EngineError> {
        self.mix.get_mut(id).ok_or(EngineError::UnknownTrack(id.0))
    }

    /// Selects a sound. A new track is attached and made current; an asset that already has
    /// a track only re-activates that track as current.
    pub fn select_sound(&mut self, category: Category, name: &str) -> Result<TrackId, EngineError> {
        let asset = self.store.resolve(category, name)?;
        if let Some(id) = self.mix.find_by_asset(&asset) {
            self.mix.set_current(id);
            self.notify(|o| o.on_track_list_changed());
            return Ok(id);
        }

        if self.mix.len() >= MAX_TRACKS {
            return Err(EngineError::TrackLimit(MAX_TRACKS));
        }

        let sample = self.load(asset.path(), asset.name())?;
        let frames = sample.frames();
        let start = self.mix.is_playing();
        let id = self.mix.push(asset);
        let player = PlayerId(id.0);
        let volume = self.mix.get(id).map(Track::volume).unwrap_or_default();

        if let Err(err) = self.send(
            ControlMessage::AttachPlayer {
                id: player,
                sample,
                volume,
                muted: false,
                start,
            },
            "AttachPlayer",
        ) {
            self.mix.remove(id);
            return Err(err);
        }

        let track = self.track_mut(id)?;
        track.attach_player(player);
        track.set_playing(start);
        log::info!("Selected {category}/{name} as {id} ({frames} frames)");
        self.notify(|o| o.on_track_list_changed());
        Ok(id)
    }

    /// Makes an attached track current.
    pub fn select_track(&mut self, id: TrackId) -> Result<(), EngineError> {
        if !self.mix.set_current(id) {
            return Err(EngineError::UnknownTrack(id.0));
        }
        self.notify(|o| o.on_track_list_changed());
        Ok(())
    }

    /// Detaches and removes a track. The last remaining track becomes current if needed.
    pub fn remove_track(&mut self, id: TrackId) -> Result<(), EngineError> {
        let player = self.mix.get(id).ok_or(EngineError::UnknownTrack(id.0))?.player();
        if let Some(player) = player {
            self.send(ControlMessage::DetachPlayer { id: player }, "DetachPlayer")?;
        }
        if let Some(mut track) = self.mix.remove(id) {
            track.detach_player();
            log::info!("Removed {id}");
        }
        self.notify(|o| o.on_track_list_changed());
        Ok(())
    }

    /// Detaches every track and forgets the last bounce and its envelope.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.send(ControlMessage::DetachAll(), "DetachAll")?;
        for mut track in self.mix.clear() {
            track.detach_player();
        }
        self.cancel_bounce_playback()?;
        self.recorder.forget();
        self.waveform.invalidate();
        log::info!("Mix cleared");
        self.notify(|o| o.on_track_list_changed());
        Ok(())
    }

    /// Sets a track's volume, clamped to `[0, 1]`. Returns the applied value.
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<f32, EngineError> {
        let track = self.track_mut(id)?;
        let volume = track.set_volume(volume);
        if let Some(player) = track.player() {
            self.send(
                ControlMessage::SetPlayerVolume { id: player, volume },
                "SetPlayerVolume",
            )?;
        }
        Ok(volume)
    }

    /// Sets a track's speed, clamped to `[0.25, 4]`, and reschedules its loop buffer.
    ///
    /// The buffer is re-decoded from disk and shortened (or stretched) to
    /// `round(frames / speed)` frames. Looping restarts from frame 0 after a short lead.
    pub fn set_speed(&mut self, id: TrackId, speed: f32) -> Result<f32, EngineError> {
        let track = self.mix.get(id).ok_or(EngineError::UnknownTrack(id.0))?;
        let previous = track.speed();
        let asset = track.asset().clone();
        let player = track.player();
        let resume = self.mix.is_playing() && track.is_playing();

        let speed = self.track_mut(id)?.set_speed(speed);
        let Some(player) = player else {
            return Ok(speed);
        };

        let rescheduled = self
            .load(asset.path(), asset.name())
            .map(|sample| retime_for_speed(&sample, speed))
            .and_then(|sample| {
                let lead_frames =
                    (SPEED_CHANGE_LEAD_SECONDS * self.config.sample_rate as f32).round() as usize;
                self.send(
                    ControlMessage::Reschedule {
                        id: player,
                        sample,
                        lead_frames,
                        resume,
                    },
                    "Reschedule",
                )
            });
        if let Err(err) = rescheduled {
            self.track_mut(id)?.set_speed(previous);
            return Err(err);
        }
        Ok(speed)
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<(), EngineError> {
        let player = self.mix.get(id).ok_or(EngineError::UnknownTrack(id.0))?.player();
        let resume = !muted && self.mix.is_playing();
        if let Some(player) = player {
            self.send(
                ControlMessage::SetPlayerMuted { id: player, muted },
                "SetPlayerMuted",
            )?;
            if resume {
                self.send(
                    ControlMessage::SetPlayerRunning {
                        id: player,
                        running: true,
                    },
                    "SetPlayerRunning",
                )?;
            }
        }

        let track = self.track_mut(id)?;
        track.set_muted(muted);
        if muted {
            track.set_playing(false);
        } else if resume {
            track.set_playing(true);
        }
        Ok(())
    }

    /// Starts or pauses a single track. Muted tracks stay paused. Returns the new state.
    pub fn toggle_track_playing(&mut self, id: TrackId) -> Result<bool, EngineError> {
        let track = self.mix.get(id).ok_or(EngineError::UnknownTrack(id.0))?;
        let running = !track.is_playing() && !track.is_muted();
        if let Some(player) = track.player() {
            self.send(
                ControlMessage::SetPlayerRunning {
                    id: player,
                    running,
                },
                "SetPlayerRunning",
            )?;
        }
        self.track_mut(id)?.set_playing(running);
        Ok(running)
    }

    /// Starts every unmuted track, or pauses every track.
    pub fn set_playing(&mut self, active: bool) -> Result<(), EngineError> {
        self.send(ControlMessage::SetPlaying(active), "SetPlaying")?;
        self.mix.set_playing(active);
        for track in self.mix.tracks_mut() {
            let playing = active && !track.is_muted();
            track.set_playing(playing);
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.mix.is_playing()
    }

    // ---- bounce recording ----

    /// Starts rendering the mix to the bounce file and sets the mix playing.
    pub fn start_recording(&mut self) -> Result<(), EngineError> {
        if self.progress.is_playing() || self.pending_playback.is_some() {
            self.cancel_bounce_playback()?;
        }

        let writer = self
            .recorder
            .start(self.config.channels, self.config.sample_rate)?;
        if let Err(PushError::Full(message)) =
            self.producer.push(ControlMessage::StartBounce(Box::new(writer)))
        {
            self.abandon_recording(message);
            return Err(EngineError::QueueFull("StartBounce"));
        }
        self.waveform.invalidate();
        self.set_playing(true)
    }

    fn abandon_recording(&mut self, message: ControlMessage) {
        if let ControlMessage::StartBounce(writer) = message {
            let _ = self.recorder.request_stop();
            if let Err(err) = self.recorder.complete(*writer) {
                log::warn!("Failed to close abandoned bounce: {err}");
            }
            self.recorder.forget();
        }
    }

    /// Stops recording and pauses the mix. The file is finalized once the audio thread
    /// hands the writer back; [`EngineObserver::on_recording_finished`] reports it.
    pub fn stop_recording(&mut self) -> Result<(), EngineError> {
        if *self.recorder.state() != RecordingState::Recording {
            return Err(EngineError::NotRecording);
        }
        self.send(ControlMessage::StopBounce(), "StopBounce")?;
        self.recorder.request_stop()?;
        self.set_playing(false)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    pub fn last_bounce_path(&self) -> Option<&Path> {
        self.recorder.last_bounce().map(|b| b.path.as_path())
    }

    fn finish_bounce(&mut self, writer: BounceWriter) {
        let (path, generation) = match self.recorder.complete(writer) {
            Ok(finished) => (finished.path.clone(), finished.generation),
            Err(err) => {
                log::error!("Failed to finalize bounce: {err}");
                return;
            }
        };
        self.waveform.request(generation, &path);
        self.notify(|o| o.on_recording_finished(&path));
    }

    // ---- bounce playback ----

    /// Plays the last bounce once, or stops it if playback is already running.
    ///
    /// Returns `true` when playback was started (or is waiting for the envelope) and `false`
    /// when it was stopped.
    pub fn toggle_bounce_playback(&mut self) -> Result<bool, EngineError> {
        self.toggle_bounce_playback_at(Instant::now())
    }

    fn toggle_bounce_playback_at(&mut self, now: Instant) -> Result<bool, EngineError> {
        if self.is_playing_bounce() {
            self.cancel_bounce_playback()?;
            return Ok(false);
        }

        let bounce = self.recorder.last_bounce().ok_or(EngineError::NoBounce)?;
        let (generation, path) = (bounce.generation, bounce.path.clone());
        match self.waveform.request(generation, &path) {
            EnvelopeRequest::Ready(envelope) => {
                self.begin_bounce_playback(&path, envelope.duration, now)?;
                self.notify(|o| o.on_envelope_ready(Some(&envelope)));
            }
            EnvelopeRequest::Started | EnvelopeRequest::InFlight => {
                self.pending_playback = Some(generation);
            }
        }
        Ok(true)
    }

    pub fn is_playing_bounce(&self) -> bool {
        self.progress.is_playing() || self.pending_playback.is_some()
    }

    fn begin_bounce_playback(
        &mut self,
        path: &Path,
        duration: f64,
        now: Instant,
    ) -> Result<(), EngineError> {
        let sample = self.load(path, &path.display().to_string())?;
        self.send(ControlMessage::PlayBounce { sample }, "PlayBounce")?;
        self.progress.start(duration, now);
        log::info!("Bounce playback started ({duration:.2} s)");
        self.notify(|o| o.on_progress(0.0));
        Ok(())
    }

    fn cancel_bounce_playback(&mut self) -> Result<(), EngineError> {
        self.pending_playback = None;
        if self.progress.cancel() {
            self.send(ControlMessage::StopBouncePlayback(), "StopBouncePlayback")?;
            log::info!("Bounce playback stopped");
        }
        self.notify(|o| o.on_progress(0.0));
        Ok(())
    }

    fn envelope_finished(&mut self, result: EnvelopeResult, now: Instant) {
        let current = self.recorder.last_bounce().map(|b| b.generation);
        if current != Some(result.generation) {
            log::debug!("Dropping envelope of replaced bounce {}", result.generation);
            return;
        }

        let start_playback = self.pending_playback == Some(result.generation);
        self.pending_playback = None;
        match result.envelope {
            Ok(envelope) => {
                if start_playback {
                    if let Err(err) = self.begin_bounce_playback(&result.path, envelope.duration, now)
                    {
                        log::error!("Failed to start bounce playback: {err}");
                    }
                }
                self.notify(|o| o.on_envelope_ready(Some(&envelope)));
            }
            Err(err) => {
                log::warn!("{err}");
                self.notify(|o| o.on_envelope_ready(None));
            }
        }
    }

    /// Envelope of the last bounce, if it has been extracted.
    pub fn envelope(&self) -> Option<Arc<WaveformEnvelope>> {
        let generation = self.recorder.last_bounce()?.generation;
        self.waveform.cached(generation)
    }

    // ---- live input ----

    /// Pauses the mix and starts recording the default input device.
    pub fn start_listening(&mut self) -> Result<(), EngineError> {
        if self.input_disabled {
            return Err(EngineError::DeviceUnavailable(
                "live input disabled until permission is reset".to_string(),
            ));
        }
        if self.input.is_some() {
            return Err(EngineError::AlreadyListening);
        }

        self.set_playing(false)?;
        let path = self.store.live_input_path(LIVE_INPUT_LABEL);

        // The previous take is about to be overwritten.
        let stale = self
            .mix
            .tracks()
            .iter()
            .find(|t| t.asset().category().is_live_input() && t.asset().path() == path)
            .map(Track::id);
        if let Some(id) = stale {
            self.remove_track(id)?;
        }

        match InputMonitor::start(&path) {
            Ok(monitor) => {
                self.input = Some(monitor);
                Ok(())
            }
            Err(err @ EngineError::DeviceUnavailable(_)) => {
                log::warn!("Live input disabled: {err}");
                self.input_disabled = true;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Finalizes the live-input recording and selects it as a new track.
    pub fn stop_listening(&mut self) -> Result<TrackId, EngineError> {
        let monitor = self.input.take().ok_or(EngineError::NotListening)?;
        monitor.stop()?;
        self.select_sound(Category::LiveInput, LIVE_INPUT_LABEL)
    }

    pub fn is_listening(&self) -> bool {
        self.input.is_some()
    }

    pub fn is_input_available(&self) -> bool {
        !self.input_disabled
    }

    /// Re-enables live input after a permission change.
    pub fn reset_input_permission(&mut self) {
        self.input_disabled = false;
    }

    // ---- events ----

    /// Drains audio replies and background results, advances the progress clock and
    /// dispatches everything to the observer. Call from the control thread's timer.
    pub fn poll_events(&mut self) {
        self.poll_events_at(Instant::now());
    }

    fn poll_events_at(&mut self, now: Instant) {
        let mut level = None;
        while let Ok(message) = self.consumer.pop() {
            match message {
                AudioMessage::Level(power_db) => level = Some(power_db),
                AudioMessage::BounceStopped(writer) => self.finish_bounce(*writer),
                AudioMessage::BouncePlaybackEnded() => {
                    log::debug!("Bounce player reached its last frame");
                }
            }
        }

        let input_level = self.input.as_mut().and_then(InputMonitor::poll_level);
        if let Some(power_db) = latest_level(level, input_level) {
            self.meter.push(power_db);
            self.notify(|o| o.on_level_sample(power_db));
        }

        while let Some(result) = self.waveform.try_recv() {
            self.envelope_finished(result, now);
        }

        if let Some(tick) = self.progress.tick(now) {
            self.notify(|o| o.on_progress(tick.fraction));
            if tick.finished {
                log::info!("Bounce playback finished");
                self.notify(|o| o.on_playback_finished());
            }
        }
    }

    /// Advances the level meter by one refresh period and returns its display value.
    pub fn tick_meter(&mut self) -> f32 {
        self.meter.step()
    }
}

/// Live input, when it delivered a buffer, is what the meter shows.
fn latest_level(mix: Option<f32>, input: Option<f32>) -> Option<f32> {
    input.or(mix)
}
