//! Real-time audio mixer implementation.
//!
//! This module provides the [`RtMixer`] struct which owns the mix bus: it sums every attached
//! [`PlayerSlot`](crate::audio_engine::player_slot::PlayerSlot) into one interleaved output
//! buffer and then runs the tap on the result. The tap measures channel-0 power and, while a
//! bounce is active, appends the buffer to the bounce file.
//!
//! The mixer only changes state in [`RtMixer::apply`], which the stream callback calls for
//! each queued [`ControlMessage`] before rendering, so every change lands on a buffer boundary.

use cpal::Sample;

use crate::audio_engine::bounce_recorder::BounceWriter;
use crate::audio_engine::constants::{LEVEL_FLOOR_DB, MAX_TRACKS, VOLUME_MAX, VOLUME_MIN};
use crate::audio_engine::level_monitor::buffer_power_db;
use crate::audio_engine::player_slot::PlayerSlot;
use crate::messages::{AudioMessage, ControlMessage, PlayerId, SampleBuffer};

/// Handle of the one-shot bounce playback slot.
const BOUNCE_PLAYER_ID: PlayerId = PlayerId(u32::MAX);

/// What the tap observed on the last rendered buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapReport {
    /// Channel-0 power in dB.
    pub power_db: f32,
    /// The bounce playback slot played its last frame during this buffer.
    pub bounce_playback_ended: bool,
}

/// Real-time mixer that handles looping players, bounce playback and the mix-bus tap.
pub struct RtMixer {
    /// Number of output channels (1 for mono, 2 for stereo).
    channels: usize,

    /// Global play flag.
    playing: bool,

    /// Attached track players, at most [`MAX_TRACKS`].
    players: Vec<PlayerSlot>,

    /// One-shot player for the last bounce.
    bounce_player: Option<PlayerSlot>,

    /// Open bounce file while recording.
    bounce: Option<Box<BounceWriter>>,
}

impl RtMixer {
    /// Creates a new RtMixer with the specified number of channels.
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            playing: false,
            players: Vec::with_capacity(MAX_TRACKS),
            bounce_player: None,
            bounce: None,
        }
    }

    /// Applies one control message. Returns a reply for the control thread, if any.
    pub fn apply(&mut self, message: ControlMessage) -> Option<AudioMessage> {
        match message {
            ControlMessage::AttachPlayer {
                id,
                sample,
                volume,
                muted,
                start,
            } => self.attach_player(id, sample, volume, muted, start),
            ControlMessage::Reschedule {
                id,
                sample,
                lead_frames,
                resume,
            } => self.reschedule(id, sample, lead_frames, resume),
            ControlMessage::SetPlayerVolume { id, volume } => self.set_volume(id, volume),
            ControlMessage::SetPlayerMuted { id, muted } => {
                if let Some(player) = self.player_mut(id) {
                    player.set_muted(muted);
                }
            }
            ControlMessage::SetPlayerRunning { id, running } => {
                if let Some(player) = self.player_mut(id) {
                    if running {
                        player.play();
                    } else {
                        player.pause();
                    }
                }
            }
            ControlMessage::SetPlaying(active) => self.set_playing(active),
            ControlMessage::DetachPlayer { id } => self.detach_player(id),
            ControlMessage::DetachAll() => {
                self.players.clear();
                self.playing = false;
            }
            ControlMessage::StartBounce(writer) => {
                self.bounce = Some(writer);
            }
            ControlMessage::StopBounce() => {
                return self.bounce.take().map(AudioMessage::BounceStopped);
            }
            ControlMessage::PlayBounce { sample } => {
                let mut player = PlayerSlot::one_shot(BOUNCE_PLAYER_ID, sample);
                player.play();
                self.bounce_player = Some(player);
            }
            ControlMessage::StopBouncePlayback() => {
                self.bounce_player = None;
            }
        }
        None
    }

    fn attach_player(
        &mut self,
        id: PlayerId,
        sample: SampleBuffer,
        volume: f32,
        muted: bool,
        start: bool,
    ) {
        let volume = sanitize_volume(volume);
        let mut player = PlayerSlot::looping(id, sample, volume, muted);
        if start {
            player.play();
        }

        if let Some(existing) = self.player_mut(id) {
            *existing = player;
            return;
        }

        // No free slot: drop deterministically.
        if self.players.len() < MAX_TRACKS {
            self.players.push(player);
        }
    }

    fn reschedule(&mut self, id: PlayerId, sample: SampleBuffer, lead_frames: usize, resume: bool) {
        let Some(player) = self.player_mut(id) else {
            return;
        };

        player.stop();
        player.reschedule(sample, lead_frames);
        if resume {
            player.play();
        }
    }

    fn set_volume(&mut self, id: PlayerId, volume: f32) {
        if let Some(player) = self.player_mut(id) {
            player.volume = sanitize_volume(volume);
        }
    }

    /// Starts every unmuted player at once, or pauses every player regardless of mute.
    pub fn set_playing(&mut self, active: bool) {
        self.playing = active;
        for player in &mut self.players {
            if active {
                player.play();
            } else {
                player.pause();
            }
        }
    }

    /// Stops and releases a player. Unknown ids are ignored.
    pub fn detach_player(&mut self, id: PlayerId) {
        self.players.retain(|p| p.id != id);
    }

    fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSlot> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerSlot> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_recording(&self) -> bool {
        self.bounce.is_some()
    }

    pub fn is_playing_bounce(&self) -> bool {
        self.bounce_player.is_some()
    }

    /// Renders one buffer of interleaved frames and runs the tap on it.
    pub fn render(&mut self, output: &mut [f32]) -> TapReport {
        output.fill(Sample::EQUILIBRIUM);

        let mut report = TapReport {
            power_db: LEVEL_FLOOR_DB,
            bounce_playback_ended: false,
        };
        if self.channels == 0 {
            return report;
        }

        for player in &mut self.players {
            player.mix_into(output, self.channels);
        }

        if let Some(player) = self.bounce_player.as_mut() {
            if !player.mix_into(output, self.channels) {
                self.bounce_player = None;
                report.bounce_playback_ended = true;
            }
        }

        report.power_db = buffer_power_db(output, self.channels);
        if let Some(writer) = self.bounce.as_mut() {
            writer.write_interleaved(output);
        }
        report
    }

    /// Gets the number of channels configured for this mixer.
    pub fn channels(&self) -> usize {
        self.channels
    }
}

fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(VOLUME_MIN, VOLUME_MAX)
    } else {
        VOLUME_MIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_sample(channels: usize, frames: usize, value: f32) -> SampleBuffer {
        SampleBuffer::new(channels, vec![value; channels * frames])
    }

    fn attach(mixer: &mut RtMixer, id: u32, sample: SampleBuffer, volume: f32) {
        mixer.apply(ControlMessage::AttachPlayer {
            id: PlayerId(id),
            sample,
            volume,
            muted: false,
            start: false,
        });
    }

    #[test]
    fn test_mixer_creation() {
        let mixer = RtMixer::new(2);
        assert_eq!(mixer.channels(), 2);
        assert_eq!(mixer.player_count(), 0);
        assert!(!mixer.is_playing());
    }

    #[test]
    fn test_render_silence() {
        let mut mixer = RtMixer::new(2);
        let mut output = vec![1.0; 200];

        let report = mixer.render(&mut output);

        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(report.power_db, LEVEL_FLOOR_DB);
    }

    #[test]
    fn test_attached_player_waits_for_play() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 10, 0.5), 1.0);

        let mut output = vec![0.0; 10];
        mixer.render(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));

        mixer.apply(ControlMessage::SetPlaying(true));
        mixer.render(&mut output);
        assert!(output.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_render_loop_sample() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 5, 0.5), 1.0);
        mixer.set_playing(true);

        let mut output = vec![0.0; 20];
        mixer.render(&mut output);

        assert!(output.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_multiple_players_mixing() {
        let mut mixer = RtMixer::new(2);
        attach(&mut mixer, 1, create_test_sample(2, 10, 0.3), 1.0);
        attach(&mut mixer, 2, create_test_sample(2, 10, 0.2), 1.0);
        mixer.set_playing(true);

        let mut output = vec![0.0; 20];
        mixer.render(&mut output);

        assert!(output.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_volume_scales_contribution_linearly() {
        for volume in [0.0f32, 0.25, 0.5, 0.75, 1.0, 1.5, -1.0] {
            let mut mixer = RtMixer::new(1);
            attach(&mut mixer, 1, create_test_sample(1, 8, 0.8), 1.0);
            mixer.set_playing(true);
            mixer.apply(ControlMessage::SetPlayerVolume {
                id: PlayerId(1),
                volume,
            });

            let mut output = vec![0.0; 8];
            mixer.render(&mut output);

            let expected = 0.8 * volume.clamp(0.0, 1.0);
            assert!(
                output.iter().all(|&s| (s - expected).abs() < 1e-6),
                "volume {volume}"
            );
        }
    }

    #[test]
    fn test_muted_player_never_starts_and_is_excluded() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 8, 0.5), 1.0);
        mixer.apply(ControlMessage::AttachPlayer {
            id: PlayerId(2),
            sample: create_test_sample(1, 8, 0.25),
            volume: 1.0,
            muted: true,
            start: false,
        });

        mixer.set_playing(true);
        assert!(mixer.player(PlayerId(1)).unwrap().is_running());
        assert!(!mixer.player(PlayerId(2)).unwrap().is_running());

        let mut output = vec![0.0; 8];
        mixer.render(&mut output);
        assert!(output.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_pause_stops_every_player() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 8, 0.5), 1.0);
        attach(&mut mixer, 2, create_test_sample(1, 8, 0.5), 1.0);
        mixer.set_playing(true);
        mixer.apply(ControlMessage::SetPlayerMuted {
            id: PlayerId(2),
            muted: true,
        });

        mixer.apply(ControlMessage::SetPlaying(false));
        assert!(!mixer.player(PlayerId(1)).unwrap().is_running());
        assert!(!mixer.player(PlayerId(2)).unwrap().is_running());
    }

    #[test]
    fn test_single_player_running_toggle() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 8, 0.5), 1.0);
        mixer.set_playing(true);

        mixer.apply(ControlMessage::SetPlayerRunning {
            id: PlayerId(1),
            running: false,
        });
        assert!(!mixer.player(PlayerId(1)).unwrap().is_running());

        mixer.apply(ControlMessage::SetPlayerRunning {
            id: PlayerId(1),
            running: true,
        });
        assert!(mixer.player(PlayerId(1)).unwrap().is_running());
    }

    #[test]
    fn test_reschedule_restarts_after_lead() {
        let mut mixer = RtMixer::new(1);
        let ramp = SampleBuffer::new(1, vec![1.0, 2.0, 3.0, 4.0]);
        attach(&mut mixer, 1, ramp, 1.0);
        mixer.set_playing(true);
        let mut output = vec![0.0; 3];
        mixer.render(&mut output);

        mixer.apply(ControlMessage::Reschedule {
            id: PlayerId(1),
            sample: SampleBuffer::new(1, vec![1.0, 3.0]),
            lead_frames: 2,
            resume: true,
        });
        let mut output = vec![0.0; 6];
        mixer.render(&mut output);
        assert_eq!(output, vec![0.0, 0.0, 1.0, 3.0, 1.0, 3.0]);
    }

    #[test]
    fn test_reschedule_without_resume_stays_stopped() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 4, 0.5), 1.0);

        mixer.apply(ControlMessage::Reschedule {
            id: PlayerId(1),
            sample: create_test_sample(1, 2, 0.5),
            lead_frames: 0,
            resume: false,
        });
        assert!(!mixer.player(PlayerId(1)).unwrap().is_running());
    }

    #[test]
    fn test_detach_player_is_idempotent() {
        let mut mixer = RtMixer::new(1);
        attach(&mut mixer, 1, create_test_sample(1, 4, 0.5), 1.0);
        attach(&mut mixer, 2, create_test_sample(1, 4, 0.5), 1.0);

        mixer.apply(ControlMessage::DetachPlayer { id: PlayerId(1) });
        mixer.apply(ControlMessage::DetachPlayer { id: PlayerId(1) });
        assert_eq!(mixer.player_count(), 1);
        assert!(mixer.player(PlayerId(2)).is_some());

        mixer.apply(ControlMessage::DetachAll());
        assert_eq!(mixer.player_count(), 0);
    }

    #[test]
    fn test_player_limit() {
        let mut mixer = RtMixer::new(1);
        for id in 0..(MAX_TRACKS as u32 + 5) {
            attach(&mut mixer, id, create_test_sample(1, 4, 0.5), 1.0);
        }
        assert_eq!(mixer.player_count(), MAX_TRACKS);
    }

    #[test]
    fn test_tap_reports_power() {
        let mut mixer = RtMixer::new(2);
        attach(&mut mixer, 1, create_test_sample(2, 16, 0.5), 1.0);
        mixer.set_playing(true);

        let mut output = vec![0.0; 32];
        let report = mixer.render(&mut output);
        assert!((report.power_db - (-6.0206)).abs() < 1e-3);
    }

    #[test]
    fn test_bounce_playback_runs_once() {
        let mut mixer = RtMixer::new(1);
        mixer.apply(ControlMessage::PlayBounce {
            sample: SampleBuffer::new(1, vec![0.5; 6]),
        });
        assert!(mixer.is_playing_bounce());

        let mut output = vec![0.0; 4];
        assert!(!mixer.render(&mut output).bounce_playback_ended);
        let report = mixer.render(&mut output);
        assert!(report.bounce_playback_ended);
        assert_eq!(output, vec![0.5, 0.5, 0.0, 0.0]);
        assert!(!mixer.is_playing_bounce());
    }

    #[test]
    fn test_stop_bounce_playback() {
        let mut mixer = RtMixer::new(1);
        mixer.apply(ControlMessage::PlayBounce {
            sample: SampleBuffer::new(1, vec![0.5; 64]),
        });
        mixer.apply(ControlMessage::StopBouncePlayback());

        let mut output = vec![0.0; 8];
        mixer.render(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_tap_writes_bounce_and_hands_writer_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        let writer = BounceWriter::create(&path, 2, 44_100).unwrap();

        let mut mixer = RtMixer::new(2);
        attach(&mut mixer, 1, create_test_sample(2, 100, 0.25), 1.0);
        mixer.set_playing(true);
        assert!(mixer.apply(ControlMessage::StopBounce()).is_none());

        mixer.apply(ControlMessage::StartBounce(Box::new(writer)));
        assert!(mixer.is_recording());
        let mut output = vec![0.0; 64];
        mixer.render(&mut output);
        mixer.render(&mut output);

        let Some(AudioMessage::BounceStopped(writer)) = mixer.apply(ControlMessage::StopBounce())
        else {
            panic!("expected the bounce writer back");
        };
        assert!(!mixer.is_recording());
        assert_eq!(writer.frames_written(), 64);

        mixer.render(&mut output);
        assert_eq!(writer.frames_written(), 64);
    }
}
