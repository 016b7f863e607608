use crate::messages::{PlayerId, SampleBuffer};

/// One scheduled buffer inside the real-time mixer.
///
/// A looping slot repeats its buffer with no gap; a one-shot slot stops after its last frame.
/// `lead_frames` of silence are emitted before the first frame after a reschedule.
pub struct PlayerSlot {
    pub id: PlayerId,
    sample: SampleBuffer,
    frame_pos: usize,
    lead_frames: usize,
    pub volume: f32,
    muted: bool,
    running: bool,
    looping: bool,
}

impl PlayerSlot {
    pub fn looping(id: PlayerId, sample: SampleBuffer, volume: f32, muted: bool) -> Self {
        Self {
            id,
            sample,
            frame_pos: 0,
            lead_frames: 0,
            volume,
            muted,
            running: false,
            looping: true,
        }
    }

    pub fn one_shot(id: PlayerId, sample: SampleBuffer) -> Self {
        Self {
            looping: false,
            ..Self::looping(id, sample, 1.0, false)
        }
    }

    /// Start playback. Muted slots never start.
    pub fn play(&mut self) {
        if !self.muted {
            self.running = true;
        }
    }

    /// Pause playback: does not change `frame_pos`.
    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Stop and rewind to frame 0.
    pub fn stop(&mut self) {
        self.running = false;
        self.frame_pos = 0;
        self.lead_frames = 0;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frame_pos(&self) -> usize {
        self.frame_pos
    }

    pub fn sample_frames(&self) -> usize {
        self.sample.frames()
    }

    /// Replace the scheduled buffer and restart from frame 0 after `lead_frames`.
    pub fn reschedule(&mut self, sample: SampleBuffer, lead_frames: usize) {
        self.sample = sample;
        self.frame_pos = 0;
        self.lead_frames = lead_frames;
    }

    /// Adds this slot's contribution to an interleaved output buffer.
    ///
    /// Paused or muted slots contribute nothing and do not advance. Returns `false` once a
    /// one-shot slot has played its last frame.
    pub fn mix_into(&mut self, output: &mut [f32], channels: usize) -> bool {
        if !self.running || self.muted || channels == 0 {
            return true;
        }

        let sample_frames = self.sample.frames();
        let sample_channels = self.sample.channels;
        if sample_frames == 0 {
            self.running = false;
            return self.looping;
        }

        for frame in output.chunks_exact_mut(channels) {
            if self.lead_frames > 0 {
                self.lead_frames -= 1;
                continue;
            }

            if self.frame_pos >= sample_frames {
                if !self.looping {
                    self.stop();
                    return false;
                }
                self.frame_pos = 0;
            }

            let base = self.frame_pos * sample_channels;
            for (channel, out) in frame.iter_mut().enumerate() {
                let src = channel.min(sample_channels - 1);
                *out += self.sample.samples[base + src] * self.volume;
            }
            self.frame_pos += 1;
        }

        if !self.looping && self.frame_pos >= sample_frames {
            self.stop();
            return false;
        }
        true
    }
}
