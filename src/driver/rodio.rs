use std::time::Duration;

use crate::driver::AudioDevice;

const TONE_FREQ: f32 = 349.23; // F4
const SAMPLE_RATE: u32 = 44_100;

pub struct Rodio {
    // Output audio source
    _stream: rodio::OutputStream,
    // Handle to audio device which controls playback
    sink: rodio::Sink,
}

impl Rodio {
    pub fn new() -> Self {
        use rodio::Source;

        let (stream, handle) = rodio::OutputStream::try_default().unwrap();
        let sink = rodio::Sink::try_new(&handle).unwrap();

        let source = SquareWave::new(TONE_FREQ).amplify(0.1);
        sink.append(source);
        sink.pause();

        Rodio {
            _stream: stream,
            sink,
        }
    }
}

impl AudioDevice for Rodio {
    fn receive_signal(&mut self, active: bool) {
        match active {
            true => self.sink.play(),
            false => self.sink.pause(),
        }
    }
}

// rodio only ships sine wave synthesis; the classic CHIP-8 beeper is a
// square wave, which is simple enough to sample by hand
struct SquareWave {
    freq: f32,
    sample: u32,
}

impl SquareWave {
    fn new(freq: f32) -> Self {
        SquareWave { freq, sample: 0 }
    }
}

impl Iterator for SquareWave {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        self.sample = self.sample.wrapping_add(1);
        let period = SAMPLE_RATE as f32 / self.freq;
        let phase = (self.sample as f32 / period).fract();
        Some(if phase < 0.5 { 1.0 } else { -1.0 })
    }
}

impl rodio::Source for SquareWave {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
