// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//!
//! Fades are driven by the caller: call `update` once per frame with the time elapsed
//! since the previous call.
use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{channel::Channel, error::Result, module::Module};

/// Tracks how far along a fade is.
#[derive(Clone, Copy, Debug)]
struct Progress {
    duration: Duration,
    elapsed: Duration,
}

impl Progress {
    fn new(duration: Duration) -> Progress {
        Progress {
            duration,
            elapsed: Duration::ZERO,
        }
    }

    /// Advances by dt and returns the fraction done, 0 to 1.
    fn advance(&mut self, dt: Duration) -> f64 {
        self.elapsed = self.elapsed.saturating_add(dt);
        if self.is_done() {
            1.0
        } else {
            self.elapsed.as_secs_f64() / self.duration.as_secs_f64()
        }
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

/// Fades the volume of a channel.
#[derive(Debug)]
pub struct VolumeFade {
    start: f32,
    end: f32,
    progress: Progress,
    channel: Arc<Channel>,
    stopped: bool,
}

impl VolumeFade {
    /// Creates a fade between two volumes, 0 to 1. A negative start or end stands for the
    /// channel's current volume. A fade ending at or below 0 stops the channel once done.
    pub fn new(start: f32, end: f32, duration: Duration, channel: Arc<Channel>) -> Result<VolumeFade> {
        let start = if start < 0.0 { channel.volume()? } else { start };
        let end = if end < 0.0 { channel.volume()? } else { end };
        Ok(VolumeFade {
            start,
            end,
            progress: Progress::new(duration),
            channel,
            stopped: false,
        })
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Starts the fade over.
    pub fn restart(&mut self) {
        self.progress.restart();
        self.stopped = false;
    }

    /// Advances the fade and applies the volume. Returns the volume and whether the fade
    /// is done.
    pub fn update(&mut self, dt: Duration) -> Result<(f32, bool)> {
        let percent = self.progress.advance(dt);
        let done = self.progress.is_done();
        let volume = if done {
            self.end
        } else {
            self.start + percent as f32 * (self.end - self.start)
        };

        if !self.channel.is_valid() {
            return Ok((volume, done));
        }
        self.channel.set_volume(volume)?;

        if done && self.end <= 0.0 && !self.stopped {
            self.stopped = true;
            debug!(index = self.channel.index(), "Volume fade finished, stopping channel.");
            self.channel.stop()?;
        }
        Ok((volume, done))
    }
}

/// Fades a module controller.
#[derive(Debug)]
pub struct ControllerFade {
    start: i32,
    end: i32,
    progress: Progress,
    module: Module,
    controller: i32,
}

impl ControllerFade {
    /// Creates a fade between two values of the numbered controller. A negative start or
    /// end stands for the controller's current value.
    pub fn new(
        start: i32,
        end: i32,
        duration: Duration,
        module: Module,
        controller: i32,
    ) -> Result<ControllerFade> {
        let start = if start < 0 {
            module.controller_value(controller)?
        } else {
            start
        };
        let end = if end < 0 {
            module.controller_value(controller)?
        } else {
            end
        };
        Ok(ControllerFade {
            start,
            end,
            progress: Progress::new(duration),
            module,
            controller,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn restart(&mut self) {
        self.progress.restart();
    }

    /// Advances the fade and applies the value. Returns the value and whether the fade
    /// is done.
    pub fn update(&mut self, dt: Duration) -> Result<(i32, bool)> {
        let percent = self.progress.advance(dt);
        let done = self.progress.is_done();
        let value = if done {
            self.end
        } else {
            (f64::from(self.start) + percent * f64::from(self.end - self.start)) as i32
        };

        if self.module.is_valid() {
            self.module.set_controller_value(self.controller, value)?;
        }
        Ok((value, done))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::{
        error::Error,
        native::mock::{self, Project},
        testutil::loaded_channel,
    };

    fn project() -> Project {
        Project::new("fades").with_module(
            mock::Module::generator("Analog generator").with_controller("Volume", 0, 256, 80),
        )
    }

    #[test]
    fn test_volume_fade_out_stops_once() {
        let (_engine, mock, channel) = loaded_channel(&project());
        channel.play_from_beginning().unwrap();
        let mut fade = VolumeFade::new(1.0, 0.0, Duration::from_secs(1), channel.clone()).unwrap();

        let mut previous = f32::MAX;
        for step in 1..=10 {
            let (volume, done) = fade.update(Duration::from_millis(100)).unwrap();
            assert!(volume < previous);
            assert_eq!(done, step == 10, "step {step}");
            previous = volume;
        }
        assert_eq!(previous, 0.0);
        assert_eq!(channel.volume().unwrap(), 0.0);
        assert!(!channel.is_playing());

        let calls = mock.pause_resume_calls(channel.index());
        assert_eq!(fade.update(Duration::from_millis(100)).unwrap(), (0.0, true));
        assert_eq!(mock.pause_resume_calls(channel.index()), calls);
    }

    #[test]
    fn test_fades_never_finish_early() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        for (duration_ms, step_ms) in [(1000, 100), (300, 100), (250, 33), (1000, 7), (50, 60)] {
            let duration = Duration::from_millis(duration_ms);
            let step = Duration::from_millis(step_ms);
            let mut fade = VolumeFade::new(0.2, 0.9, duration, channel.clone()).unwrap();

            let mut elapsed = Duration::ZERO;
            loop {
                elapsed += step;
                let (volume, done) = fade.update(step).unwrap();
                assert_eq!(done, elapsed >= duration, "{duration_ms}ms in {step_ms}ms steps");
                if done {
                    assert_eq!(volume, 0.9);
                    break;
                }
                assert!((0.2..0.9).contains(&volume));
            }
        }
    }

    #[test]
    fn test_zero_duration() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let mut fade = VolumeFade::new(0.0, 0.5, Duration::ZERO, channel.clone()).unwrap();
        assert_eq!(fade.update(Duration::ZERO).unwrap(), (0.5, true));
        assert_eq!(channel.volume().unwrap(), 0.5);
    }

    #[test]
    fn test_negative_volume_means_current() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        channel.set_volume(0.5).unwrap();
        let mut fade = VolumeFade::new(-1.0, 1.0, Duration::from_secs(2), channel.clone()).unwrap();
        let (volume, done) = fade.update(Duration::from_secs(1)).unwrap();
        assert!(!done);
        assert!((volume - 0.75).abs() < 1e-6);

        let mut fade = VolumeFade::new(0.0, -1.0, Duration::from_secs(1), channel.clone()).unwrap();
        fade.update(Duration::from_secs(5)).unwrap();
        let (volume, done) = fade.update(Duration::from_secs(5)).unwrap();
        assert!(done);
        // The end was captured when the fade was created.
        assert!((volume - 0.75).abs() < 1.0 / 256.0);
    }

    #[test]
    fn test_restart() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        channel.play().unwrap();
        let mut fade = VolumeFade::new(1.0, 0.0, Duration::from_millis(10), channel.clone()).unwrap();
        assert!(fade.update(Duration::from_millis(10)).unwrap().1);
        assert!(!channel.is_playing());

        channel.play().unwrap();
        fade.restart();
        let (volume, done) = fade.update(Duration::from_millis(5)).unwrap();
        assert!(!done);
        assert!((volume - 0.5).abs() < 1e-6);
        assert!(fade.update(Duration::from_millis(5)).unwrap().1);
        assert!(!channel.is_playing());
    }

    #[test]
    fn test_fade_on_closed_channel() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let mut fade = VolumeFade::new(1.0, 0.0, Duration::from_secs(1), channel.clone()).unwrap();
        channel.close().unwrap();
        assert_eq!(fade.update(Duration::from_secs(1)).unwrap(), (0.0, true));
        assert!(matches!(
            VolumeFade::new(-1.0, 0.0, Duration::from_secs(1), channel.clone()),
            Err(Error::ChannelClosed(_))
        ));
    }

    #[test]
    fn test_controller_fade() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let module = channel.module_by_name("Analog generator").unwrap();
        let mut fade =
            ControllerFade::new(-1, 200, Duration::from_millis(400), module.clone(), 1).unwrap();

        let mut values = Vec::new();
        loop {
            let (value, done) = fade.update(Duration::from_millis(100)).unwrap();
            assert_eq!(module.controller_value(1).unwrap(), value);
            values.push(value);
            if done {
                break;
            }
        }
        assert_eq!(values, vec![110, 140, 170, 200]);

        fade.restart();
        assert_eq!(fade.update(Duration::ZERO).unwrap(), (80, false));
    }

    #[test]
    fn test_controller_fade_rejects_controller_zero() {
        let (_engine, _mock, channel) = loaded_channel(&project());
        let module = channel.module_by_index(1).unwrap();
        assert!(matches!(
            ControllerFade::new(-1, 10, Duration::from_secs(1), module.clone(), 0),
            Err(Error::InvalidController(0))
        ));
        let mut fade = ControllerFade::new(0, 10, Duration::from_secs(1), module, 0).unwrap();
        assert!(matches!(
            fade.update(Duration::from_secs(1)),
            Err(Error::InvalidController(0))
        ));
    }
}
