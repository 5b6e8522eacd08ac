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
use std::sync::Arc;

use tracing::{info, warn};

use super::Channel;
use crate::{error::Result, pattern::Pattern};

/// How far patterns outside of a custom loop are moved to the left.
pub const CUSTOM_LOOP_OFFSET: i32 = 99_999_999;

/// Patterns starting left of this line are assumed to have been moved out by a custom loop.
pub const MOVED_OUT_THRESHOLD: i32 = -100_000;

/// An active custom loop. `start` is the original line now at line 0, `end` the loop end
/// relative to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CustomLoop {
    requested: (i32, i32),
    pub(crate) start: i32,
    pub(crate) end: i32,
}

impl Channel {
    pub(crate) fn custom_loop(&self) -> Option<CustomLoop> {
        self.state.lock().custom_loop
    }

    pub fn has_custom_loop(&self) -> bool {
        self.custom_loop().is_some()
    }

    /// The original line of the pattern that starts the custom loop, or 0 without one.
    pub fn custom_loop_start(&self) -> i32 {
        self.custom_loop().map_or(0, |custom| custom.start)
    }

    /// The end of the custom loop relative to its start, or 0 without one.
    pub fn custom_loop_end(&self) -> i32 {
        self.custom_loop().map_or(0, |custom| custom.end)
    }

    /// Loops the patterns lying entirely between the two lines. Every other pattern is
    /// moved far to the left and the looped patterns are shifted so the earliest starts
    /// at line 0, so regular looping playback only covers the range.
    ///
    /// The engine finds the bounds of the project when playback starts, so restart
    /// playback from line 0 afterwards. If moving a pattern fails, the patterns already
    /// moved are put back and no loop is set.
    pub fn set_custom_loop(self: &Arc<Self>, start: i32, end: i32) -> Result<()> {
        if self
            .custom_loop()
            .is_some_and(|custom| custom.requested == (start, end))
        {
            return Ok(());
        }
        self.reset_custom_loop()?;

        let _enter = self.span.enter();
        let _paused = self.paused();

        let mut moves = Moves::default();
        let (least, kept) = match self.loop_patterns(start, end, &mut moves) {
            Ok(result) => result,
            Err(e) => {
                moves.undo();
                return Err(e);
            }
        };

        self.state.lock().custom_loop = Some(CustomLoop {
            requested: (start, end),
            start: least,
            end: end - least,
        });
        info!(start, end, patterns = kept, "Set custom loop.");
        Ok(())
    }

    /// Moves the patterns for a custom loop and returns the shift of the looped patterns
    /// and how many there are.
    fn loop_patterns(
        self: &Arc<Self>,
        start: i32,
        end: i32,
        moves: &mut Moves,
    ) -> Result<(i32, usize)> {
        let mut kept = Vec::new();
        for pattern in self.patterns()? {
            let x = pattern.x()?;
            let lines = pattern.line_count()? as i32;
            if x >= start && x + lines <= end {
                kept.push((pattern, x));
            } else if x > MOVED_OUT_THRESHOLD {
                moves.shift(&pattern, -CUSTOM_LOOP_OFFSET)?;
            }
        }

        let least = kept.iter().map(|(_, x)| *x).min().unwrap_or(start);
        if least != 0 {
            for (pattern, _) in &kept {
                moves.shift(pattern, -least)?;
            }
        }
        Ok((least, kept.len()))
    }

    /// Moves every pattern back to where it was before the custom loop was set. If moving
    /// a pattern fails, the loop stays in place and the reset can be retried.
    pub fn reset_custom_loop(self: &Arc<Self>) -> Result<()> {
        let Some(custom) = self.custom_loop() else {
            return Ok(());
        };

        let _enter = self.span.enter();
        let _paused = self.paused();

        let mut moves = Moves::default();
        if let Err(e) = self.restore_patterns(custom, &mut moves) {
            moves.undo();
            return Err(e);
        }

        self.state.lock().custom_loop = None;
        info!("Reset custom loop.");
        Ok(())
    }

    fn restore_patterns(self: &Arc<Self>, custom: CustomLoop, moves: &mut Moves) -> Result<()> {
        for pattern in self.patterns()? {
            if pattern.x()? < 0 {
                moves.shift(&pattern, CUSTOM_LOOP_OFFSET)?;
            } else if custom.start != 0 {
                moves.shift(&pattern, custom.start)?;
            }
        }
        Ok(())
    }
}

/// The pattern moves made so far, so a failure part way leaves every pattern in place.
#[derive(Default)]
struct Moves {
    done: Vec<(Pattern, i32)>,
}

impl Moves {
    fn shift(&mut self, pattern: &Pattern, dx: i32) -> Result<()> {
        pattern.shift(dx, 0)?;
        self.done.push((pattern.clone(), dx));
        Ok(())
    }

    /// Moves the patterns back, last move first.
    fn undo(self) {
        for (pattern, dx) in self.done.into_iter().rev() {
            if let Err(e) = pattern.shift(-dx, 0) {
                warn!(pattern = pattern.index(), err = %e, "Unable to move pattern back.");
            }
        }
    }
}
