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
use std::{collections::BTreeSet, sync::Arc, thread, time::Duration};

use crossbeam_channel::{bounded, RecvTimeoutError, TryRecvError};
use tracing::debug;

use super::Channel;
use crate::{error::Result, pattern::Pattern};

/// The poll resolution used when none is given.
pub const DEFAULT_POLL_RESOLUTION: Duration = Duration::from_millis(10);

const LINE_CHANGE: &str = "line-change";
const PATTERN_TOUCH: &str = "pattern-touch";

/// Receives the new current line. Returning false stops polling.
pub type LineChangeCallback = Box<dyn FnMut(i32) -> bool + Send>;

/// Receives a pattern the playhead just entered (true) or left (false). Returning false
/// stops polling.
pub type PatternTouchCallback = Box<dyn FnMut(&Pattern, bool) -> bool + Send>;

impl Channel {
    /// Polls the current line on a background thread and reports every change. The engine
    /// runs ahead of the reported line by its output latency.
    ///
    /// A zero resolution polls every 10ms. Setting a new callback replaces the running
    /// one; `None` just stops it. Closing the channel stops it as well.
    pub fn set_on_current_line_change(
        self: &Arc<Self>,
        resolution: Duration,
        callback: Option<LineChangeCallback>,
    ) -> Result<()> {
        let Some(mut callback) = callback else {
            self.cancel_poller(LINE_CHANGE);
            return Ok(());
        };

        let mut last_line = None;
        self.spawn_poller(LINE_CHANGE, resolution, move |channel| {
            let Ok(line) = channel.current_line() else {
                return false;
            };
            if last_line == Some(line) {
                return true;
            }
            last_line = Some(line);
            callback(line)
        })
    }

    /// Polls which patterns the playhead is inside of on a background thread and reports
    /// patterns as they are entered and left.
    ///
    /// A zero resolution polls every 10ms. Setting a new callback replaces the running
    /// one; `None` just stops it. Closing the channel stops it as well.
    pub fn set_on_pattern_touch(
        self: &Arc<Self>,
        resolution: Duration,
        callback: Option<PatternTouchCallback>,
    ) -> Result<()> {
        let Some(mut callback) = callback else {
            self.cancel_poller(PATTERN_TOUCH);
            return Ok(());
        };

        let mut touching = BTreeSet::new();
        self.spawn_poller(PATTERN_TOUCH, resolution, move |channel| {
            let (Ok(line), Ok(patterns)) = (channel.current_line(), channel.patterns()) else {
                return false;
            };

            let mut now = BTreeSet::new();
            for pattern in patterns {
                let (Ok(x), Ok(lines)) = (pattern.x(), pattern.line_count()) else {
                    continue;
                };
                if line < x || line >= x + lines as i32 {
                    continue;
                }
                now.insert(pattern.index());
                if !touching.contains(&pattern.index()) && !callback(&pattern, true) {
                    return false;
                }
            }
            for index in touching.difference(&now) {
                if !callback(&Pattern::new(Arc::clone(channel), *index), false) {
                    return false;
                }
            }
            touching = now;
            true
        })
    }

    /// Runs the tick on a new thread every resolution until it returns false, the poller
    /// is cancelled or the channel is gone. Replaces the poller of the same name.
    fn spawn_poller<F>(self: &Arc<Self>, name: &'static str, resolution: Duration, mut tick: F) -> Result<()>
    where
        F: FnMut(&Arc<Channel>) -> bool + Send + 'static,
    {
        self.slot()?;
        let resolution = if resolution.is_zero() {
            DEFAULT_POLL_RESOLUTION
        } else {
            resolution
        };

        let mut pollers = self.pollers.lock();
        if let Some(cancel) = pollers.remove(name) {
            let _ = cancel.try_send(());
        }

        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let channel = Arc::downgrade(self);
        let index = self.index;
        thread::Builder::new()
            .name(format!("sunvox-{name}-{index}"))
            .spawn(move || {
                loop {
                    if !matches!(cancel_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                    let Some(channel) = channel.upgrade() else {
                        break;
                    };
                    if !tick(&channel) {
                        break;
                    }
                    drop(channel);

                    match cancel_rx.recv_timeout(resolution) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                debug!(index, poller = name, "Poller exited.");
            })?;
        pollers.insert(name, cancel_tx);

        debug!(index, poller = name, ?resolution, "Started poller.");
        Ok(())
    }

    fn cancel_poller(&self, name: &'static str) {
        if let Some(cancel) = self.pollers.lock().remove(name) {
            // The poller may have exited already.
            let _ = cancel.try_send(());
        }
    }

    pub(super) fn cancel_all_pollers(&self) {
        for (_, cancel) in self.pollers.lock().drain() {
            let _ = cancel.try_send(());
        }
    }
}
