use crate::{
    controls::{Action, Playback, DEBUG_AUTO_FRAMES},
    dataset::Frame,
    loader::ScanLoader,
};
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// The current scan and the rules that move it: manual steps, the
/// auto-advance timer and debug bursts.
#[derive(Debug)]
pub struct Player {
    loader: ScanLoader,
    frame: Option<Frame>,
    /// Load time of a frame that has not been drawn yet.
    pending_load: Option<Duration>,
    playback: Playback,
    burst_remaining: usize,
}

impl Player {
    /// Loads the first frame, if there is one.
    pub fn new(loader: ScanLoader, interval: Duration) -> Result<Self> {
        let mut player = Self {
            loader,
            frame: None,
            pending_load: None,
            playback: Playback::new(interval),
            burst_remaining: 0,
        };
        player.advance(Direction::Forward)?;
        Ok(player)
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Load time of the current frame, returned once per loaded frame.
    pub fn take_pending_load(&mut self) -> Option<Duration> {
        self.pending_load.take()
    }

    pub fn position(&self) -> Option<usize> {
        self.loader.position()
    }

    pub fn scan_count(&self) -> usize {
        self.loader.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_running()
    }

    #[cfg(test)]
    pub fn is_bursting(&self) -> bool {
        self.burst_remaining > 0
    }

    /// Applies the action of one rendered frame and moves at most one scan
    /// on behalf of a running burst or the auto-advance timer.
    pub fn update(&mut self, action: Action, now: Instant) -> Result<()> {
        let playing = self.playback.is_running();

        match action {
            Action::Next if !playing => {
                if !self.advance(Direction::Forward)? {
                    info!("already at the last scan");
                }
            }
            Action::Back if !playing => {
                if !self.advance(Direction::Backward)? {
                    info!("already at the first scan");
                }
            }
            Action::TogglePlay => {
                self.playback.toggle(now);
                debug!(playing = self.playback.is_running(), "toggled playback");
            }
            Action::Burst => {
                info!("advancing {DEBUG_AUTO_FRAMES} scans");
                self.burst_remaining = DEBUG_AUTO_FRAMES;
            }
            Action::Restart => {
                self.playback.stop();
                self.burst_remaining = 0;
                self.loader.restart();
                self.advance(Direction::Forward)?;
            }
            Action::Next | Action::Back | Action::Quit | Action::CycleView | Action::No => {}
        }

        // one scan per rendered frame
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            if !self.advance(Direction::Forward)? {
                self.burst_remaining = 0;
                info!("end of sequence");
            }
        } else if self.playback.due(now) && !self.advance(Direction::Forward)? {
            self.playback.stop();
            info!("end of sequence");
        }

        Ok(())
    }

    /// Returns false when there is no scan in that direction.
    fn advance(&mut self, direction: Direction) -> Result<bool> {
        let start = Instant::now();
        let frame = match direction {
            Direction::Forward => self.loader.next_frame(),
            Direction::Backward => self.loader.prev_frame(),
        };
        let Some(frame) = frame else {
            return Ok(false);
        };
        let frame = frame?;
        debug!(
            scan = %frame.name,
            points = frame.len(),
            remissions = frame.remissions.len(),
            "loaded scan"
        );

        self.pending_load = Some(start.elapsed());
        self.frame = Some(frame);
        Ok(true)
    }
}
