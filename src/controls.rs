use kiss3d::event::Key;
use std::time::{Duration, Instant};

/// Frames advanced by one debug burst.
pub const DEBUG_AUTO_FRAMES: usize = 100;

/// The last key press, consumed once per rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    #[default]
    No,
    Next,
    Back,
    Quit,
    TogglePlay,
    Burst,
    Restart,
    CycleView,
}

impl Action {
    pub fn from_key(key: Key, debug_auto: bool) -> Self {
        match key {
            Key::N => Action::Next,
            Key::B => Action::Back,
            Key::Q | Key::Escape => Action::Quit,
            Key::Space => Action::TogglePlay,
            Key::D if debug_auto => Action::Burst,
            Key::R => Action::Restart,
            Key::V => Action::CycleView,
            _ => Action::No,
        }
    }

    /// Keeps the first action of a frame, later presses are dropped.
    pub fn merge(self, later: Action) -> Action {
        match self {
            Action::No => later,
            _ => self,
        }
    }
}

pub const HELP: &str = "To navigate:
\tb: back (previous scan)
\tn: next (next scan)
\tspace: start/stop auto advance
\tv: cycle views
\tr: restart
\tq: quit (exit program)";

/// Extra key listed when debug bursts are enabled.
pub const DEBUG_HELP: &str = "\td: advance 100 scans, one per frame";

/// Periodic auto-advance timer.
#[derive(Debug, Clone)]
pub struct Playback {
    interval: Duration,
    running_since: Option<Instant>,
}

impl Playback {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running_since: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn start(&mut self, now: Instant) {
        self.running_since = Some(now);
    }

    pub fn stop(&mut self) {
        self.running_since = None;
    }

    pub fn toggle(&mut self, now: Instant) {
        if self.is_running() {
            self.stop();
        } else {
            self.start(now);
        }
    }

    /// True once for every elapsed interval while running.
    pub fn due(&mut self, now: Instant) -> bool {
        let Some(last) = self.running_since else {
            return false;
        };
        if now.duration_since(last) < self.interval {
            return false;
        }
        self.running_since = Some(now);
        true
    }
}

/// Which clouds are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewMode {
    /// Raw and semantic clouds next to each other.
    Split,
    Raw,
    Semantic,
    Instance,
}

impl ViewMode {
    pub fn initial(semantics: bool) -> Self {
        if semantics {
            ViewMode::Split
        } else {
            ViewMode::Raw
        }
    }

    pub fn cycle(self, semantics: bool, instances: bool) -> Self {
        use ViewMode::*;

        if !semantics {
            return Raw;
        }
        match self {
            Split => Raw,
            Raw => Semantic,
            Semantic if instances => Instance,
            Semantic | Instance => Split,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewMode::Split => "raw | semantic",
            ViewMode::Raw => "raw",
            ViewMode::Semantic => "semantic",
            ViewMode::Instance => "instance",
        }
    }
}
