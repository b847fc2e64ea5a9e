use std::fmt;
use tunehub_sync::IdleState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Radio,
    SelectDevice,
    ScreenSaver,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Radio => "radio",
            Screen::SelectDevice => "select-device",
            Screen::ScreenSaver => "screen-saver",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idle wins over everything; without an active device the kiosk asks for one.
pub fn resolve_screen(idle: IdleState, needs_device: bool) -> Screen {
    match (idle, needs_device) {
        (IdleState::Idle, _) => Screen::ScreenSaver,
        (IdleState::Active, true) => Screen::SelectDevice,
        (IdleState::Active, false) => Screen::Radio,
    }
}

pub struct ScreenRouter {
    current: Screen,
}

impl ScreenRouter {
    pub fn new(initial: Screen) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> Screen {
        self.current
    }

    /// Moves to the screen for the given inputs. Returns the new screen only
    /// when it differs from the current one.
    pub fn next(&mut self, idle: IdleState, needs_device: bool) -> Option<Screen> {
        let wanted = resolve_screen(idle, needs_device);
        if wanted == self.current {
            return None;
        }
        self.current = wanted;
        Some(wanted)
    }
}
