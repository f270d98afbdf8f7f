// Input state - keyboard and mouse, fed from window events
//
// Held state persists across frames; "pressed this frame", cursor motion and
// scroll are edges cleared by `end_frame`.

use std::collections::HashSet;
use winit::event::{ElementState, MouseButton, MouseScrollDelta};
use winit::keyboard::KeyCode;

#[derive(Debug, Default)]
pub struct InputState {
    held_keys: HashSet<KeyCode>,
    pressed_keys: HashSet<KeyCode>,
    held_buttons: HashSet<MouseButton>,
    cursor: Option<(f64, f64)>,
    cursor_delta: (f64, f64),
    scroll: f32,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_event(&mut self, key: KeyCode, state: ElementState, repeat: bool) {
        match state {
            ElementState::Pressed => {
                if !repeat && self.held_keys.insert(key) {
                    self.pressed_keys.insert(key);
                }
            }
            ElementState::Released => {
                self.held_keys.remove(&key);
            }
        }
    }

    pub fn mouse_button(&mut self, button: MouseButton, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.held_buttons.insert(button);
            }
            ElementState::Released => {
                self.held_buttons.remove(&button);
            }
        }
    }

    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        if let Some((last_x, last_y)) = self.cursor {
            self.cursor_delta.0 += x - last_x;
            self.cursor_delta.1 += y - last_y;
        }
        self.cursor = Some((x, y));
    }

    /// Cursor left the window; the next position starts a fresh track.
    pub fn cursor_left(&mut self) {
        self.cursor = None;
    }

    pub fn scrolled(&mut self, delta: MouseScrollDelta) {
        self.scroll += match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            MouseScrollDelta::PixelDelta(pos) => (pos.y / 40.0) as f32,
        };
    }

    /// Focus lost: nothing is held anymore.
    pub fn clear(&mut self) {
        self.held_keys.clear();
        self.held_buttons.clear();
        self.end_frame();
    }

    pub fn end_frame(&mut self) {
        self.pressed_keys.clear();
        self.cursor_delta = (0.0, 0.0);
        self.scroll = 0.0;
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }

    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_button_held(&self, button: MouseButton) -> bool {
        self.held_buttons.contains(&button)
    }

    pub fn cursor_delta(&self) -> (f64, f64) {
        self.cursor_delta
    }

    pub fn scroll(&self) -> f32 {
        self.scroll
    }

    /// -1, 0 or 1 depending on which of the two keys is held
    pub fn axis(&self, negative: KeyCode, positive: KeyCode) -> f32 {
        let mut value = 0.0;
        if self.is_held(negative) {
            value -= 1.0;
        }
        if self.is_held(positive) {
            value += 1.0;
        }
        value
    }
}

/// Parse a key name from the config file ("Escape", "F11", "W", "Space").
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name.trim().to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "shift" | "lshift" => KeyCode::ShiftLeft,
        "ctrl" | "lctrl" | "control" => KeyCode::ControlLeft,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        other => return parse_letter(other),
    };
    Some(key)
}

fn parse_letter(name: &str) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA,
        KeyCode::KeyB,
        KeyCode::KeyC,
        KeyCode::KeyD,
        KeyCode::KeyE,
        KeyCode::KeyF,
        KeyCode::KeyG,
        KeyCode::KeyH,
        KeyCode::KeyI,
        KeyCode::KeyJ,
        KeyCode::KeyK,
        KeyCode::KeyL,
        KeyCode::KeyM,
        KeyCode::KeyN,
        KeyCode::KeyO,
        KeyCode::KeyP,
        KeyCode::KeyQ,
        KeyCode::KeyR,
        KeyCode::KeyS,
        KeyCode::KeyT,
        KeyCode::KeyU,
        KeyCode::KeyV,
        KeyCode::KeyW,
        KeyCode::KeyX,
        KeyCode::KeyY,
        KeyCode::KeyZ,
    ];

    match name.as_bytes() {
        [c @ b'a'..=b'z'] => Some(LETTERS[(c - b'a') as usize]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;

    #[test]
    fn press_is_an_edge_hold_is_a_level() {
        let mut input = InputState::new();
        input.key_event(KeyCode::KeyW, ElementState::Pressed, false);
        assert!(input.was_pressed(KeyCode::KeyW));
        assert!(input.is_held(KeyCode::KeyW));

        input.end_frame();
        input.key_event(KeyCode::KeyW, ElementState::Pressed, true);
        assert!(!input.was_pressed(KeyCode::KeyW));
        assert!(input.is_held(KeyCode::KeyW));

        input.key_event(KeyCode::KeyW, ElementState::Released, false);
        assert!(!input.is_held(KeyCode::KeyW));
    }

    #[test]
    fn cursor_delta_accumulates_until_end_of_frame() {
        let mut input = InputState::new();
        input.cursor_moved(10.0, 10.0);
        assert_eq!(input.cursor_delta(), (0.0, 0.0));

        input.cursor_moved(15.0, 8.0);
        input.cursor_moved(20.0, 4.0);
        assert_eq!(input.cursor_delta(), (10.0, -6.0));

        input.end_frame();
        assert_eq!(input.cursor_delta(), (0.0, 0.0));

        input.cursor_left();
        input.cursor_moved(500.0, 500.0);
        assert_eq!(input.cursor_delta(), (0.0, 0.0));
    }

    #[test]
    fn scroll_lines_and_pixels() {
        let mut input = InputState::new();
        input.scrolled(MouseScrollDelta::LineDelta(0.0, 2.0));
        input.scrolled(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, -40.0)));
        assert_eq!(input.scroll(), 1.0);
    }

    #[test]
    fn axis_cancels_opposites() {
        let mut input = InputState::new();
        input.key_event(KeyCode::KeyA, ElementState::Pressed, false);
        assert_eq!(input.axis(KeyCode::KeyA, KeyCode::KeyD), -1.0);
        input.key_event(KeyCode::KeyD, ElementState::Pressed, false);
        assert_eq!(input.axis(KeyCode::KeyA, KeyCode::KeyD), 0.0);
    }

    #[test]
    fn clear_releases_everything() {
        let mut input = InputState::new();
        input.key_event(KeyCode::Space, ElementState::Pressed, false);
        input.mouse_button(MouseButton::Right, ElementState::Pressed);
        input.clear();
        assert!(!input.is_held(KeyCode::Space));
        assert!(!input.is_button_held(MouseButton::Right));
    }

    #[test]
    fn key_names() {
        assert_eq!(parse_key("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key(" f11 "), Some(KeyCode::F11));
        assert_eq!(parse_key("W"), Some(KeyCode::KeyW));
        assert_eq!(parse_key("Space"), Some(KeyCode::Space));
        assert_eq!(parse_key("Hyper"), None);
        assert_eq!(parse_key("ab"), None);
    }
}
