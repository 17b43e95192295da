//! Translates `winit` window events into GUI io events.

use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key as WinitKey, NamedKey};

use crate::backend::ImguiBackend;

/// Keys released wholesale on any focus change, so nothing stays stuck
/// pressed across a switch to or from another window.
const RELEASED_ON_FOCUS_CHANGE: [imgui::Key; 25] = [
    imgui::Key::Tab,
    imgui::Key::LeftArrow,
    imgui::Key::RightArrow,
    imgui::Key::UpArrow,
    imgui::Key::DownArrow,
    imgui::Key::PageUp,
    imgui::Key::PageDown,
    imgui::Key::Home,
    imgui::Key::End,
    imgui::Key::Insert,
    imgui::Key::Delete,
    imgui::Key::Backspace,
    imgui::Key::Space,
    imgui::Key::Enter,
    imgui::Key::Escape,
    imgui::Key::A,
    imgui::Key::C,
    imgui::Key::V,
    imgui::Key::X,
    imgui::Key::Y,
    imgui::Key::Z,
    imgui::Key::ModCtrl,
    imgui::Key::ModShift,
    imgui::Key::ModAlt,
    imgui::Key::ModSuper,
];

impl ImguiBackend {
    /// Feeds a window event into the GUI io state.
    ///
    /// Returns whether the UI wants to capture mouse input, so the caller
    /// can decide not to forward the event to the rest of the application.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        let io = self.io_mut();
        match event {
            WindowEvent::KeyboardInput {
                event: key_event, ..
            } => {
                let pressed = key_event.state == ElementState::Pressed;
                if pressed {
                    if let Some(text) = key_event.text.as_ref() {
                        for ch in text.chars() {
                            if !ch.is_control() {
                                io.add_input_character(ch);
                            }
                        }
                    }
                }
                if let Some(key) = map_key(&key_event.logical_key) {
                    io.add_key_event(key, pressed);
                }
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                let state = modifiers.state();
                io.add_key_event(imgui::Key::ModCtrl, state.control_key());
                io.add_key_event(imgui::Key::ModShift, state.shift_key());
                io.add_key_event(imgui::Key::ModAlt, state.alt_key());
                io.add_key_event(imgui::Key::ModSuper, state.super_key());
            }
            WindowEvent::Focused(_) => {
                for key in RELEASED_ON_FOCUS_CHANGE {
                    io.add_key_event(key, false);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let wheel = match delta {
                    // Half a line per wheel notch keeps list scrolling usable.
                    MouseScrollDelta::LineDelta(h, v) => [h * 0.5, v * 0.5],
                    MouseScrollDelta::PixelDelta(pos) => {
                        [pos.x as f32 / 100.0, pos.y as f32 / 100.0]
                    }
                };
                io.add_mouse_wheel_event(wheel);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = *state == ElementState::Pressed;
                match button {
                    winit::event::MouseButton::Left => {
                        io.add_mouse_button_event(imgui::MouseButton::Left, pressed)
                    }
                    winit::event::MouseButton::Right => {
                        io.add_mouse_button_event(imgui::MouseButton::Right, pressed)
                    }
                    winit::event::MouseButton::Middle => {
                        io.add_mouse_button_event(imgui::MouseButton::Middle, pressed)
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        io.want_capture_mouse
    }
}

fn map_key(key: &WinitKey) -> Option<imgui::Key> {
    match key {
        WinitKey::Named(named) => match named {
            NamedKey::Tab => Some(imgui::Key::Tab),
            NamedKey::ArrowLeft => Some(imgui::Key::LeftArrow),
            NamedKey::ArrowRight => Some(imgui::Key::RightArrow),
            NamedKey::ArrowUp => Some(imgui::Key::UpArrow),
            NamedKey::ArrowDown => Some(imgui::Key::DownArrow),
            NamedKey::PageUp => Some(imgui::Key::PageUp),
            NamedKey::PageDown => Some(imgui::Key::PageDown),
            NamedKey::Home => Some(imgui::Key::Home),
            NamedKey::End => Some(imgui::Key::End),
            NamedKey::Insert => Some(imgui::Key::Insert),
            NamedKey::Delete => Some(imgui::Key::Delete),
            NamedKey::Backspace => Some(imgui::Key::Backspace),
            NamedKey::Space => Some(imgui::Key::Space),
            NamedKey::Enter => Some(imgui::Key::Enter),
            NamedKey::Escape => Some(imgui::Key::Escape),
            NamedKey::Control => Some(imgui::Key::ModCtrl),
            NamedKey::Shift => Some(imgui::Key::ModShift),
            NamedKey::Alt => Some(imgui::Key::ModAlt),
            NamedKey::Super => Some(imgui::Key::ModSuper),
            _ => None,
        },
        WinitKey::Character(text) => match text.as_str() {
            "a" | "A" => Some(imgui::Key::A),
            "c" | "C" => Some(imgui::Key::C),
            "v" | "V" => Some(imgui::Key::V),
            "x" | "X" => Some(imgui::Key::X),
            "y" | "Y" => Some(imgui::Key::Y),
            "z" | "Z" => Some(imgui::Key::Z),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::SmolStr;

    #[test]
    fn named_keys_map_to_ui_keys() {
        assert_eq!(
            map_key(&WinitKey::Named(NamedKey::Tab)),
            Some(imgui::Key::Tab)
        );
        assert_eq!(
            map_key(&WinitKey::Named(NamedKey::ArrowDown)),
            Some(imgui::Key::DownArrow)
        );
        assert_eq!(
            map_key(&WinitKey::Named(NamedKey::Control)),
            Some(imgui::Key::ModCtrl)
        );
    }

    #[test]
    fn shortcut_characters_map_case_insensitively() {
        assert_eq!(
            map_key(&WinitKey::Character(SmolStr::new("z"))),
            Some(imgui::Key::Z)
        );
        assert_eq!(
            map_key(&WinitKey::Character(SmolStr::new("Z"))),
            Some(imgui::Key::Z)
        );
    }

    #[test]
    fn focus_change_releases_every_mappable_key() {
        // Whatever a key event can press, a focus switch must release.
        let named = [
            NamedKey::Tab,
            NamedKey::ArrowLeft,
            NamedKey::ArrowRight,
            NamedKey::ArrowUp,
            NamedKey::ArrowDown,
            NamedKey::PageUp,
            NamedKey::PageDown,
            NamedKey::Home,
            NamedKey::End,
            NamedKey::Insert,
            NamedKey::Delete,
            NamedKey::Backspace,
            NamedKey::Space,
            NamedKey::Enter,
            NamedKey::Escape,
            NamedKey::Control,
            NamedKey::Shift,
            NamedKey::Alt,
            NamedKey::Super,
        ];
        for key in named {
            let mapped = map_key(&WinitKey::Named(key)).unwrap();
            assert!(RELEASED_ON_FOCUS_CHANGE.contains(&mapped), "{mapped:?}");
        }
        for ch in ["a", "c", "v", "x", "y", "z"] {
            let mapped = map_key(&WinitKey::Character(SmolStr::new(ch))).unwrap();
            assert!(RELEASED_ON_FOCUS_CHANGE.contains(&mapped), "{mapped:?}");
        }
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        assert_eq!(map_key(&WinitKey::Named(NamedKey::F1)), None);
        assert_eq!(map_key(&WinitKey::Character(SmolStr::new("q"))), None);
    }
}
