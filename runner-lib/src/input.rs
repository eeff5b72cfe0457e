//! Gamepad polling and the button-to-key mapping.

use gilrs::{Axis, Button, Gilrs};
use palmboy_core::{
    KEY_A, KEY_B, KEY_DOWN, KEY_L, KEY_LEFT, KEY_R, KEY_RIGHT, KEY_SELECT, KEY_START, KEY_UP, Keys,
};

/// Analog stick magnitude below which deflection is ignored.
pub const STICK_DEADZONE: f32 = 0.35;

/// One poll's worth of pad state, sampled once per render pass.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PadState {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
    pub l: bool,
    pub r: bool,
    /// Left stick deflection, positive right.
    pub stick_x: f32,
    /// Left stick deflection, positive up.
    pub stick_y: f32,
    /// The dedicated quit chord (the mode/guide button).
    pub quit: bool,
}

/// Drain pending gamepad events and sample the first connected pad.
///
/// With no pad connected every field reads released, so the frontend keeps
/// running and simply feeds an empty key mask.
pub fn read_pad(gilrs: &mut Gilrs) -> PadState {
    while gilrs.next_event().is_some() {}

    let mut pad = PadState::default();
    if let Some((_, gamepad)) = gilrs.gamepads().next() {
        pad.a = gamepad.is_pressed(Button::South);
        pad.b = gamepad.is_pressed(Button::East);
        pad.select = gamepad.is_pressed(Button::Select);
        pad.start = gamepad.is_pressed(Button::Start);
        pad.dpad_up = gamepad.is_pressed(Button::DPadUp);
        pad.dpad_down = gamepad.is_pressed(Button::DPadDown);
        pad.dpad_left = gamepad.is_pressed(Button::DPadLeft);
        pad.dpad_right = gamepad.is_pressed(Button::DPadRight);
        pad.l = gamepad.is_pressed(Button::LeftTrigger);
        pad.r = gamepad.is_pressed(Button::RightTrigger);
        pad.stick_x = gamepad.value(Axis::LeftStickX);
        pad.stick_y = gamepad.value(Axis::LeftStickY);
        pad.quit = gamepad.is_pressed(Button::Mode);
    }
    pad
}

/// Fold one pad sample into the engine's key mask. The stick maps onto the
/// directional bits past the deadzone, ORed with the d-pad.
#[must_use]
pub fn key_mask(pad: &PadState) -> Keys {
    let mut keys = Keys::empty();
    keys.set(KEY_A, pad.a);
    keys.set(KEY_B, pad.b);
    keys.set(KEY_SELECT, pad.select);
    keys.set(KEY_START, pad.start);
    keys.set(KEY_RIGHT, pad.dpad_right || pad.stick_x > STICK_DEADZONE);
    keys.set(KEY_LEFT, pad.dpad_left || pad.stick_x < -STICK_DEADZONE);
    keys.set(KEY_UP, pad.dpad_up || pad.stick_y > STICK_DEADZONE);
    keys.set(KEY_DOWN, pad.dpad_down || pad.stick_y < -STICK_DEADZONE);
    keys.set(KEY_R, pad.r);
    keys.set(KEY_L, pad.l);
    keys
}
