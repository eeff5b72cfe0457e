//! The 10-bit button mask shared between the frontend and the engine.
//!
//! Bit assignments match the engine's native key register layout, so the
//! mask can be handed over without translation.

/// A button. Bit 0.
pub const KEY_A: u16 = 1 << 0;
/// B button. Bit 1.
pub const KEY_B: u16 = 1 << 1;
/// Select button. Bit 2.
pub const KEY_SELECT: u16 = 1 << 2;
/// Start button. Bit 3.
pub const KEY_START: u16 = 1 << 3;
/// D-pad right. Bit 4.
pub const KEY_RIGHT: u16 = 1 << 4;
/// D-pad left. Bit 5.
pub const KEY_LEFT: u16 = 1 << 5;
/// D-pad up. Bit 6.
pub const KEY_UP: u16 = 1 << 6;
/// D-pad down. Bit 7.
pub const KEY_DOWN: u16 = 1 << 7;
/// Right shoulder button. Bit 8.
pub const KEY_R: u16 = 1 << 8;
/// Left shoulder button. Bit 9.
pub const KEY_L: u16 = 1 << 9;

/// All valid key bits.
pub const KEY_MASK: u16 = 0x03FF;

/// Combined state of every engine button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Keys(u16);

impl Keys {
    /// No buttons pressed.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a mask from raw bits. Bits outside the 10-bit range are dropped.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & KEY_MASK)
    }

    /// Raw 10-bit value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Set or clear a button bit.
    pub fn set(&mut self, key: u16, pressed: bool) {
        if pressed {
            self.0 |= key & KEY_MASK;
        } else {
            self.0 &= !key;
        }
    }

    /// Whether every bit in `key` is pressed.
    #[must_use]
    pub const fn contains(self, key: u16) -> bool {
        self.0 & key == key
    }
}
