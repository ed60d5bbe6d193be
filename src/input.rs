//! KEYINPUT/KEYCNT and the keypad IRQ condition, grounded on the
//! teacher's `JoyPad`/`DPad`/`ActionButtons` bit-field split generalized
//! to GBA's single active-low 10-bit register, with KEYCNT's AND/OR
//! logic supplemented from the original's `Core::keyEvent`.

use bincode::{Decode, Encode};

use crate::interrupt::{InterruptController, IrqSource};
use crate::macros::bit_fields;

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct KeyInput<u16> {
        pub(crate) a: 1,
        pub(crate) b: 1,
        pub(crate) select: 1,
        pub(crate) start: 1,
        pub(crate) right: 1,
        pub(crate) left: 1,
        pub(crate) up: 1,
        pub(crate) down: 1,
        pub(crate) r: 1,
        pub(crate) l: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct KeyCnt<u16> {
        pub(crate) mask: 10,
        _0: 4,
        pub(crate) enable: 1,
        /// 0 = IRQ if any masked key pressed, 1 = IRQ if all masked keys pressed.
        pub(crate) logic_and: 1,
    }
}

/// External collaborator polled once per frame for the physical key
/// state; bits follow [`KeyInput`]'s layout, active-high here (the core
/// inverts them before storing into the active-low register).
pub trait InputSource {
    fn poll(&mut self) -> u16;
}

#[derive(Default, Clone, Encode, Decode)]
pub(crate) struct Input {
    #[bincode(with_serde)]
    keyinput: KeyInput,
    #[bincode(with_serde)]
    keycnt: KeyCnt,
}

impl Input {
    pub(crate) fn new() -> Self {
        let mut r = Self::default();
        r.keyinput.write(0x03FF); // all keys up (active-low).
        r
    }

    pub(crate) fn read_keyinput(&self) -> u16 {
        self.keyinput.read()
    }

    pub(crate) fn read_keycnt(&self) -> u16 {
        self.keycnt.read()
    }

    pub(crate) fn write_keycnt(&mut self, v: u16) {
        self.keycnt.write(v);
    }

    /// Applies freshly polled active-high key state and, if the keypad
    /// IRQ condition now holds, raises it.
    pub(crate) fn update(&mut self, active_high: u16, interrupt: &mut InterruptController) {
        self.keyinput.write((!active_high) & 0x03FF);

        if self.keycnt.enable == 0 {
            return;
        }
        let pressed = !self.keyinput.read() & self.keycnt.mask;
        let condition = if self.keycnt.logic_and == 1 {
            pressed == self.keycnt.mask
        } else {
            pressed != 0
        };
        if condition {
            interrupt.raise(IrqSource::Keypad);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_logic_fires_on_any_masked_key() {
        let mut input = Input::new();
        let mut ic = InterruptController::new();
        ic.set_ie(1 << crate::info::IRQ_KEYPAD);
        ic.set_ime(true);
        input.write_keycnt((1 << 14) | 0b1); // enable, AND=0, mask=bit0 (A)
        input.update(0b1, &mut ic);
        assert!(ic.pending_unmasked());
    }

    #[test]
    fn and_logic_requires_every_masked_key() {
        let mut input = Input::new();
        let mut ic = InterruptController::new();
        ic.set_ie(1 << crate::info::IRQ_KEYPAD);
        ic.set_ime(true);
        input.write_keycnt((1 << 14) | (1 << 15) | 0b11); // enable, AND=1, mask=A|B
        input.update(0b01, &mut ic);
        assert!(!ic.pending_unmasked());
        input.update(0b11, &mut ic);
        assert!(ic.pending_unmasked());
    }
}
