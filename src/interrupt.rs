//! Interrupt controller: `IME`/`IE`/`IF` plus the 4-cycle accept delay.

use bincode::{Decode, Encode};

use crate::info::{IRQ_ACCEPT_DELAY, IRQ_MASK};

/// One of the 14 wired interrupt sources, named the way callers raise them
/// rather than by register bit number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    VBlank,
    HBlank,
    VCount,
    Timer(u8),
    Serial,
    Dma(u8),
    Keypad,
    GamePak,
}

impl IrqSource {
    fn bit(self) -> u16 {
        use crate::info::*;
        match self {
            IrqSource::VBlank => IRQ_VBLANK,
            IrqSource::HBlank => IRQ_HBLANK,
            IrqSource::VCount => IRQ_VCOUNT,
            IrqSource::Timer(0) => IRQ_TIMER0,
            IrqSource::Timer(1) => IRQ_TIMER1,
            IrqSource::Timer(2) => IRQ_TIMER2,
            IrqSource::Timer(3) => IRQ_TIMER3,
            IrqSource::Timer(n) => unreachable!("no timer channel {n}"),
            IrqSource::Serial => IRQ_SERIAL,
            IrqSource::Dma(0) => IRQ_DMA0,
            IrqSource::Dma(1) => IRQ_DMA1,
            IrqSource::Dma(2) => IRQ_DMA2,
            IrqSource::Dma(3) => IRQ_DMA3,
            IrqSource::Dma(n) => unreachable!("no DMA channel {n}"),
            IrqSource::Keypad => IRQ_KEYPAD,
            IrqSource::GamePak => IRQ_GAMEPAK,
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InterruptController {
    ime: bool,
    ie: u16,
    iflag: u16,
    /// Cycles remaining before a pending `IE & IF` condition is actually
    /// dispatched to the CPU, or `None` when no delay is in progress.
    delay_remaining: Option<u32>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ime(&self) -> bool {
        self.ime
    }

    pub fn set_ime(&mut self, v: bool) {
        self.ime = v;
        self.update_delay();
    }

    pub fn ie(&self) -> u16 {
        self.ie
    }

    pub fn set_ie(&mut self, v: u16) {
        self.ie = v & IRQ_MASK;
        self.update_delay();
    }

    pub fn iflag(&self) -> u16 {
        self.iflag
    }

    /// Write-one-to-clear: only bits set in `v` are cleared from `IF`.
    pub fn ack(&mut self, v: u16) {
        self.iflag &= !(v & IRQ_MASK);
        self.update_delay();
    }

    pub fn raise(&mut self, source: IrqSource) {
        self.iflag |= 1 << source.bit();
        self.update_delay();
    }

    /// True whenever `IE & IF != 0`, independent of `IME` — this is the
    /// condition that wakes a halted CPU.
    pub fn pending_unmasked(&self) -> bool {
        (self.ie & self.iflag) != 0
    }

    fn condition(&self) -> bool {
        self.ime && self.pending_unmasked()
    }

    fn update_delay(&mut self) {
        if self.condition() {
            if self.delay_remaining.is_none() {
                self.delay_remaining = Some(IRQ_ACCEPT_DELAY);
            }
        } else {
            self.delay_remaining = None;
        }
    }

    /// Advances the accept-delay countdown by `cycles`. Returns `true`
    /// exactly once the delay has elapsed and the condition still holds,
    /// signaling the CPU should vector to the IRQ handler on its next step.
    pub fn tick(&mut self, cycles: u32) -> bool {
        let Some(remaining) = self.delay_remaining else {
            return false;
        };
        if !self.condition() {
            self.delay_remaining = None;
            return false;
        }
        if cycles >= remaining {
            self.delay_remaining = None;
            true
        } else {
            self.delay_remaining = Some(remaining - cycles);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_with_ime_and_ie_starts_the_delay() {
        let mut ic = InterruptController::new();
        ic.set_ime(true);
        ic.set_ie(1 << crate::info::IRQ_VBLANK);
        ic.raise(IrqSource::VBlank);
        assert!(!ic.tick(3));
        assert!(ic.tick(1));
    }

    #[test]
    fn clearing_if_cancels_the_pending_delay() {
        let mut ic = InterruptController::new();
        ic.set_ime(true);
        ic.set_ie(1 << crate::info::IRQ_VBLANK);
        ic.raise(IrqSource::VBlank);
        ic.ack(1 << crate::info::IRQ_VBLANK);
        assert!(!ic.tick(4));
    }

    #[test]
    fn ack_only_clears_the_written_bits() {
        let mut ic = InterruptController::new();
        ic.raise(IrqSource::VBlank);
        ic.raise(IrqSource::HBlank);
        ic.ack(1 << crate::info::IRQ_VBLANK);
        assert_eq!(ic.iflag(), 1 << crate::info::IRQ_HBLANK);
    }

    #[test]
    fn halt_wakes_on_unmasked_pending_regardless_of_ime() {
        let mut ic = InterruptController::new();
        ic.set_ime(false);
        ic.set_ie(1 << crate::info::IRQ_TIMER0);
        ic.raise(IrqSource::Timer(0));
        assert!(ic.pending_unmasked());
    }
}
