//! DMA channel register state and the pure address/timing helpers the
//! bus uses to run a transfer. The transfer loop itself lives on
//! [`crate::bus::Bus`] since it needs the full memory map; this module
//! only owns the four channels' registers and the address-control math,
//! grounded directly on the original's `AddressControl`/`deltas` table
//! and its `start()`/`updateCycles()` rules.

use bincode::{Decode, Encode};

use crate::info::DMA_ADDR_DELTA;
use crate::macros::bit_fields;

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct DmaCtrl<u16> {
        _0: 5,
        pub(crate) dest_control: 2,
        pub(crate) src_control: 2,
        pub(crate) repeat: 1,
        pub(crate) word_size: 1,
        pub(crate) drq: 1,
        pub(crate) start_timing: 2,
        pub(crate) irq_enable: 1,
        pub(crate) enable: 1,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

impl From<u16> for StartTiming {
    fn from(v: u16) -> Self {
        match v & 0b11 {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            _ => StartTiming::Special,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum AddrControl {
    Increment,
    Decrement,
    Fixed,
    Reload,
}

impl From<u16> for AddrControl {
    fn from(v: u16) -> Self {
        match v & 0b11 {
            0 => AddrControl::Increment,
            1 => AddrControl::Decrement,
            2 => AddrControl::Fixed,
            _ => AddrControl::Reload,
        }
    }
}

#[derive(Default, Clone, Copy, Encode, Decode)]
pub(crate) struct Channel {
    pub(crate) sad: u32,
    pub(crate) dad: u32,
    pub(crate) count: u16,
    #[bincode(with_serde)]
    pub(crate) ctrl: DmaCtrl,

    /// Internal latched pointers, distinct from the raw registers: only
    /// re-latched from `sad`/`dad` on a fresh (non-repeat) start, and
    /// `dad` only on repeat when `dest_control == Reload`.
    pub(crate) internal_sad: u32,
    pub(crate) internal_dad: u32,
    pub(crate) internal_count: u32,
    pub(crate) pending_enable_edge: bool,
}

impl Channel {
    fn unit_size(&self) -> u32 {
        if self.ctrl.word_size == 1 {
            4
        } else {
            2
        }
    }

    /// Latches SAD/DAD/count on a fresh start (register write with the
    /// enable bit transitioning low->high).
    pub(crate) fn start(&mut self, sad_mask: u32, dad_mask: u32, count_mask: u32) {
        let unit = self.unit_size();
        self.internal_sad = self.sad & sad_mask & !(unit - 1);
        self.internal_dad = self.dad & dad_mask & !(unit - 1);
        self.internal_count = if self.count == 0 {
            count_mask + 1
        } else {
            u32::from(self.count) & count_mask
        };
    }

    /// Re-latches DAD only, per the Reload-on-repeat rule; called after a
    /// repeat transfer completes and the channel is about to re-arm.
    pub(crate) fn reload_dest_if_requested(&mut self, dad_mask: u32) {
        if AddrControl::from(self.ctrl.dest_control) == AddrControl::Reload {
            let unit = self.unit_size();
            self.internal_dad = self.dad & dad_mask & !(unit - 1);
        }
    }

    pub(crate) fn start_timing(&self) -> StartTiming {
        StartTiming::from(self.ctrl.start_timing)
    }

    pub(crate) fn src_delta(&self) -> i32 {
        DMA_ADDR_DELTA[self.ctrl.src_control as usize & 3] * self.unit_size() as i32
    }

    pub(crate) fn dest_delta(&self) -> i32 {
        let ctrl = self.ctrl.dest_control & 3;
        // Reload behaves like Increment during the run itself; the
        // reload-to-register-value only happens between repeats.
        let idx = if ctrl == 3 { 0 } else { ctrl as usize };
        DMA_ADDR_DELTA[idx] * self.unit_size() as i32
    }
}

#[derive(Default, Clone, Encode, Decode)]
pub(crate) struct Dma {
    pub(crate) channels: [Channel; 4],
}

impl Dma {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// EEPROM bus-width disambiguation by DMA transfer count, per the
    /// original's `initEEPROM`: only meaningful for channel 3.
    pub(crate) fn eeprom_addr_bits(count: u16) -> Option<u32> {
        match count {
            9 | 73 => Some(6),
            17 | 81 => Some(14),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_src_increment_dest_matches_the_repeat_law() {
        let mut ch = Channel {
            sad: 0x0200_0000,
            dad: 0x0600_0000,
            count: 4,
            ctrl: DmaCtrl::new((2 << 7) | (0 << 5)), // src fixed, dest increment
            ..Default::default()
        };
        ch.start(!0, !0, 0x3FFF);
        for _ in 0..4 {
            ch.internal_dad = (ch.internal_dad as i32 + ch.dest_delta()) as u32;
        }
        assert_eq!(ch.internal_dad, 0x0600_0000 + 4 * 2);
        assert_eq!(ch.internal_sad, 0x0200_0000);
    }

    #[test]
    fn eeprom_count_disambiguates_bus_width() {
        assert_eq!(Dma::eeprom_addr_bits(9), Some(6));
        assert_eq!(Dma::eeprom_addr_bits(81), Some(14));
        assert_eq!(Dma::eeprom_addr_bits(4), None);
    }
}
