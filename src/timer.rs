//! Four 16-bit timer channels. Rather than ticking every cycle like the
//! teacher's `sys_clock`/`tick_from_to` bit-fall scheme, each active
//! non-cascade channel computes the absolute cycle of its next overflow
//! and hands one event to the scheduler; cascade channels instead step
//! synchronously off their predecessor's overflow.

use bincode::{Decode, Encode};

use crate::info::TIMER_PRESCALERS;
use crate::interrupt::IrqSource;
use crate::macros::bit_fields;
use crate::scheduler::{EventKind, Scheduler};

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct TimerCtrl<u16> {
        pub(crate) prescaler: 2,
        pub(crate) cascade: 1,
        _0: 3,
        pub(crate) irq_enable: 1,
        pub(crate) enable: 1,
    }
}

#[derive(Clone, Encode, Decode)]
struct Channel {
    reload: u16,
    #[bincode(with_serde)]
    ctrl: TimerCtrl,
    /// Counter value as of `base_cycle` (non-cascade, running) or the
    /// live value (cascade, or stopped).
    base_value: u16,
    base_cycle: u64,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            reload: 0,
            ctrl: TimerCtrl::default(),
            base_value: 0,
            base_cycle: 0,
        }
    }
}

#[derive(Default, Clone, Encode, Decode)]
pub(crate) struct Timers {
    channels: [Channel; 4],
    /// FIFO clock assignment (Timer 0 or 1) per DMA sound channel A/B,
    /// set by the DMA engine's sound-control register, consumed here to
    /// decide which overflow should call into the audio hook.
    pub(crate) fifo_clock: [u8; 2],
}

fn prescaler_of(ctrl: &TimerCtrl) -> u32 {
    TIMER_PRESCALERS[ctrl.prescaler as usize]
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read_reload(&self, idx: usize) -> u16 {
        self.channels[idx].reload
    }

    pub(crate) fn write_reload(&mut self, idx: usize, v: u16) {
        self.channels[idx].reload = v;
    }

    pub(crate) fn read_ctrl(&self, idx: usize) -> u16 {
        self.channels[idx].ctrl.read()
    }

    pub(crate) fn read_counter(&self, idx: usize, now: u64) -> u16 {
        let ch = &self.channels[idx];
        if ch.ctrl.enable == 1 && ch.ctrl.cascade == 0 {
            let elapsed = now.saturating_sub(ch.base_cycle);
            let prescaler = u64::from(prescaler_of(&ch.ctrl));
            ch.base_value.wrapping_add((elapsed / prescaler) as u16)
        } else {
            ch.base_value
        }
    }

    /// Writes `TMxCNT_H`, handling the enable-rising-edge reload and
    /// (re)scheduling the next overflow.
    pub(crate) fn write_ctrl(&mut self, idx: usize, v: u16, scheduler: &mut Scheduler) {
        let was_enabled = self.channels[idx].ctrl.enable == 1;
        let was_cascade = self.channels[idx].ctrl.cascade == 1;
        self.channels[idx].ctrl.write(v);
        let ch = &self.channels[idx];
        let now_enabled = ch.ctrl.enable == 1;
        let now_cascade = ch.ctrl.cascade == 1;

        if now_enabled && (!was_enabled || was_cascade != now_cascade) {
            self.channels[idx].base_value = self.channels[idx].reload;
            self.channels[idx].base_cycle = scheduler.now();
            if !now_cascade {
                self.arm_overflow(idx, scheduler);
            } else {
                scheduler.cancel_timer_overflow(idx as u8);
            }
        } else if !now_enabled && was_enabled {
            // Freeze at the current live value before dropping the event.
            let now = scheduler.now();
            self.channels[idx].base_value = self.read_counter(idx, now);
            self.channels[idx].base_cycle = now;
            scheduler.cancel_timer_overflow(idx as u8);
        }
    }

    /// Re-arms every enabled non-cascade channel's overflow event against
    /// a freshly created scheduler. Used on snapshot restore: the
    /// scheduler's pending-event heap isn't itself part of the snapshot,
    /// but `base_cycle`/`base_value` are, so the deadline formula
    /// [`Timers::arm_overflow`] uses is exactly reproducible.
    pub(crate) fn rearm_all(&self, scheduler: &mut Scheduler) {
        for idx in 0..self.channels.len() {
            if self.channels[idx].ctrl.enable == 1 && self.channels[idx].ctrl.cascade == 0 {
                self.arm_overflow(idx, scheduler);
            }
        }
    }

    fn arm_overflow(&self, idx: usize, scheduler: &mut Scheduler) {
        let ch = &self.channels[idx];
        let prescaler = u64::from(prescaler_of(&ch.ctrl));
        let remaining = u64::from(0x10000u32 - u32::from(ch.base_value));
        let deadline = ch.base_cycle + prescaler * remaining;
        scheduler.schedule_timer_overflow(idx as u8, deadline);
    }

    /// Called by the owning bus when `TimerOverflow(idx)` fires. Reloads
    /// the channel, optionally raises its IRQ, cascades into `idx+1`, and
    /// re-arms its own next overflow. Returns the IRQ sources to raise.
    pub(crate) fn on_overflow(&mut self, idx: usize, scheduler: &mut Scheduler) -> Vec<IrqSource> {
        let mut irqs = Vec::new();
        self.channels[idx].base_value = self.channels[idx].reload;
        self.channels[idx].base_cycle = scheduler.now();

        if self.channels[idx].ctrl.irq_enable == 1 {
            irqs.push(IrqSource::Timer(idx as u8));
        }
        if self.channels[idx].ctrl.enable == 1 && self.channels[idx].ctrl.cascade == 0 {
            self.arm_overflow(idx, scheduler);
        }

        if idx + 1 < self.channels.len() {
            let next = &self.channels[idx + 1];
            if next.ctrl.enable == 1 && next.ctrl.cascade == 1 {
                let overflowed = self.channels[idx + 1].base_value == 0xFFFF;
                self.channels[idx + 1].base_value = self.channels[idx + 1].base_value.wrapping_add(1);
                if overflowed {
                    irqs.extend(self.on_overflow(idx + 1, scheduler));
                }
            }
        }

        irqs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_deadline_matches_prescaler_and_reload() {
        let mut timers = Timers::new();
        let mut sched = Scheduler::new();
        timers.write_reload(0, 0xFFFE);
        timers.write_ctrl(0, 0b1_0000_0000_0000_0000u16 | 0, &mut sched);
        // enable bit is bit15; prescaler=1(bits0-1=0).
        assert_eq!(sched.next_deadline(), Some(2));
    }

    #[test]
    fn cascade_increments_on_predecessor_overflow() {
        let mut timers = Timers::new();
        let mut sched = Scheduler::new();
        timers.write_reload(0, 0xFFFE);
        timers.write_ctrl(0, 1 << 15, &mut sched); // enable, prescaler 1
        timers.write_ctrl(1, (1 << 15) | (1 << 2), &mut sched); // enable, cascade

        sched.advance(2);
        let (kind, _) = sched.pop_due().unwrap();
        assert_eq!(kind, EventKind::TimerOverflow(0));
        timers.on_overflow(0, &mut sched);
        assert_eq!(timers.read_counter(1, sched.now()), 1);
    }
}
