//! Audio is out of scope (no synthesis), but the core still owns the two
//! hooks a real audio mixer would subscribe to: timer-overflow-driven
//! FIFO sampling and the FIFO-reset bit.

pub trait AudioSink {
    /// Called on a timer overflow for whichever channel (A=0, B=1) that
    /// timer is configured as the FIFO clock for.
    fn on_fifo(&mut self, channel: u8, sample: i16);
    /// Called when the FIFO-reset control bit is written for `channel`.
    fn clear_fifo(&mut self, channel: u8);
}

/// An `AudioSink` that discards everything, for headless runs and tests.
#[derive(Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn on_fifo(&mut self, _channel: u8, _sample: i16) {}
    fn clear_fifo(&mut self, _channel: u8) {}
}
