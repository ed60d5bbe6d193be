mod audio_hook;
mod bus;
mod cartridge;
mod config;
mod cpu;
mod dma;
mod error;
mod frame;
mod gba;
mod info;
mod input;
mod interrupt;
mod log;
mod macros;
mod ppu;
mod scheduler;
mod timer;

pub use audio_hook::{AudioSink, NullAudioSink};
pub use cartridge::save::SaveKind;
pub use cartridge::GamePak;
pub use config::{CoreConfig, RomOverride};
pub use error::CoreError;
pub use frame::{NullVideoSink, VideoSink, FRAME_HEIGHT, FRAME_WIDTH};
pub use gba::{Gba, GbaSnapshot};
pub use input::InputSource;
pub use interrupt::IrqSource;

/// CPU clock rate in Hz (~16.78 MHz), useful for a front-end driving audio
/// playback or real-time pacing off the same clock the core runs on.
pub const CPU_CLOCK_HZ: u32 = info::FREQUENCY;
