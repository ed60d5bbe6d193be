//! Collection of constants used throughout the core.

type URange = std::ops::RangeInclusive<u32>;

/// One kibibyte.
pub(crate) const KB: usize = 1 << 10;
/// One mebibyte.
pub(crate) const MB: usize = 1 << 20;

// Timing parameters
// --------------------------------------------------------
/// CPU clock, cycles per second.
pub(crate) const FREQUENCY: u32 = 1 << 24; // ~16.78 MHz
pub(crate) const CYCLES_PER_SCANLINE: u32 = 1232;
pub(crate) const SCANLINES_PER_FRAME: u32 = 228;
pub(crate) const VISIBLE_SCANLINES: u32 = 160;
pub(crate) const CYCLES_VISIBLE: u32 = 960;
pub(crate) const CYCLES_HBLANK: u32 = 272;

// Memory region sizes.
// --------------------------------------------------------
pub(crate) const SIZE_BIOS: usize = 16 * KB;
pub(crate) const SIZE_EWRAM: usize = 256 * KB;
pub(crate) const SIZE_IWRAM: usize = 32 * KB;
pub(crate) const SIZE_PALETTE: usize = KB;
pub(crate) const SIZE_VRAM: usize = 96 * KB;
pub(crate) const SIZE_OAM: usize = KB;
pub(crate) const SIZE_IO: usize = 0x400;
pub(crate) const SIZE_ROM_MAX: usize = 32 * MB;

// Masks used to implement the mirroring rules for each fixed-size region.
// BIOS and OAM/palette are powers of two so a plain mask suffices; VRAM's
// 96 KiB isn't, so its region is split into an always-mirrored 64 KiB part
// and a 32 KiB part that itself mirrors every 32 KiB past 0x10000.
pub(crate) const MASK_BIOS: u32 = (SIZE_BIOS - 1) as u32;
pub(crate) const MASK_EWRAM: u32 = (SIZE_EWRAM - 1) as u32;
pub(crate) const MASK_IWRAM: u32 = (SIZE_IWRAM - 1) as u32;
pub(crate) const MASK_PALETTE: u32 = (SIZE_PALETTE - 1) as u32;
pub(crate) const MASK_OAM: u32 = (SIZE_OAM - 1) as u32;
pub(crate) const MASK_IO: u32 = (SIZE_IO - 1) as u32;
pub(crate) const VRAM_LOWER_BOUND: u32 = 0x10000;
pub(crate) const VRAM_UPPER_HALF_MASK: u32 = 0x7FFF;

// Top-byte address map (`addr >> 24`).
// --------------------------------------------------------
pub(crate) const REGION_BIOS: u32 = 0x00;
pub(crate) const REGION_EWRAM: u32 = 0x02;
pub(crate) const REGION_IWRAM: u32 = 0x03;
pub(crate) const REGION_IO: u32 = 0x04;
pub(crate) const REGION_PALETTE: u32 = 0x05;
pub(crate) const REGION_VRAM: u32 = 0x06;
pub(crate) const REGION_OAM: u32 = 0x07;
pub(crate) const REGION_ROM0_L: u32 = 0x08;
pub(crate) const REGION_ROM0_H: u32 = 0x09;
pub(crate) const REGION_ROM1_L: u32 = 0x0A;
pub(crate) const REGION_ROM1_H: u32 = 0x0B;
pub(crate) const REGION_ROM2_L: u32 = 0x0C;
pub(crate) const REGION_ROM2_H: u32 = 0x0D;
pub(crate) const REGION_SRAM: u32 = 0x0E;

pub(crate) const ADDR_BIOS_END: u32 = 0x0000_3FFF;

// IO register addresses (offsets within the 0x0400_0000 page).
// --------------------------------------------------------
pub(crate) const IO_DISPCNT: u32 = 0x000;
pub(crate) const IO_GREENSWAP: u32 = 0x002;
pub(crate) const IO_DISPSTAT: u32 = 0x004;
pub(crate) const IO_VCOUNT: u32 = 0x006;
pub(crate) const IO_BG0CNT: u32 = 0x008;
pub(crate) const IO_BG1CNT: u32 = 0x00A;
pub(crate) const IO_BG2CNT: u32 = 0x00C;
pub(crate) const IO_BG3CNT: u32 = 0x00E;
pub(crate) const IO_BG0HOFS: u32 = 0x010;
pub(crate) const IO_BG0VOFS: u32 = 0x012;
pub(crate) const IO_BG1HOFS: u32 = 0x014;
pub(crate) const IO_BG1VOFS: u32 = 0x016;
pub(crate) const IO_BG2HOFS: u32 = 0x018;
pub(crate) const IO_BG2VOFS: u32 = 0x01A;
pub(crate) const IO_BG3HOFS: u32 = 0x01C;
pub(crate) const IO_BG3VOFS: u32 = 0x01E;
pub(crate) const IO_BG2PA: u32 = 0x020;
pub(crate) const IO_BG2PB: u32 = 0x022;
pub(crate) const IO_BG2PC: u32 = 0x024;
pub(crate) const IO_BG2PD: u32 = 0x026;
pub(crate) const IO_BG2X: u32 = 0x028;
pub(crate) const IO_BG2Y: u32 = 0x02C;
pub(crate) const IO_BG3PA: u32 = 0x030;
pub(crate) const IO_BG3PB: u32 = 0x032;
pub(crate) const IO_BG3PC: u32 = 0x034;
pub(crate) const IO_BG3PD: u32 = 0x036;
pub(crate) const IO_BG3X: u32 = 0x038;
pub(crate) const IO_BG3Y: u32 = 0x03C;
pub(crate) const IO_WIN0H: u32 = 0x040;
pub(crate) const IO_WIN1H: u32 = 0x042;
pub(crate) const IO_WIN0V: u32 = 0x044;
pub(crate) const IO_WIN1V: u32 = 0x046;
pub(crate) const IO_WININ: u32 = 0x048;
pub(crate) const IO_WINOUT: u32 = 0x04A;
pub(crate) const IO_MOSAIC: u32 = 0x04C;
pub(crate) const IO_BLDCNT: u32 = 0x050;
pub(crate) const IO_BLDALPHA: u32 = 0x052;
pub(crate) const IO_BLDY: u32 = 0x054;

pub(crate) const IO_DMA0SAD: u32 = 0x0B0;
pub(crate) const IO_DMA0DAD: u32 = 0x0B4;
pub(crate) const IO_DMA0CNT_L: u32 = 0x0B8;
pub(crate) const IO_DMA0CNT_H: u32 = 0x0BA;
/// Address stride between successive DMA channels' register blocks.
pub(crate) const DMA_CHANNEL_STRIDE: u32 = 0x0C;

pub(crate) const IO_TM0CNT_L: u32 = 0x100;
pub(crate) const IO_TM0CNT_H: u32 = 0x102;
/// Address stride between successive timer channels' register blocks.
pub(crate) const TIMER_CHANNEL_STRIDE: u32 = 0x04;

pub(crate) const IO_KEYINPUT: u32 = 0x130;
pub(crate) const IO_KEYCNT: u32 = 0x132;

pub(crate) const IO_IE: u32 = 0x200;
pub(crate) const IO_IF: u32 = 0x202;
pub(crate) const IO_WAITCNT: u32 = 0x204;
pub(crate) const IO_IME: u32 = 0x208;

pub(crate) const IO_SOUNDBIAS: u32 = 0x088;
pub(crate) const IO_SOUNDCNT_H: u32 = 0x082;
pub(crate) const IO_FIFO_A: u32 = 0x0A0;
pub(crate) const IO_FIFO_B: u32 = 0x0A4;
pub(crate) const IO_SOUND_BLOCK: std::ops::Range<u32> = 0x060..0x0A8;

pub(crate) const IO_POSTFLG: u32 = 0x300;
pub(crate) const IO_HALTCNT: u32 = 0x301;

/// End of the documented, implemented MMIO range; past this everything
/// reads 0 / ignores writes, per the "unrecognized offsets" rule.
pub(crate) const IO_LAST_IMPLEMENTED: u32 = 0x3FE;

// Interrupt source bit positions within IE/IF.
// --------------------------------------------------------
pub(crate) const IRQ_VBLANK: u16 = 0;
pub(crate) const IRQ_HBLANK: u16 = 1;
pub(crate) const IRQ_VCOUNT: u16 = 2;
pub(crate) const IRQ_TIMER0: u16 = 3;
pub(crate) const IRQ_TIMER1: u16 = 4;
pub(crate) const IRQ_TIMER2: u16 = 5;
pub(crate) const IRQ_TIMER3: u16 = 6;
pub(crate) const IRQ_SERIAL: u16 = 7;
pub(crate) const IRQ_DMA0: u16 = 8;
pub(crate) const IRQ_DMA1: u16 = 9;
pub(crate) const IRQ_DMA2: u16 = 10;
pub(crate) const IRQ_DMA3: u16 = 11;
pub(crate) const IRQ_KEYPAD: u16 = 12;
pub(crate) const IRQ_GAMEPAK: u16 = 13;

/// Only the low 14 bits of IE/IF are wired to real sources.
pub(crate) const IRQ_MASK: u16 = 0x3FFF;

/// Cycles between `IE & IF` becoming non-zero (with IME set) and the CPU
/// actually vectoring to the IRQ handler.
pub(crate) const IRQ_ACCEPT_DELAY: u32 = 4;

pub(crate) const VEC_RESET: u32 = 0x00;
pub(crate) const VEC_UNDEFINED: u32 = 0x04;
pub(crate) const VEC_SWI: u32 = 0x08;
pub(crate) const VEC_PREFETCH_ABORT: u32 = 0x0C;
pub(crate) const VEC_DATA_ABORT: u32 = 0x10;
pub(crate) const VEC_IRQ: u32 = 0x18;
pub(crate) const VEC_FIQ: u32 = 0x1C;

// CPU mode field (PSR bits 4:0) values.
// --------------------------------------------------------
pub(crate) const MODE_USR: u32 = 0b10000;
pub(crate) const MODE_FIQ: u32 = 0b10001;
pub(crate) const MODE_IRQ: u32 = 0b10010;
pub(crate) const MODE_SVC: u32 = 0b10011;
pub(crate) const MODE_ABT: u32 = 0b10111;
pub(crate) const MODE_SYS: u32 = 0b11111;
pub(crate) const MODE_UND: u32 = 0b11011;

// PPU video modes and screen geometry.
// --------------------------------------------------------
pub(crate) const SCREEN_WIDTH: usize = 240;
pub(crate) const SCREEN_HEIGHT: usize = 160;
pub(crate) const OAM_ENTRIES: usize = 128;
pub(crate) const OBJ_AFFINE_GROUPS: usize = 32;

// Timer prescaler taps (in system cycles).
pub(crate) const TIMER_PRESCALERS: [u32; 4] = [1, 64, 256, 1024];

// DMA engine.
// --------------------------------------------------------
pub(crate) const DMA_CHANNELS: usize = 4;
/// Per-channel address-control step direction, indexed by the 2-bit
/// destination/source control field: Increment, Decrement, Fixed, Reload.
pub(crate) const DMA_ADDR_DELTA: [i32; 4] = [1, -1, 0, 1];

// GamePak header layout.
// --------------------------------------------------------
pub(crate) const CART_TITLE: URange = 0xA0..=0xAB;
pub(crate) const CART_GAME_CODE: URange = 0xAC..=0xAF;
pub(crate) const CART_HEADER_SIZE: u32 = 0xC0;

/// Save-backend signature strings scanned for in the ROM body.
pub(crate) const SAVE_SIGNATURES: &[(&[u8], usize)] = &[
    (b"SRAM_V", 0x8000),
    (b"SRAM_F_V", 0x8000),
    (b"EEPROM_V", 0x2000),
    (b"FLASH1M_V", 0x20000),
    (b"FLASH512_V", 0x10000),
    (b"FLASH_V", 0x10000),
];

// BIOS-skip boot state (per the documented fast-boot register seed).
// --------------------------------------------------------
pub(crate) const SKIP_SP_USR: u32 = 0x0300_7F00;
pub(crate) const SKIP_SP_IRQ: u32 = 0x0300_7FA0;
pub(crate) const SKIP_SP_SVC: u32 = 0x0300_7FE0;
pub(crate) const SKIP_ENTRY_PC: u32 = 0x0800_0000;
pub(crate) const SKIP_SOUNDBIAS: u16 = 0x0200;

// EEPROM DMA transfer-count disambiguation (channel 3 only).
pub(crate) const EEPROM_READ_COUNTS_6BIT: [u16; 1] = [9];
pub(crate) const EEPROM_WRITE_COUNTS_6BIT: [u16; 1] = [73];
pub(crate) const EEPROM_READ_COUNTS_14BIT: [u16; 1] = [17];
pub(crate) const EEPROM_WRITE_COUNTS_14BIT: [u16; 1] = [81];
