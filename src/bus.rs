//! The memory map: one dispatch function keyed by `addr >> 24`, generalizing
//! the teacher's `Mmu::read`/`write` (`match_range!` over WRAM/VRAM/OAM
//! banks) to the flat GBA address space, plus the wait-state table, the DMA
//! transfer loop, and the scheduler event-dispatch loop that the teacher
//! keeps inline in `Mmu::tick`.
//!
//! `Dma`/`Timers`/`Ppu`/`InterruptController`/`GamePak` only hold register
//! state and pure helpers; `Bus` is the single "world" struct that owns all
//! of them and is the only thing that ever needs simultaneous access to two
//! of them at once (per the Design Notes' cyclic-reference resolution).

use bincode::{Decode, Encode};

use crate::audio_hook::{AudioSink, NullAudioSink};
use crate::cartridge::GamePak;
use crate::config::CoreConfig;
use crate::dma::{Dma, StartTiming};
use crate::info::*;
use crate::input::{Input, InputSource};
use crate::interrupt::{InterruptController, IrqSource};
use crate::macros::bit_fields;
use crate::ppu::Ppu;
use crate::scheduler::{EventKind, Scheduler};
use crate::timer::Timers;

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct WaitCnt<u16> {
        sram_wait: 2,
        ws0_first: 2,
        ws0_second: 1,
        ws1_first: 2,
        ws1_second: 1,
        ws2_first: 2,
        ws2_second: 1,
        phi: 2,
        _0: 1,
        prefetch: 1,
        _1: 1,
    }
}

const IO_BG2X_HI: u32 = IO_BG2X + 2;
const IO_BG2Y_HI: u32 = IO_BG2Y + 2;
const IO_BG3X_HI: u32 = IO_BG3X + 2;
const IO_BG3Y_HI: u32 = IO_BG3Y + 2;

/// Non-sequential first-access cycle cost, indexed by a 2-bit WAITCNT field.
const WS_N_CYCLES: [u32; 4] = [4, 3, 2, 8];
/// Sequential-access cycle cost for each of the three GamePak banks,
/// indexed by that bank's 1-bit "second access" WAITCNT field.
const WS0_S_CYCLES: [u32; 2] = [2, 1];
const WS1_S_CYCLES: [u32; 2] = [4, 1];
const WS2_S_CYCLES: [u32; 2] = [8, 1];

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Sequential,
    NonSequential,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Width {
    Byte,
    Half,
    Word,
}

/// A frozen copy of everything on `Bus` that isn't a trait object, per the
/// Design Notes' resolution: `cart`'s `Box<dyn SaveBackend>` and `audio`'s
/// `Box<dyn AudioSink>` can't derive `Encode`/`Decode`, so a save state
/// covers the rest and the front-end re-attaches those two around a
/// restored [`GamePak`] (itself kept out of the snapshot -- its ROM image
/// is an external asset, not emulator state).
#[derive(Encode, Decode)]
pub struct BusSnapshot {
    ewram: Vec<u8>,
    iwram: Vec<u8>,
    sound_regs: Vec<u8>,
    ppu: Ppu,
    dma: Dma,
    timers: Timers,
    interrupt: InterruptController,
    input: Input,
    waitcnt: u16,
    postflg: u8,
    halted: bool,
    last_fetch_word: u32,
    last_fetch_pc: u32,
    last_fetch_thumb: bool,
    scheduler_now: u64,
}

/// The GBA's memory map, subsystems, and scheduler, wired exactly the way
/// the Design Notes' "one world struct" resolution describes: `Bus` is the
/// sole owner of everything a memory access or a DMA/timer/PPU event might
/// need to touch.
///
/// Unlike most subsystems `Bus` does not derive `bincode::Encode`/`Decode`:
/// it embeds the cartridge's `Box<dyn SaveBackend>` and an `Box<dyn
/// AudioSink>`, neither of which can derive those traits. Save-state
/// support, if added, would snapshot the individual subsystem fields and
/// let the front-end re-attach `cart`/`audio` afterwards.
pub struct Bus {
    bios: Box<[u8]>,
    ewram: Box<[u8]>,
    iwram: Box<[u8]>,
    sound_regs: Box<[u8]>,

    pub(crate) ppu: Ppu,
    dma: Dma,
    timers: Timers,
    pub(crate) interrupt: InterruptController,
    input: Input,
    cart: GamePak,
    pub(crate) scheduler: Scheduler,

    waitcnt: WaitCnt,
    postflg: u8,
    pub(crate) halted: bool,
    color_correction: bool,

    /// Last fetched opcode word and the PC/state it was fetched under,
    /// kept here (not on the not-yet-existent CPU) so "unused" region reads
    /// can synthesize a value from it; the CPU calls [`Bus::note_fetch`]
    /// after every fetch.
    last_fetch_word: u32,
    last_fetch_pc: u32,
    last_fetch_thumb: bool,

    audio: Box<dyn AudioSink>,
}

impl Bus {
    pub fn new(cart: GamePak, config: &CoreConfig) -> Self {
        let mut bus = Self {
            bios: vec![0u8; SIZE_BIOS].into_boxed_slice(),
            ewram: vec![0u8; SIZE_EWRAM].into_boxed_slice(),
            iwram: vec![0u8; SIZE_IWRAM].into_boxed_slice(),
            sound_regs: vec![0u8; (IO_SOUND_BLOCK.end - IO_SOUND_BLOCK.start) as usize].into_boxed_slice(),
            ppu: Ppu::new(),
            dma: Dma::new(),
            timers: Timers::new(),
            interrupt: InterruptController::new(),
            input: Input::new(),
            cart,
            scheduler: Scheduler::new(),
            waitcnt: WaitCnt::default(),
            postflg: 0,
            halted: false,
            color_correction: config.lcd_color_correction,
            last_fetch_word: 0,
            last_fetch_pc: 0,
            last_fetch_thumb: false,
            audio: Box::new(NullAudioSink),
        };
        bus.ppu.start(&mut bus.scheduler);
        bus
    }

    pub fn set_bios(&mut self, image: &[u8]) {
        let n = image.len().min(SIZE_BIOS);
        self.bios[..n].copy_from_slice(&image[..n]);
    }

    /// Pre-initializes SOUNDBIAS to the value the real BIOS's boot sequence
    /// leaves behind, for `bios_skip` startups that otherwise never run it.
    pub(crate) fn seed_soundbias(&mut self) {
        set_le16(&mut self.sound_regs, (IO_SOUNDBIAS - IO_SOUND_BLOCK.start) as usize, SKIP_SOUNDBIAS);
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.audio = sink;
    }

    pub fn cart(&self) -> &GamePak {
        &self.cart
    }

    pub fn cart_mut(&mut self) -> &mut GamePak {
        &mut self.cart
    }

    /// Unwraps the cartridge, discarding every other piece of `Bus` state.
    /// Used by [`crate::gba::Gba::reset`] to carry the loaded GamePak (and
    /// its save backend) across a user-requested reset.
    pub fn into_cart(self) -> GamePak {
        self.cart
    }

    pub(crate) fn note_fetch(&mut self, pc: u32, word: u32, thumb: bool) {
        self.last_fetch_pc = pc;
        self.last_fetch_word = word;
        self.last_fetch_thumb = thumb;
    }

    pub(crate) fn poll_input(&mut self, source: &mut dyn InputSource) {
        let active_high = source.poll();
        self.input.update(active_high, &mut self.interrupt);
    }

    // -- region classification --------------------------------------

    fn region(addr: u32) -> u32 {
        addr >> 24
    }

    fn wait_cycles(&self, region: u32, width: Width, access: Access) -> u32 {
        match region {
            REGION_BIOS | REGION_IWRAM | REGION_IO | REGION_OAM => 1,
            REGION_EWRAM => {
                if width == Width::Word {
                    6
                } else {
                    3
                }
            }
            REGION_PALETTE | REGION_VRAM => {
                if width == Width::Word {
                    2
                } else {
                    1
                }
            }
            REGION_ROM0_L | REGION_ROM0_H => self.gamepak_cycles(width, access, self.waitcnt.ws0_first, WS0_S_CYCLES[self.waitcnt.ws0_second as usize]),
            REGION_ROM1_L | REGION_ROM1_H => self.gamepak_cycles(width, access, self.waitcnt.ws1_first, WS1_S_CYCLES[self.waitcnt.ws1_second as usize]),
            REGION_ROM2_L | REGION_ROM2_H => self.gamepak_cycles(width, access, self.waitcnt.ws2_first, WS2_S_CYCLES[self.waitcnt.ws2_second as usize]),
            REGION_SRAM => WS_N_CYCLES[self.waitcnt.sram_wait as usize],
            _ => 1,
        }
    }

    fn gamepak_cycles(&self, width: Width, access: Access, n_field: u16, s_cycles: u32) -> u32 {
        let one = match access {
            Access::NonSequential => WS_N_CYCLES[n_field as usize],
            Access::Sequential => s_cycles,
        };
        if width == Width::Word {
            // A word access to a 16-bit-wide GamePak bus takes two bus
            // beats; the second is always sequential.
            one + s_cycles
        } else {
            one
        }
    }

    fn bill(&mut self, cycles: u32) {
        self.scheduler.advance(cycles);
    }

    /// Bills cycles that don't go through `read*`/`write*` -- internal
    /// shifter-by-register and multiplier cycles, and HALT's idle spin.
    pub(crate) fn internal_cycles(&mut self, cycles: u32) {
        self.bill(cycles);
    }

    fn open_bus(&self, addr: u32) -> u32 {
        if self.last_fetch_thumb {
            let half = (self.last_fetch_word & 0xFFFF) as u32;
            half | (half << 16)
        } else if Self::region(self.last_fetch_pc) == REGION_BIOS && Self::region(addr) != REGION_BIOS {
            // Reading the "unused" hole from a non-BIOS PC only ever
            // synthesizes from the last ARM word, no PC-region special case.
            self.last_fetch_word
        } else {
            self.last_fetch_word
        }
    }

    // -- public read/write, width-dispatched -------------------------

    pub(crate) fn read8(&mut self, addr: u32, access: Access) -> u8 {
        let region = Self::region(addr);
        self.bill(self.wait_cycles(region, Width::Byte, access));
        self.read8_raw(addr, region)
    }

    pub(crate) fn read16(&mut self, addr: u32, access: Access) -> u16 {
        let aligned = addr & !1;
        let region = Self::region(aligned);
        self.bill(self.wait_cycles(region, Width::Half, access));
        let v = self.read16_raw(aligned, region);
        v.rotate_right(8 * (addr & 1))
    }

    pub(crate) fn read32(&mut self, addr: u32, access: Access) -> u32 {
        let aligned = addr & !3;
        let region = Self::region(aligned);
        self.bill(self.wait_cycles(region, Width::Word, access));
        let v = self.read32_raw(aligned, region);
        v.rotate_right(8 * (addr & 3))
    }

    pub(crate) fn write8(&mut self, addr: u32, val: u8, access: Access) {
        let region = Self::region(addr);
        self.bill(self.wait_cycles(region, Width::Byte, access));
        self.write8_raw(addr, val, region);
    }

    pub(crate) fn write16(&mut self, addr: u32, val: u16, access: Access) {
        let addr = addr & !1;
        let region = Self::region(addr);
        self.bill(self.wait_cycles(region, Width::Half, access));
        self.write16_raw(addr, val, region);
    }

    pub(crate) fn write32(&mut self, addr: u32, val: u32, access: Access) {
        let addr = addr & !3;
        let region = Self::region(addr);
        self.bill(self.wait_cycles(region, Width::Word, access));
        self.write32_raw(addr, val, region);
    }

    // -- raw (no wait-state billing, used internally by DMA too) -----

    fn read8_raw(&mut self, addr: u32, region: u32) -> u8 {
        match region {
            REGION_BIOS => {
                let a = addr & MASK_BIOS;
                if a <= ADDR_BIOS_END {
                    self.bios[a as usize]
                } else {
                    self.open_bus(addr) as u8
                }
            }
            REGION_EWRAM => self.ewram[(addr & MASK_EWRAM) as usize],
            REGION_IWRAM => self.iwram[(addr & MASK_IWRAM) as usize],
            REGION_IO => self.read_io8(addr & MASK_IO),
            REGION_PALETTE => self.ppu.palette[vram_index(addr, MASK_PALETTE) as usize],
            REGION_VRAM => self.ppu.vram[vram_mirror(addr) as usize],
            REGION_OAM => self.ppu.oam[(addr & MASK_OAM) as usize],
            REGION_ROM0_L | REGION_ROM0_H | REGION_ROM1_L | REGION_ROM1_H | REGION_ROM2_L | REGION_ROM2_H => {
                self.cart.read_rom8(addr & (SIZE_ROM_MAX as u32 - 1))
            }
            REGION_SRAM => self.cart.read_save8(addr & 0xFFFF),
            _ => self.open_bus(addr) as u8,
        }
    }

    fn read16_raw(&mut self, addr: u32, region: u32) -> u16 {
        match region {
            REGION_BIOS => {
                let a = addr & MASK_BIOS;
                if a <= ADDR_BIOS_END {
                    u16::from_le_bytes([self.bios[a as usize], self.bios[a as usize + 1]])
                } else {
                    self.open_bus(addr) as u16
                }
            }
            REGION_EWRAM => le16(&self.ewram, (addr & MASK_EWRAM) as usize),
            REGION_IWRAM => le16(&self.iwram, (addr & MASK_IWRAM) as usize),
            REGION_IO => self.read_io16(addr & MASK_IO),
            REGION_PALETTE => le16(&self.ppu.palette, vram_index(addr, MASK_PALETTE) as usize),
            REGION_VRAM => le16(&self.ppu.vram, vram_mirror(addr) as usize),
            REGION_OAM => le16(&self.ppu.oam, (addr & MASK_OAM) as usize),
            REGION_ROM0_L | REGION_ROM0_H | REGION_ROM1_L | REGION_ROM1_H => self.cart.read_rom16(addr & (SIZE_ROM_MAX as u32 - 1)),
            REGION_ROM2_L => self.cart.read_rom16(addr & (SIZE_ROM_MAX as u32 - 1)),
            REGION_ROM2_H => {
                if self.cart.save_kind().is_eeprom() {
                    u16::from(self.cart.eeprom_serial_read())
                } else {
                    self.cart.read_rom16(addr & (SIZE_ROM_MAX as u32 - 1))
                }
            }
            REGION_SRAM => u16::from(self.cart.read_save8(addr & 0xFFFF)),
            _ => self.open_bus(addr) as u16,
        }
    }

    fn read32_raw(&mut self, addr: u32, region: u32) -> u32 {
        match region {
            REGION_BIOS => {
                let a = addr & MASK_BIOS;
                if a <= ADDR_BIOS_END {
                    u32::from_le_bytes([self.bios[a as usize], self.bios[a as usize + 1], self.bios[a as usize + 2], self.bios[a as usize + 3]])
                } else {
                    self.open_bus(addr)
                }
            }
            REGION_EWRAM => le32(&self.ewram, (addr & MASK_EWRAM) as usize),
            REGION_IWRAM => le32(&self.iwram, (addr & MASK_IWRAM) as usize),
            REGION_IO => u32::from(self.read_io16(addr & MASK_IO)) | (u32::from(self.read_io16((addr & MASK_IO) + 2)) << 16),
            REGION_PALETTE => le32(&self.ppu.palette, vram_index(addr, MASK_PALETTE) as usize),
            REGION_VRAM => le32(&self.ppu.vram, vram_mirror(addr) as usize),
            REGION_OAM => le32(&self.ppu.oam, (addr & MASK_OAM) as usize),
            REGION_ROM0_L | REGION_ROM0_H | REGION_ROM1_L | REGION_ROM1_H | REGION_ROM2_L | REGION_ROM2_H => {
                let base = addr & (SIZE_ROM_MAX as u32 - 1);
                u32::from(self.cart.read_rom16(base)) | (u32::from(self.cart.read_rom16(base + 2)) << 16)
            }
            REGION_SRAM => u32::from(self.cart.read_save8(addr & 0xFFFF)) * 0x0101_0101,
            _ => self.open_bus(addr),
        }
    }

    fn write8_raw(&mut self, addr: u32, val: u8, region: u32) {
        match region {
            REGION_EWRAM => self.ewram[(addr & MASK_EWRAM) as usize] = val,
            REGION_IWRAM => self.iwram[(addr & MASK_IWRAM) as usize] = val,
            REGION_IO => self.write_io8(addr & MASK_IO, val),
            // Byte writes to palette/VRAM replicate across the half-word.
            REGION_PALETTE => {
                let i = vram_index(addr, MASK_PALETTE) as usize & !1;
                self.ppu.palette[i] = val;
                self.ppu.palette[i + 1] = val;
            }
            REGION_VRAM => {
                let i = vram_mirror(addr) as usize & !1;
                if i + 1 < self.ppu.vram.len() {
                    self.ppu.vram[i] = val;
                    self.ppu.vram[i + 1] = val;
                }
            }
            REGION_OAM => {} // byte writes to OAM are dropped
            REGION_SRAM => self.cart.write_save8(addr & 0xFFFF, val),
            _ => {}
        }
    }

    fn write16_raw(&mut self, addr: u32, val: u16, region: u32) {
        match region {
            REGION_EWRAM => set_le16(&mut self.ewram, (addr & MASK_EWRAM) as usize, val),
            REGION_IWRAM => set_le16(&mut self.iwram, (addr & MASK_IWRAM) as usize, val),
            REGION_IO => self.write_io16(addr & MASK_IO, val),
            REGION_PALETTE => set_le16(&mut self.ppu.palette, vram_index(addr, MASK_PALETTE) as usize, val),
            REGION_VRAM => set_le16(&mut self.ppu.vram, vram_mirror(addr) as usize, val),
            REGION_OAM => set_le16(&mut self.ppu.oam, (addr & MASK_OAM) as usize, val),
            REGION_ROM2_H if self.cart.save_kind().is_eeprom() => self.cart.eeprom_serial_write(val as u8 & 1),
            REGION_SRAM => self.cart.write_save8(addr & 0xFFFF, val as u8),
            _ => {}
        }
    }

    fn write32_raw(&mut self, addr: u32, val: u32, region: u32) {
        match region {
            REGION_EWRAM => set_le32(&mut self.ewram, (addr & MASK_EWRAM) as usize, val),
            REGION_IWRAM => set_le32(&mut self.iwram, (addr & MASK_IWRAM) as usize, val),
            REGION_IO => {
                self.write_io16(addr & MASK_IO, val as u16);
                self.write_io16((addr & MASK_IO) + 2, (val >> 16) as u16);
            }
            REGION_PALETTE => set_le32(&mut self.ppu.palette, vram_index(addr, MASK_PALETTE) as usize, val),
            REGION_VRAM => set_le32(&mut self.ppu.vram, vram_mirror(addr) as usize, val),
            REGION_OAM => set_le32(&mut self.ppu.oam, (addr & MASK_OAM) as usize, val),
            REGION_SRAM => self.cart.write_save8(addr & 0xFFFF, val as u8),
            _ => {}
        }
    }

    // -- I/O register file --------------------------------------------

    fn read_io8(&mut self, off: u32) -> u8 {
        if off == IO_POSTFLG || off == IO_HALTCNT {
            return self.read_postflg_haltcnt(off);
        }
        let half = self.read_io16(off & !1);
        if off & 1 == 1 {
            (half >> 8) as u8
        } else {
            half as u8
        }
    }

    fn write_io8(&mut self, off: u32, val: u8) {
        // POSTFLG/HALTCNT share a half-word but are genuinely byte
        // registers (HALTCNT in particular: any write halts, including 0).
        if off == IO_POSTFLG {
            self.postflg = val;
            return;
        }
        if off == IO_HALTCNT {
            self.write_haltcnt(val);
            return;
        }
        let cur = self.read_io16(off & !1);
        let merged = if off & 1 == 1 {
            (cur & 0x00FF) | (u16::from(val) << 8)
        } else {
            (cur & 0xFF00) | u16::from(val)
        };
        self.write_io16(off & !1, merged);
    }

    fn read_io16(&mut self, off: u32) -> u16 {
        match off {
            IO_DISPCNT => self.ppu.dispcnt.read(),
            IO_GREENSWAP => self.ppu.greenswap,
            IO_DISPSTAT => self.ppu.dispstat.read(),
            IO_VCOUNT => self.ppu.vcount,
            IO_BG0CNT => self.ppu.bgcnt[0].read(),
            IO_BG1CNT => self.ppu.bgcnt[1].read(),
            IO_BG2CNT => self.ppu.bgcnt[2].read(),
            IO_BG3CNT => self.ppu.bgcnt[3].read(),
            IO_WIN0H => self.ppu.read_win0h(),
            IO_WIN1H => self.ppu.read_win1h(),
            IO_WIN0V => self.ppu.read_win0v(),
            IO_WIN1V => self.ppu.read_win1v(),
            IO_WININ => self.ppu.winin.read(),
            IO_WINOUT => self.ppu.winout.read(),
            IO_MOSAIC => self.ppu.mosaic.read(),
            IO_BLDCNT => self.ppu.bldcnt.read(),
            IO_BLDALPHA => self.ppu.bldalpha.read(),
            IO_KEYINPUT => self.input.read_keyinput(),
            IO_KEYCNT => self.input.read_keycnt(),
            IO_IE => self.interrupt.ie(),
            IO_IF => self.interrupt.iflag(),
            IO_WAITCNT => self.waitcnt.read(),
            IO_IME => u16::from(self.interrupt.ime()),
            IO_SOUNDBIAS => le16(&self.sound_regs, (IO_SOUNDBIAS - IO_SOUND_BLOCK.start) as usize),
            _ if dma_reg(off).is_some() => self.read_dma_reg(off),
            _ if timer_reg(off).is_some() => self.read_timer_reg(off),
            _ if IO_SOUND_BLOCK.contains(&off) => le16(&self.sound_regs, (off - IO_SOUND_BLOCK.start) as usize),
            _ if off > IO_LAST_IMPLEMENTED => 0,
            _ => 0,
        }
    }

    fn write_io16(&mut self, off: u32, val: u16) {
        match off {
            IO_DISPCNT => self.ppu.dispcnt.write(val),
            IO_GREENSWAP => self.ppu.greenswap = val,
            IO_DISPSTAT => {
                // VBlank/HBlank/VMatch flags (bits 0-2) are read-only.
                let ro = self.ppu.dispstat.read() & 0b111;
                self.ppu.dispstat.write((val & !0b111) | ro);
            }
            IO_BG0CNT => self.ppu.bgcnt[0].write(val),
            IO_BG1CNT => self.ppu.bgcnt[1].write(val),
            IO_BG2CNT => self.ppu.bgcnt[2].write(val),
            IO_BG3CNT => self.ppu.bgcnt[3].write(val),
            IO_BG0HOFS => self.ppu.bg_hofs[0] = val & 0x1FF,
            IO_BG0VOFS => self.ppu.bg_vofs[0] = val & 0x1FF,
            IO_BG1HOFS => self.ppu.bg_hofs[1] = val & 0x1FF,
            IO_BG1VOFS => self.ppu.bg_vofs[1] = val & 0x1FF,
            IO_BG2HOFS => self.ppu.bg_hofs[2] = val & 0x1FF,
            IO_BG2VOFS => self.ppu.bg_vofs[2] = val & 0x1FF,
            IO_BG3HOFS => self.ppu.bg_hofs[3] = val & 0x1FF,
            IO_BG3VOFS => self.ppu.bg_vofs[3] = val & 0x1FF,
            IO_BG2PA => self.ppu.bg2pa = val as i16,
            IO_BG2PB => self.ppu.bg2pb = val as i16,
            IO_BG2PC => self.ppu.bg2pc = val as i16,
            IO_BG2PD => self.ppu.bg2pd = val as i16,
            IO_BG3PA => self.ppu.bg3pa = val as i16,
            IO_BG3PB => self.ppu.bg3pb = val as i16,
            IO_BG3PC => self.ppu.bg3pc = val as i16,
            IO_BG3PD => self.ppu.bg3pd = val as i16,
            IO_BG2X => self.ppu.write_bg2x(set_low16(self.ppu.bg2x as u32, val) as i32),
            IO_BG2X_HI => self.ppu.write_bg2x(set_high16(self.ppu.bg2x as u32, val) as i32),
            IO_BG2Y => self.ppu.write_bg2y(set_low16(self.ppu.bg2y as u32, val) as i32),
            IO_BG2Y_HI => self.ppu.write_bg2y(set_high16(self.ppu.bg2y as u32, val) as i32),
            IO_BG3X => self.ppu.write_bg3x(set_low16(self.ppu.bg3x as u32, val) as i32),
            IO_BG3X_HI => self.ppu.write_bg3x(set_high16(self.ppu.bg3x as u32, val) as i32),
            IO_BG3Y => self.ppu.write_bg3y(set_low16(self.ppu.bg3y as u32, val) as i32),
            IO_BG3Y_HI => self.ppu.write_bg3y(set_high16(self.ppu.bg3y as u32, val) as i32),
            IO_WIN0H => self.ppu.write_win0h(val),
            IO_WIN1H => self.ppu.write_win1h(val),
            IO_WIN0V => self.ppu.write_win0v(val),
            IO_WIN1V => self.ppu.write_win1v(val),
            IO_WININ => self.ppu.winin.write(val),
            IO_WINOUT => self.ppu.winout.write(val),
            IO_MOSAIC => self.ppu.mosaic.write(val),
            IO_BLDCNT => self.ppu.bldcnt.write(val),
            IO_BLDALPHA => self.ppu.bldalpha.write(val),
            IO_BLDY => self.ppu.bldy = val & 0x1F,
            IO_KEYCNT => self.input.write_keycnt(val),
            IO_IE => self.interrupt.set_ie(val),
            IO_IF => self.interrupt.ack(val),
            IO_WAITCNT => self.waitcnt.write(val),
            IO_IME => self.interrupt.set_ime(val & 1 != 0),
            IO_SOUNDCNT_H => {
                self.timers.fifo_clock[0] = if val & (1 << 10) != 0 { 1 } else { 0 };
                self.timers.fifo_clock[1] = if val & (1 << 14) != 0 { 1 } else { 0 };
                if val & (1 << 11) != 0 {
                    self.audio.clear_fifo(0);
                }
                if val & (1 << 15) != 0 {
                    self.audio.clear_fifo(1);
                }
                set_le16(&mut self.sound_regs, (IO_SOUNDCNT_H - IO_SOUND_BLOCK.start) as usize, val);
            }
            IO_FIFO_A => {
                self.audio.on_fifo(0, (val as i8) as i16 * 256);
                set_le16(&mut self.sound_regs, (IO_FIFO_A - IO_SOUND_BLOCK.start) as usize, val);
            }
            IO_FIFO_B => {
                self.audio.on_fifo(1, (val as i8) as i16 * 256);
                set_le16(&mut self.sound_regs, (IO_FIFO_B - IO_SOUND_BLOCK.start) as usize, val);
            }
            _ if dma_reg(off).is_some() => self.write_dma_reg(off, val),
            _ if timer_reg(off).is_some() => self.write_timer_reg(off, val),
            _ if IO_SOUND_BLOCK.contains(&off) => set_le16(&mut self.sound_regs, (off - IO_SOUND_BLOCK.start) as usize, val),
            _ => {}
        }
    }

    fn read_dma_reg(&self, off: u32) -> u16 {
        let (idx, rel) = dma_reg(off).unwrap();
        let ch = &self.dma.channels[idx];
        match rel {
            0x8 => ch.count,
            0xA => ch.ctrl.read(),
            _ => 0, // SAD/DAD are write-only on real hardware
        }
    }

    fn write_dma_reg(&mut self, off: u32, val: u16) {
        let (idx, rel) = dma_reg(off).unwrap();
        let was_enabled = self.dma.channels[idx].ctrl.enable == 1;
        match rel {
            0x0 => self.dma.channels[idx].sad = set_low16(self.dma.channels[idx].sad, val),
            0x2 => self.dma.channels[idx].sad = set_high16(self.dma.channels[idx].sad, val),
            0x4 => self.dma.channels[idx].dad = set_low16(self.dma.channels[idx].dad, val),
            0x6 => self.dma.channels[idx].dad = set_high16(self.dma.channels[idx].dad, val),
            0x8 => self.dma.channels[idx].count = val,
            0xA => {
                self.dma.channels[idx].ctrl.write(val);
                let now_enabled = self.dma.channels[idx].ctrl.enable == 1;
                if now_enabled && !was_enabled {
                    let (sad_mask, dad_mask, count_mask) = dma_masks(idx);
                    self.dma.channels[idx].start(sad_mask, dad_mask, count_mask);
                    if idx == 3 {
                        if let Some(bits) = Dma::eeprom_addr_bits(self.dma.channels[idx].count) {
                            if self.cart.save_kind().is_eeprom() {
                                self.cart.eeprom_set_addr_bits(bits);
                            }
                        }
                    }
                    if self.dma.channels[idx].start_timing() == StartTiming::Immediate {
                        self.run_dma(idx);
                    }
                }
            }
            _ => unreachable!(),
        }
    }

    fn read_timer_reg(&self, off: u32) -> u16 {
        let (idx, rel) = timer_reg(off).unwrap();
        if rel == 0 {
            self.timers.read_counter(idx, self.scheduler.now())
        } else {
            self.timers.read_ctrl(idx)
        }
    }

    fn write_timer_reg(&mut self, off: u32, val: u16) {
        let (idx, rel) = timer_reg(off).unwrap();
        if rel == 0 {
            self.timers.write_reload(idx, val);
        } else {
            self.timers.write_ctrl(idx, val, &mut self.scheduler);
        }
    }

    // -- DMA transfer loop ---------------------------------------------

    /// Runs channel `idx` to completion, charging the scheduler for every
    /// unit transferred per the `N + S + (count-1)*2S` rule.
    fn run_dma(&mut self, idx: usize) {
        let word = self.dma.channels[idx].ctrl.word_size == 1;
        let count = self.dma.channels[idx].internal_count;
        let mut sad = self.dma.channels[idx].internal_sad;
        let mut dad = self.dma.channels[idx].internal_dad;
        let src_delta = self.dma.channels[idx].src_delta();
        let dest_delta = self.dma.channels[idx].dest_delta();
        let dest_is_eeprom = idx == 3 && Self::region(dad) == REGION_ROM2_H && self.cart.save_kind().is_eeprom();
        let src_is_eeprom = idx == 3 && Self::region(sad) == REGION_ROM2_H && self.cart.save_kind().is_eeprom();

        for i in 0..count {
            let access = if i == 0 { Access::NonSequential } else { Access::Sequential };
            if src_is_eeprom {
                let bit = self.read16(sad, access) as u8 & 1;
                self.cart.eeprom_serial_write(bit);
            } else if word {
                let v = self.read32(sad, access);
                if dest_is_eeprom {
                    self.cart.eeprom_serial_write(v as u8 & 1);
                } else {
                    self.write32(dad, v, access);
                }
            } else {
                let v = self.read16(sad, access);
                if dest_is_eeprom {
                    self.cart.eeprom_serial_write(v as u8 & 1);
                } else {
                    self.write16(dad, v, access);
                }
            }
            sad = (sad as i64 + i64::from(src_delta)) as u32;
            dad = (dad as i64 + i64::from(dest_delta)) as u32;
        }

        self.dma.channels[idx].internal_sad = sad;
        self.dma.channels[idx].internal_dad = dad;

        if self.dma.channels[idx].ctrl.irq_enable == 1 {
            self.interrupt.raise(IrqSource::Dma(idx as u8));
        }

        if self.dma.channels[idx].ctrl.repeat == 1 {
            let (_, dad_mask, count_mask) = dma_masks(idx);
            self.dma.channels[idx].reload_dest_if_requested(dad_mask);
            self.dma.channels[idx].internal_count = if self.dma.channels[idx].count == 0 {
                count_mask + 1
            } else {
                u32::from(self.dma.channels[idx].count) & count_mask
            };
        } else {
            self.dma.channels[idx].ctrl.enable = 0;
        }
    }

    /// Runs every channel in `channels` whose start timing matches `timing`
    /// and is armed, in priority order (0..3). Called from the PPU
    /// HBlank/VBlank hooks and from the Special-timing dispatchers below.
    fn run_dma_for_timing(&mut self, timing: StartTiming, channels: &[usize]) {
        for &idx in channels {
            if self.dma.channels[idx].ctrl.enable == 1 && self.dma.channels[idx].start_timing() == timing {
                self.run_dma(idx);
            }
        }
    }

    // -- scheduler event dispatch ---------------------------------------

    /// Drains every event due at the scheduler's current `now`, applying
    /// its effect to the relevant subsystem(s). Call after every CPU step
    /// (or HALT spin) that may have crossed a deadline.
    pub(crate) fn dispatch_due_events(&mut self) {
        while let Some((kind, late)) = self.scheduler.pop_due() {
            match kind {
                EventKind::HBlank => {
                    let ev = self.ppu.on_hblank(&mut self.scheduler, self.color_correction);
                    if let Some(src) = ev.irq {
                        self.interrupt.raise(src);
                    }
                    if ev.hblank_started {
                        self.run_dma_for_timing(StartTiming::HBlank, &[0, 1, 2, 3]);
                    }
                }
                EventKind::HBlankEnd => {
                    let ev = self.ppu.on_hblank_end(&mut self.scheduler);
                    if let Some(src) = ev.irq {
                        self.interrupt.raise(src);
                    }
                    if ev.vblank_started {
                        self.run_dma_for_timing(StartTiming::VBlank, &[0, 1, 2, 3]);
                    }
                    let line = u32::from(self.ppu.vcount);
                    if (2..=161).contains(&line) {
                        // Video-capture Special timing is wired to DMA3 only.
                        self.run_dma_for_timing(StartTiming::Special, &[3]);
                    }
                }
                EventKind::TimerOverflow(idx) => {
                    for src in self.timers.on_overflow(idx as usize, &mut self.scheduler) {
                        self.interrupt.raise(src);
                    }
                    // Sound-FIFO Special timing is wired to DMA1 (fifo_clock[0])
                    // and DMA2 (fifo_clock[1]) only -- each fires only when its
                    // own configured timer is the one that just overflowed.
                    for ch in 0..2 {
                        if self.timers.fifo_clock[ch] == idx {
                            self.run_dma_for_timing(StartTiming::Special, &[1 + ch]);
                        }
                    }
                }
            }
            let _ = late;
        }
    }

    /// Advances the interrupt accept-delay countdown; returns `true` the
    /// cycle the CPU should vector to the IRQ handler.
    pub(crate) fn tick_interrupt_delay(&mut self, cycles: u32) -> bool {
        let fired = self.interrupt.tick(cycles);
        if fired {
            self.halted = false;
        }
        fired
    }

    /// Cycle budget the CPU may run before the next scheduled event, used
    /// by the orchestrator to avoid stepping the CPU one cycle at a time.
    pub(crate) fn cycles_until_next_event(&mut self) -> u64 {
        self.scheduler.next_deadline().map(|d| d.saturating_sub(self.scheduler.now())).unwrap_or(u64::MAX)
    }

    pub(crate) fn read_postflg_haltcnt(&self, off: u32) -> u8 {
        if off == IO_POSTFLG {
            self.postflg
        } else {
            0
        }
    }

    pub(crate) fn write_haltcnt(&mut self, val: u8) {
        self.postflg = 1;
        // Bit 7 clear means HALT, set means STOP; STOP is out of scope
        // (no external stop sources to wake from), both park the CPU.
        let _ = val;
        self.halted = true;
    }

    /// Captures everything but the cartridge and the audio sink. The
    /// scheduler's pending-event heap is not itself captured; `ppu`'s and
    /// `timers`' own re-arm methods reconstruct it from snapshotted state.
    pub fn snapshot(&self) -> BusSnapshot {
        BusSnapshot {
            ewram: self.ewram.to_vec(),
            iwram: self.iwram.to_vec(),
            sound_regs: self.sound_regs.to_vec(),
            ppu: self.ppu.clone(),
            dma: self.dma.clone(),
            timers: self.timers.clone(),
            interrupt: self.interrupt.clone(),
            input: self.input.clone(),
            waitcnt: self.waitcnt.read(),
            postflg: self.postflg,
            halted: self.halted,
            last_fetch_word: self.last_fetch_word,
            last_fetch_pc: self.last_fetch_pc,
            last_fetch_thumb: self.last_fetch_thumb,
            scheduler_now: self.scheduler.now(),
        }
    }

    /// Restores a snapshot taken from a `Bus` over the same cartridge.
    /// Replaces the scheduler outright and re-arms the PPU's pending phase
    /// event and every running timer's overflow against it.
    pub fn restore(&mut self, snap: BusSnapshot) {
        self.ewram.copy_from_slice(&snap.ewram);
        self.iwram.copy_from_slice(&snap.iwram);
        self.sound_regs.copy_from_slice(&snap.sound_regs);
        self.ppu = snap.ppu;
        self.dma = snap.dma;
        self.timers = snap.timers;
        self.interrupt = snap.interrupt;
        self.input = snap.input;
        self.waitcnt.write(snap.waitcnt);
        self.postflg = snap.postflg;
        self.halted = snap.halted;
        self.last_fetch_word = snap.last_fetch_word;
        self.last_fetch_pc = snap.last_fetch_pc;
        self.last_fetch_thumb = snap.last_fetch_thumb;

        self.scheduler = Scheduler::new();
        self.scheduler.set_now(snap.scheduler_now);
        self.ppu.rearm(&mut self.scheduler);
        self.timers.rearm_all(&mut self.scheduler);
    }
}

fn dma_masks(idx: usize) -> (u32, u32, u32) {
    if idx == 3 {
        (0x0FFF_FFFF, 0x0FFF_FFFF, 0xFFFF)
    } else {
        (0x07FF_FFFF, 0x07FF_FFFF, 0x3FFF)
    }
}

fn dma_reg(off: u32) -> Option<(usize, u32)> {
    if off < IO_DMA0SAD || off > IO_DMA0SAD + DMA_CHANNEL_STRIDE * 4 {
        return None;
    }
    let rel = off - IO_DMA0SAD;
    let idx = (rel / DMA_CHANNEL_STRIDE) as usize;
    if idx >= DMA_CHANNELS {
        return None;
    }
    Some((idx, rel % DMA_CHANNEL_STRIDE))
}

fn timer_reg(off: u32) -> Option<(usize, u32)> {
    if off < IO_TM0CNT_L || off >= IO_TM0CNT_L + TIMER_CHANNEL_STRIDE * 4 {
        return None;
    }
    let rel = off - IO_TM0CNT_L;
    let idx = (rel / TIMER_CHANNEL_STRIDE) as usize;
    Some((idx, rel % TIMER_CHANNEL_STRIDE))
}

/// VRAM's 96 KiB isn't a power of two: the first 64 KiB mirrors flat, the
/// remaining 32 KiB worth of address space mirrors the 32 KiB past it.
fn vram_mirror(addr: u32) -> u32 {
    let rel = addr & 0x1_FFFF;
    if rel < VRAM_LOWER_BOUND {
        rel
    } else {
        VRAM_LOWER_BOUND + (rel & VRAM_UPPER_HALF_MASK)
    }
}

fn vram_index(addr: u32, mask: u32) -> u32 {
    addr & mask
}

fn le16(buf: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([buf[i], buf[i + 1]])
}
fn le32(buf: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]])
}
fn set_le16(buf: &mut [u8], i: usize, v: u16) {
    let b = v.to_le_bytes();
    buf[i] = b[0];
    buf[i + 1] = b[1];
}
fn set_le32(buf: &mut [u8], i: usize, v: u32) {
    let b = v.to_le_bytes();
    buf[i..i + 4].copy_from_slice(&b);
}
fn set_low16(cur: u32, v: u16) -> u32 {
    (cur & 0xFFFF_0000) | u32::from(v)
}
fn set_high16(cur: u32, v: u16) -> u32 {
    (cur & 0x0000_FFFF) | (u32::from(v) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    fn make_bus(rom: Vec<u8>) -> Bus {
        let cfg = CoreConfig::default();
        let cart = GamePak::new(&rom, &cfg, None).unwrap();
        Bus::new(cart, &cfg)
    }

    #[test]
    fn ewram_round_trips_across_mirrors() {
        let mut bus = make_bus(vec![0u8; 0x1000]);
        bus.write32(0x0200_0000, 0xDEAD_BEEF, Access::NonSequential);
        assert_eq!(bus.read32(0x0203_FFFC, Access::NonSequential), 0xDEAD_BEEF);
    }

    #[test]
    fn unaligned_word_read_rotates() {
        let mut bus = make_bus(vec![0u8; 0x1000]);
        bus.write32(0x0300_7F00, 0xDEAD_BEEF, Access::NonSequential);
        let v = bus.read32(0x0300_7F01, Access::NonSequential);
        assert_eq!(v, 0xEFDE_ADBE);
    }

    #[test]
    fn byte_write_to_palette_replicates_to_halfword() {
        let mut bus = make_bus(vec![0u8; 0x1000]);
        bus.write8(0x0500_0000, 0x7F, Access::NonSequential);
        assert_eq!(bus.read16(0x0500_0000, Access::NonSequential), 0x7F7F);
    }

    #[test]
    fn oam_byte_write_is_dropped() {
        let mut bus = make_bus(vec![0u8; 0x1000]);
        bus.write16(0x0700_0000, 0xABCD, Access::NonSequential);
        bus.write8(0x0700_0000, 0x00, Access::NonSequential);
        assert_eq!(bus.read16(0x0700_0000, Access::NonSequential), 0xABCD);
    }

    #[test]
    fn dma_immediate_copy_runs_on_enable_write() {
        let mut bus = make_bus(vec![0u8; 0x1000]);
        for i in 0..32u32 {
            bus.write8(0x0200_0000 + i, i as u8, Access::NonSequential);
        }
        // Program channel 3: SAD=EWRAM, DAD=VRAM, count=8, word transfer.
        let base = IO_DMA0SAD + 3 * DMA_CHANNEL_STRIDE;
        bus.write_io16(base + 0x0, 0x0000);
        bus.write_io16(base + 0x2, 0x0200);
        bus.write_io16(base + 0x4, 0x0000);
        bus.write_io16(base + 0x6, 0x0600);
        bus.write_io16(base + 0x8, 8);
        bus.write_io16(base + 0xA, (1 << 10) | (1 << 15)); // word size, enable
        for i in 0..32u32 {
            assert_eq!(bus.read8(0x0600_0000 + i, Access::NonSequential), i as u8);
        }
        assert_eq!(bus.dma.channels[3].ctrl.enable, 0);
    }
}
