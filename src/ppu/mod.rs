mod bg;
mod collapse;
mod color;
mod obj;
pub(crate) mod regs;

use crate::info::*;
use crate::interrupt::IrqSource;
use crate::macros::bit_fields;
use crate::scheduler::{EventKind, Scheduler};
use bincode::{Decode, Encode};
use regs::{BgCnt, BldAlpha, BldCnt, DispCnt, DispStat, Mosaic, WinIn, WinOut};

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct WinCoord<u16> {
        second: 8,
        first: 8,
    }
}

/// Outcome of a phase-transition event, reported back to the owning
/// [`crate::bus::Bus`] so it can poke the interrupt controller and DMA
/// engine -- the PPU itself has no reference to either.
#[derive(Default, Clone, Copy)]
pub(crate) struct PpuEvent {
    pub(crate) irq: Option<IrqSource>,
    pub(crate) hblank_started: bool,
    pub(crate) vblank_started: bool,
}

#[derive(Clone, Encode, Decode)]
pub(crate) struct Ppu {
    #[bincode(with_serde)]
    pub(crate) dispcnt: DispCnt,
    pub(crate) greenswap: u16,
    #[bincode(with_serde)]
    pub(crate) dispstat: DispStat,
    pub(crate) vcount: u16,

    #[bincode(with_serde)]
    pub(crate) bgcnt: [BgCnt; 4],
    pub(crate) bg_hofs: [u16; 4],
    pub(crate) bg_vofs: [u16; 4],

    pub(crate) bg2pa: i16,
    pub(crate) bg2pb: i16,
    pub(crate) bg2pc: i16,
    pub(crate) bg2pd: i16,
    pub(crate) bg3pa: i16,
    pub(crate) bg3pb: i16,
    pub(crate) bg3pc: i16,
    pub(crate) bg3pd: i16,
    pub(crate) bg2x: i32,
    pub(crate) bg2y: i32,
    pub(crate) bg3x: i32,
    pub(crate) bg3y: i32,
    bg2_ix: i32,
    bg2_iy: i32,
    bg3_ix: i32,
    bg3_iy: i32,

    #[bincode(with_serde)]
    win0h: WinCoord,
    #[bincode(with_serde)]
    win1h: WinCoord,
    #[bincode(with_serde)]
    win0v: WinCoord,
    #[bincode(with_serde)]
    win1v: WinCoord,
    #[bincode(with_serde)]
    pub(crate) winin: WinIn,
    #[bincode(with_serde)]
    pub(crate) winout: WinOut,
    #[bincode(with_serde)]
    pub(crate) mosaic: Mosaic,
    #[bincode(with_serde)]
    pub(crate) bldcnt: BldCnt,
    #[bincode(with_serde)]
    pub(crate) bldalpha: BldAlpha,
    pub(crate) bldy: u16,

    pub(crate) palette: Box<[u8]>,
    pub(crate) vram: Box<[u8]>,
    pub(crate) oam: Box<[u8]>,

    pub(crate) frame: Box<[u32]>,
    back_frame: Box<[u32]>,
    pub(crate) frame_ready: bool,

    /// Absolute deadline and kind of whichever phase event is currently
    /// pending on the scheduler, mirrored here (not read back from the
    /// scheduler) so a snapshot/restore round-trip can re-arm the exact
    /// same event without serializing the scheduler's heap itself.
    pub(crate) next_phase_deadline: u64,
    pub(crate) next_phase_is_end: bool,
}

impl Ppu {
    pub(crate) fn new() -> Self {
        Self {
            dispcnt: DispCnt::default(),
            greenswap: 0,
            dispstat: DispStat::default(),
            vcount: 0,
            bgcnt: [BgCnt::default(); 4],
            bg_hofs: [0; 4],
            bg_vofs: [0; 4],
            bg2pa: 0x100,
            bg2pb: 0,
            bg2pc: 0,
            bg2pd: 0x100,
            bg3pa: 0x100,
            bg3pb: 0,
            bg3pc: 0,
            bg3pd: 0x100,
            bg2x: 0,
            bg2y: 0,
            bg3x: 0,
            bg3y: 0,
            bg2_ix: 0,
            bg2_iy: 0,
            bg3_ix: 0,
            bg3_iy: 0,
            win0h: WinCoord::default(),
            win1h: WinCoord::default(),
            win0v: WinCoord::default(),
            win1v: WinCoord::default(),
            winin: WinIn::default(),
            winout: WinOut::default(),
            mosaic: Mosaic::default(),
            bldcnt: BldCnt::default(),
            bldalpha: BldAlpha::default(),
            bldy: 0,
            palette: vec![0u8; SIZE_PALETTE].into_boxed_slice(),
            vram: vec![0u8; SIZE_VRAM].into_boxed_slice(),
            oam: vec![0u8; SIZE_OAM].into_boxed_slice(),
            frame: vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            back_frame: vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            frame_ready: false,
            next_phase_deadline: 0,
            next_phase_is_end: false,
        }
    }

    /// Arms the first HBlank event of the session; call once at boot/reset.
    pub(crate) fn start(&mut self, scheduler: &mut Scheduler) {
        let deadline = u64::from(CYCLES_VISIBLE);
        scheduler.schedule_ppu_phase(EventKind::HBlank, deadline);
        self.next_phase_deadline = deadline;
        self.next_phase_is_end = false;
    }

    /// Re-arms whichever phase event [`Ppu::next_phase_deadline`]/
    /// [`Ppu::next_phase_is_end`] describe, without recomputing it --
    /// used when restoring a snapshot onto a freshly created scheduler.
    pub(crate) fn rearm(&self, scheduler: &mut Scheduler) {
        let kind = if self.next_phase_is_end { EventKind::HBlankEnd } else { EventKind::HBlank };
        scheduler.schedule_ppu_phase(kind, self.next_phase_deadline);
    }

    fn window_bounds(coord: &WinCoord, max: u16) -> (u16, u16) {
        let (first, second) = (coord.first, coord.second);
        if first <= second {
            (first, second.min(max))
        } else {
            // Degenerate GBA behavior: first > second wraps to cover the
            // whole line/screen.
            (0, max)
        }
    }

    fn window_mask(&self, horiz: &WinCoord, vert: &WinCoord) -> [bool; SCREEN_WIDTH] {
        let mut mask = [false; SCREEN_WIDTH];
        let (y0, y1) = Self::window_bounds(vert, (VISIBLE_SCANLINES - 1) as u16);
        if self.vcount < y0 || self.vcount > y1 {
            return mask;
        }
        let (x0, x1) = Self::window_bounds(horiz, (SCREEN_WIDTH - 1) as u16);
        for (x, slot) in mask.iter_mut().enumerate() {
            *slot = (x0 as usize..=x1 as usize).contains(&x);
        }
        mask
    }

    fn render_scanline(&mut self, color_correction: bool) {
        let line = self.vcount as u32;
        let mode = self.dispcnt.mode;

        let mut bgs: [Option<(bg::BgLine, u8)>; 4] = [None, None, None, None];
        match mode {
            0 => {
                for i in 0..4 {
                    if self.bg_layer_enabled(i) {
                        bgs[i] = Some((self.render_text_layer(i, line), self.bgcnt[i].priority as u8));
                    }
                }
            }
            1 => {
                for i in 0..2 {
                    if self.bg_layer_enabled(i) {
                        bgs[i] = Some((self.render_text_layer(i, line), self.bgcnt[i].priority as u8));
                    }
                }
                if self.bg_layer_enabled(2) {
                    bgs[2] = Some((self.render_affine_layer(2), self.bgcnt[2].priority as u8));
                }
            }
            2 => {
                if self.bg_layer_enabled(2) {
                    bgs[2] = Some((self.render_affine_layer(2), self.bgcnt[2].priority as u8));
                }
                if self.bg_layer_enabled(3) {
                    bgs[3] = Some((self.render_affine_layer(3), self.bgcnt[3].priority as u8));
                }
            }
            3 => bgs[2] = Some((bg::render_bitmap_mode3(&self.vram, line), 0)),
            4 => bgs[2] = Some((bg::render_bitmap_mode4(&self.vram, &self.palette, line, self.dispcnt.frame_select == 1), 0)),
            5 => bgs[2] = Some((bg::render_bitmap_mode5(&self.vram, line, self.dispcnt.frame_select == 1), 0)),
            _ => {}
        }

        let objs = if self.dispcnt.obj_enable == 1 {
            obj::render_scanline(
                &self.oam,
                &self.vram,
                &self.palette[0x200..],
                self.dispcnt.obj_mapping_1d == 1,
                line as i32,
                self.mosaic.obj_h as u32,
                self.mosaic.obj_v as u32,
            )
        } else {
            [obj::ObjPixel::default(); SCREEN_WIDTH]
        };

        let any_window = self.dispcnt.win0_enable == 1
            || self.dispcnt.win1_enable == 1
            || self.dispcnt.obj_win_enable == 1;
        let win0_mask = (self.dispcnt.win0_enable == 1).then(|| self.window_mask(&self.win0h, &self.win0v));
        let win1_mask = (self.dispcnt.win1_enable == 1).then(|| self.window_mask(&self.win1h, &self.win1v));

        let layer_mask = |flags: u16| collapse::LayerMask {
            bg: [flags & 1 != 0, flags & 2 != 0, flags & 4 != 0, flags & 8 != 0],
            obj: flags & 16 != 0,
            blend: flags & 32 != 0,
        };
        let windows = collapse::WindowMasks {
            win0: win0_mask.as_ref(),
            win1: win1_mask.as_ref(),
            win0_layers: layer_mask(self.winin.read() & 0x3F),
            win1_layers: layer_mask((self.winin.read() >> 8) & 0x3F),
            obj_win_layers: layer_mask(self.winout.read() & 0x3F),
            outside_layers: layer_mask((self.winout.read() >> 8) & 0x3F),
            any_window_enabled: any_window,
        };

        let bld_layer_mask = |bits_lo: u16| collapse::LayerMask {
            bg: [bits_lo & 1 != 0, bits_lo & 2 != 0, bits_lo & 4 != 0, bits_lo & 8 != 0],
            obj: bits_lo & 16 != 0,
            blend: bits_lo & 32 != 0,
        };
        let bldcnt = self.bldcnt.read();
        let target1 = bld_layer_mask(bldcnt & 0x3F);
        let target2 = bld_layer_mask((bldcnt >> 8) & 0x3F);
        let backdrop = u16::from_le_bytes([self.palette[0], self.palette[1]]);

        let row = &mut self.back_frame[line as usize * SCREEN_WIDTH..(line as usize + 1) * SCREEN_WIDTH];
        let row: &mut [u32; SCREEN_WIDTH] = row.try_into().unwrap();
        collapse::compose_scanline(
            &bgs,
            &objs,
            &windows,
            regs::BlendMode::from(self.bldcnt.mode),
            target1,
            target2,
            self.bldalpha.eva as u8,
            self.bldalpha.evb as u8,
            self.bldy as u8,
            backdrop,
            color_correction,
            row,
        );
    }

    fn bg_layer_enabled(&self, i: usize) -> bool {
        match i {
            0 => self.dispcnt.bg0_enable == 1,
            1 => self.dispcnt.bg1_enable == 1,
            2 => self.dispcnt.bg2_enable == 1,
            _ => self.dispcnt.bg3_enable == 1,
        }
    }

    fn render_text_layer(&self, i: usize, line: u32) -> bg::BgLine {
        let cnt = self.bgcnt[i];
        let map_base = cnt.map_base_block as usize * 0x800;
        let tile_base = cnt.tile_base_block as usize * 0x4000;
        bg::render_text(
            &self.vram,
            &self.palette,
            map_base,
            tile_base,
            cnt.screen_size as u8,
            cnt.palette_256 == 1,
            self.bg_hofs[i] as u32,
            self.bg_vofs[i] as u32,
            line,
            if cnt.mosaic == 1 { self.mosaic.bg_h as u32 } else { 0 },
            if cnt.mosaic == 1 { self.mosaic.bg_v as u32 } else { 0 },
        )
    }

    fn render_affine_layer(&self, i: usize) -> bg::BgLine {
        let cnt = self.bgcnt[i];
        let map_base = cnt.map_base_block as usize * 0x800;
        let tile_base = cnt.tile_base_block as usize * 0x4000;
        let (ix, iy, pa, pc) = if i == 2 {
            (self.bg2_ix, self.bg2_iy, self.bg2pa as i32, self.bg2pc as i32)
        } else {
            (self.bg3_ix, self.bg3_iy, self.bg3pa as i32, self.bg3pc as i32)
        };
        bg::render_affine(
            &self.vram,
            &self.palette,
            map_base,
            tile_base,
            cnt.screen_size as u8,
            cnt.wraparound == 1,
            ix,
            iy,
            pa,
            pc,
        )
    }

    /// Called when the HBlank phase event fires: renders the scanline
    /// that just finished its visible window and signals HBlank IRQ/DMA.
    pub(crate) fn on_hblank(&mut self, scheduler: &mut Scheduler, color_correction: bool) -> PpuEvent {
        let mut ev = PpuEvent::default();
        if self.dispcnt.forced_blank == 0 && self.vcount < VISIBLE_SCANLINES as u16 {
            self.render_scanline(color_correction);
        }
        self.dispstat.hblank = 1;
        if self.dispstat.hblank_irq == 1 {
            ev.irq = Some(IrqSource::HBlank);
        }
        ev.hblank_started = true;

        let deadline = scheduler.now() + u64::from(CYCLES_HBLANK);
        scheduler.schedule_ppu_phase(EventKind::HBlankEnd, deadline);
        self.next_phase_deadline = deadline;
        self.next_phase_is_end = true;
        ev
    }

    /// Called at the end of HBlank: advances VCount, updates affine
    /// reference points, and handles the VBlank transition at line 160.
    pub(crate) fn on_hblank_end(&mut self, scheduler: &mut Scheduler) -> PpuEvent {
        let mut ev = PpuEvent::default();
        self.dispstat.hblank = 0;

        self.bg2_ix += self.bg2pb as i32;
        self.bg2_iy += self.bg2pd as i32;
        self.bg3_ix += self.bg3pb as i32;
        self.bg3_iy += self.bg3pd as i32;

        self.vcount += 1;
        if self.vcount >= SCANLINES_PER_FRAME as u16 {
            self.vcount = 0;
            self.bg2_ix = self.bg2x;
            self.bg2_iy = self.bg2y;
            self.bg3_ix = self.bg3x;
            self.bg3_iy = self.bg3y;
        }

        if self.vcount == VISIBLE_SCANLINES as u16 {
            self.dispstat.vblank = 1;
            ev.vblank_started = true;
            self.back_frame.swap_with_slice(&mut self.frame);
            self.frame_ready = true;
            if self.dispstat.vblank_irq == 1 {
                ev.irq = Some(IrqSource::VBlank);
            }
        } else if self.vcount == 0 {
            self.dispstat.vblank = 0;
        }

        self.dispstat.vmatch = u16::from(self.vcount == self.dispstat.vcount_compare);
        if self.dispstat.vmatch == 1 && self.dispstat.vmatch_irq == 1 {
            ev.irq = Some(match ev.irq {
                // VBlank/HBlank already signaled this tick take priority
                // in IF anyway (OR-ed); VCount can coexist.
                Some(other) => other,
                None => IrqSource::VCount,
            });
        }

        let deadline = scheduler.now() + u64::from(CYCLES_VISIBLE);
        scheduler.schedule_ppu_phase(EventKind::HBlank, deadline);
        self.next_phase_deadline = deadline;
        self.next_phase_is_end = false;
        ev
    }

    pub(crate) fn take_frame(&mut self) -> Option<&[u32]> {
        if self.frame_ready {
            self.frame_ready = false;
            Some(&self.frame)
        } else {
            None
        }
    }

    pub(crate) fn read_win0h(&self) -> u16 {
        self.win0h.read()
    }
    pub(crate) fn write_win0h(&mut self, v: u16) {
        self.win0h.write(v)
    }
    pub(crate) fn read_win1h(&self) -> u16 {
        self.win1h.read()
    }
    pub(crate) fn write_win1h(&mut self, v: u16) {
        self.win1h.write(v)
    }
    pub(crate) fn read_win0v(&self) -> u16 {
        self.win0v.read()
    }
    pub(crate) fn write_win0v(&mut self, v: u16) {
        self.win0v.write(v)
    }
    pub(crate) fn read_win1v(&self) -> u16 {
        self.win1v.read()
    }
    pub(crate) fn write_win1v(&mut self, v: u16) {
        self.win1v.write(v)
    }

    pub(crate) fn write_bg2x(&mut self, v: i32) {
        self.bg2x = sign_extend_28(v);
        self.bg2_ix = self.bg2x;
    }
    pub(crate) fn write_bg2y(&mut self, v: i32) {
        self.bg2y = sign_extend_28(v);
        self.bg2_iy = self.bg2y;
    }
    pub(crate) fn write_bg3x(&mut self, v: i32) {
        self.bg3x = sign_extend_28(v);
        self.bg3_ix = self.bg3x;
    }
    pub(crate) fn write_bg3y(&mut self, v: i32) {
        self.bg3y = sign_extend_28(v);
        self.bg3_iy = self.bg3y;
    }
}

fn sign_extend_28(v: i32) -> i32 {
    (v << 4) >> 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hblank_then_hblank_end_advances_vcount() {
        let mut ppu = Ppu::new();
        let mut sched = Scheduler::new();
        ppu.start(&mut sched);
        sched.advance(CYCLES_VISIBLE);
        let (kind, _) = sched.pop_due().unwrap();
        assert_eq!(kind, EventKind::HBlank);
        ppu.on_hblank(&mut sched, false);
        sched.advance(CYCLES_HBLANK);
        let (kind, _) = sched.pop_due().unwrap();
        assert_eq!(kind, EventKind::HBlankEnd);
        ppu.on_hblank_end(&mut sched);
        assert_eq!(ppu.vcount, 1);
    }

    #[test]
    fn vblank_flag_set_entering_line_160() {
        let mut ppu = Ppu::new();
        let mut sched = Scheduler::new();
        ppu.start(&mut sched);
        for _ in 0..VISIBLE_SCANLINES {
            sched.advance(CYCLES_VISIBLE);
            sched.pop_due();
            ppu.on_hblank(&mut sched, false);
            sched.advance(CYCLES_HBLANK);
            sched.pop_due();
            ppu.on_hblank_end(&mut sched);
        }
        assert_eq!(ppu.dispstat.vblank, 1);
        assert_eq!(ppu.vcount, VISIBLE_SCANLINES as u16);
    }
}
