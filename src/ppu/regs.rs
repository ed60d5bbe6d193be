//! Bit-field register layouts for the PPU's MMIO surface.

use crate::macros::bit_fields;

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct DispCnt<u16> {
        pub(crate) mode: 3,
        pub(crate) is_cgb: 1,
        pub(crate) frame_select: 1,
        pub(crate) hblank_free: 1,
        pub(crate) obj_mapping_1d: 1,
        pub(crate) forced_blank: 1,
        pub(crate) bg0_enable: 1,
        pub(crate) bg1_enable: 1,
        pub(crate) bg2_enable: 1,
        pub(crate) bg3_enable: 1,
        pub(crate) obj_enable: 1,
        pub(crate) win0_enable: 1,
        pub(crate) win1_enable: 1,
        pub(crate) obj_win_enable: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct DispStat<u16> {
        pub(crate) vblank: 1,
        pub(crate) hblank: 1,
        pub(crate) vmatch: 1,
        pub(crate) vblank_irq: 1,
        pub(crate) hblank_irq: 1,
        pub(crate) vmatch_irq: 1,
        _0: 2,
        pub(crate) vcount_compare: 8,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct BgCnt<u16> {
        pub(crate) priority: 2,
        pub(crate) tile_base_block: 2,
        _0: 2,
        pub(crate) mosaic: 1,
        pub(crate) palette_256: 1,
        pub(crate) map_base_block: 5,
        pub(crate) wraparound: 1,
        pub(crate) screen_size: 2,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct WinIn<u16> {
        pub(crate) win0_bg0: 1,
        pub(crate) win0_bg1: 1,
        pub(crate) win0_bg2: 1,
        pub(crate) win0_bg3: 1,
        pub(crate) win0_obj: 1,
        pub(crate) win0_blend: 1,
        _0: 2,
        pub(crate) win1_bg0: 1,
        pub(crate) win1_bg1: 1,
        pub(crate) win1_bg2: 1,
        pub(crate) win1_bg3: 1,
        pub(crate) win1_obj: 1,
        pub(crate) win1_blend: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct WinOut<u16> {
        pub(crate) outside_bg0: 1,
        pub(crate) outside_bg1: 1,
        pub(crate) outside_bg2: 1,
        pub(crate) outside_bg3: 1,
        pub(crate) outside_obj: 1,
        pub(crate) outside_blend: 1,
        _0: 2,
        pub(crate) obj_win_bg0: 1,
        pub(crate) obj_win_bg1: 1,
        pub(crate) obj_win_bg2: 1,
        pub(crate) obj_win_bg3: 1,
        pub(crate) obj_win_obj: 1,
        pub(crate) obj_win_blend: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct Mosaic<u16> {
        pub(crate) bg_h: 4,
        pub(crate) bg_v: 4,
        pub(crate) obj_h: 4,
        pub(crate) obj_v: 4,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct BldCnt<u16> {
        pub(crate) target1_bg0: 1,
        pub(crate) target1_bg1: 1,
        pub(crate) target1_bg2: 1,
        pub(crate) target1_bg3: 1,
        pub(crate) target1_obj: 1,
        pub(crate) target1_backdrop: 1,
        pub(crate) mode: 2,
        pub(crate) target2_bg0: 1,
        pub(crate) target2_bg1: 1,
        pub(crate) target2_bg2: 1,
        pub(crate) target2_bg3: 1,
        pub(crate) target2_obj: 1,
        pub(crate) target2_backdrop: 1,
    }
}

bit_fields! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub(crate) struct BldAlpha<u16> {
        pub(crate) eva: 5,
        _0: 3,
        pub(crate) evb: 5,
    }
}

/// Blend mode decoded from [`BldCnt::mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlendMode {
    None,
    Alpha,
    Brighten,
    Darken,
}

impl From<u16> for BlendMode {
    fn from(v: u16) -> Self {
        match v & 0b11 {
            0 => BlendMode::None,
            1 => BlendMode::Alpha,
            2 => BlendMode::Brighten,
            _ => BlendMode::Darken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgcnt_round_trips_every_field() {
        let mut cnt = BgCnt::default();
        cnt.priority = 3;
        cnt.tile_base_block = 2;
        cnt.mosaic = 1;
        cnt.palette_256 = 1;
        cnt.map_base_block = 17;
        cnt.wraparound = 1;
        cnt.screen_size = 2;
        let bits = cnt.read();
        let back = BgCnt::new(bits);
        assert_eq!(back.priority, 3);
        assert_eq!(back.tile_base_block, 2);
        assert_eq!(back.mosaic, 1);
        assert_eq!(back.palette_256, 1);
        assert_eq!(back.map_base_block, 17);
        assert_eq!(back.wraparound, 1);
        assert_eq!(back.screen_size, 2);
    }

    #[test]
    fn blendmode_from_bits_covers_all_four_modes() {
        assert_eq!(BlendMode::from(0), BlendMode::None);
        assert_eq!(BlendMode::from(1), BlendMode::Alpha);
        assert_eq!(BlendMode::from(2), BlendMode::Brighten);
        assert_eq!(BlendMode::from(3), BlendMode::Darken);
    }

    #[test]
    fn dispstat_vcount_compare_is_the_top_byte() {
        let mut stat = DispStat::default();
        stat.vcount_compare = 120;
        assert_eq!(stat.read(), 120 << 8);
    }
}
