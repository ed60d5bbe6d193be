//! Final per-pixel compositing: priority ordering, window masking and
//! alpha/brightness blending, in that order, matching how real hardware
//! derives the two blend target layers before mixing.

use crate::info::SCREEN_WIDTH;
use crate::ppu::bg::BgLine;
use crate::ppu::color;
use crate::ppu::obj::ObjPixel;
use crate::ppu::regs::BlendMode;

#[derive(Clone, Copy)]
pub(crate) struct LayerMask {
    pub(crate) bg: [bool; 4],
    pub(crate) obj: bool,
    pub(crate) blend: bool,
}

impl LayerMask {
    pub(crate) const fn all() -> Self {
        Self {
            bg: [true; 4],
            obj: true,
            blend: true,
        }
    }
}

/// Which window (if any) a pixel falls inside, in priority order
/// win0 > win1 > obj-window > outside.
#[derive(Clone, Copy)]
pub(crate) struct WindowMasks<'a> {
    pub(crate) win0: Option<&'a [bool; SCREEN_WIDTH]>,
    pub(crate) win1: Option<&'a [bool; SCREEN_WIDTH]>,
    pub(crate) win0_layers: LayerMask,
    pub(crate) win1_layers: LayerMask,
    pub(crate) obj_win_layers: LayerMask,
    pub(crate) outside_layers: LayerMask,
    pub(crate) any_window_enabled: bool,
}

fn layers_for(masks: &WindowMasks, x: usize, obj_window: bool) -> LayerMask {
    if !masks.any_window_enabled {
        return LayerMask::all();
    }
    if masks.win0.map(|w| w[x]).unwrap_or(false) {
        masks.win0_layers
    } else if masks.win1.map(|w| w[x]).unwrap_or(false) {
        masks.win1_layers
    } else if obj_window {
        masks.obj_win_layers
    } else {
        masks.outside_layers
    }
}

struct Candidate {
    priority: u8,
    /// BG index 0..3, or 4 for objects; used only to break BG ties
    /// (BG0 < BG1 < BG2 < BG3) since objects are inserted above any
    /// same-priority BG already.
    layer: u8,
    color: u16,
    is_obj: bool,
    semi_transparent: bool,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn compose_scanline(
    bgs: &[Option<(BgLine, u8)>; 4],
    objs: &[ObjPixel; SCREEN_WIDTH],
    windows: &WindowMasks,
    bld_mode: BlendMode,
    bld_target1: LayerMask,
    bld_target2: LayerMask,
    eva: u8,
    evb: u8,
    evy: u8,
    backdrop: u16,
    color_correction: bool,
    out: &mut [u32; SCREEN_WIDTH],
) {
    let to_argb = if color_correction {
        color::bgr555_to_argb_corrected
    } else {
        color::bgr555_to_argb
    };

    for x in 0..SCREEN_WIDTH {
        let active = layers_for(windows, x, objs[x].window);
        let mut candidates: [Option<Candidate>; 5] = [None, None, None, None, None];

        if active.obj {
            if let Some(c) = objs[x].color {
                candidates[4] = Some(Candidate {
                    priority: objs[x].priority,
                    layer: 4,
                    color: c,
                    is_obj: true,
                    semi_transparent: objs[x].semi_transparent,
                });
            }
        }
        for (i, bg) in bgs.iter().enumerate() {
            if !active.bg[i] {
                continue;
            }
            if let Some((line, priority)) = bg {
                if let Some(c) = line[x] {
                    candidates[i] = Some(Candidate {
                        priority: *priority,
                        layer: i as u8,
                        color: c,
                        is_obj: false,
                        semi_transparent: false,
                    });
                }
            }
        }

        // Lowest (priority, layer) wins; objects tie-break above BGs of
        // the same numeric priority since they're evaluated first and
        // `<` is strict.
        let mut ordered: Vec<&Candidate> = candidates.iter().flatten().collect();
        ordered.sort_by_key(|c| (c.priority, if c.is_obj { 0 } else { 1 }, c.layer));

        let top = ordered.first();
        let second = ordered.get(1);

        let top_color = top.map(|c| c.color).unwrap_or(backdrop);
        let top_is_target1 = top.map(|c| is_in_mask(c, &bld_target1)).unwrap_or(bld_target1.blend);
        let top_semi = top.map(|c| c.semi_transparent).unwrap_or(false);

        let final_color = if top_semi {
            let Some(second) = second else {
                out[x] = to_argb(top_color);
                continue;
            };
            blend_alpha(top_color, second.color, eva, evb)
        } else if active.blend && top_is_target1 {
            match bld_mode {
                BlendMode::None => top_color,
                BlendMode::Alpha => {
                    if let Some(second) = second {
                        if is_in_mask(second, &bld_target2) {
                            blend_alpha(top_color, second.color, eva, evb)
                        } else {
                            top_color
                        }
                    } else if bld_target2.blend {
                        blend_alpha(top_color, backdrop, eva, evb)
                    } else {
                        top_color
                    }
                }
                BlendMode::Brighten => blend_fade(top_color, evy, true),
                BlendMode::Darken => blend_fade(top_color, evy, false),
            }
        } else {
            top_color
        };

        out[x] = to_argb(final_color);
    }
}

fn is_in_mask(c: &Candidate, mask: &LayerMask) -> bool {
    if c.is_obj {
        mask.obj
    } else {
        mask.bg[c.layer as usize]
    }
}

fn channel(color: u16, shift: u32) -> i32 {
    ((color >> shift) & 0x1F) as i32
}

fn blend_alpha(a: u16, b: u16, eva: u8, evb: u8) -> u16 {
    let mix = |shift: u32| {
        let ca = channel(a, shift);
        let cb = channel(b, shift);
        (((ca * eva as i32 + cb * evb as i32) >> 4).min(31)) as u16
    };
    mix(0) | (mix(5) << 5) | (mix(10) << 10)
}

fn blend_fade(color: u16, evy: u8, brighten: bool) -> u16 {
    let mix = |shift: u32| {
        let c = channel(color, shift);
        let target = if brighten { 31 } else { 0 };
        (c + (((target - c) * evy as i32) >> 4)).clamp(0, 31) as u16
    };
    mix(0) | (mix(5) << 5) | (mix(10) << 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppu::obj::ObjPixel;

    fn windows_disabled() -> WindowMasks<'static> {
        WindowMasks {
            win0: None,
            win1: None,
            win0_layers: LayerMask::all(),
            win1_layers: LayerMask::all(),
            obj_win_layers: LayerMask::all(),
            outside_layers: LayerMask::all(),
            any_window_enabled: false,
        }
    }

    fn one_bg_line(color: u16) -> BgLine {
        let mut line = [None; SCREEN_WIDTH];
        line[0] = Some(color);
        line
    }

    #[test]
    fn higher_priority_bg_wins_over_lower_priority_bg() {
        let bgs = [Some((one_bg_line(0x1234), 0)), Some((one_bg_line(0x4321), 2)), None, None];
        let objs = [ObjPixel::default(); SCREEN_WIDTH];
        let windows = windows_disabled();
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::None, LayerMask::all(), LayerMask::all(), 0, 0, 0, 0, false, &mut out,
        );
        assert_eq!(out[0], color::bgr555_to_argb(0x1234));
    }

    #[test]
    fn equal_priority_ties_break_by_bg_index_low_wins() {
        let bgs = [Some((one_bg_line(0xAAAA), 1)), Some((one_bg_line(0xBBBB), 1)), None, None];
        let objs = [ObjPixel::default(); SCREEN_WIDTH];
        let windows = windows_disabled();
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::None, LayerMask::all(), LayerMask::all(), 0, 0, 0, 0, false, &mut out,
        );
        assert_eq!(out[0], color::bgr555_to_argb(0xAAAA));
    }

    #[test]
    fn object_beats_bg_of_equal_numeric_priority() {
        let bgs = [Some((one_bg_line(0x1111), 1)), None, None, None];
        let mut objs = [ObjPixel::default(); SCREEN_WIDTH];
        objs[0] = ObjPixel { color: Some(0x2222), priority: 1, semi_transparent: false, window: false };
        let windows = windows_disabled();
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::None, LayerMask::all(), LayerMask::all(), 0, 0, 0, 0, false, &mut out,
        );
        assert_eq!(out[0], color::bgr555_to_argb(0x2222));
    }

    #[test]
    fn window_outside_can_hide_a_background_layer() {
        let bgs = [Some((one_bg_line(0x1234), 0)), None, None, None];
        let objs = [ObjPixel::default(); SCREEN_WIDTH];
        let win0 = [false; SCREEN_WIDTH]; // pixel 0 is outside win0
        let mut outside_layers = LayerMask::all();
        outside_layers.bg[0] = false;
        let windows = WindowMasks {
            win0: Some(&win0),
            win1: None,
            win0_layers: LayerMask::all(),
            win1_layers: LayerMask::all(),
            obj_win_layers: LayerMask::all(),
            outside_layers,
            any_window_enabled: true,
        };
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::None, LayerMask::all(), LayerMask::all(), 0, 0, 0, 0x7FFF, false,
            &mut out,
        );
        assert_eq!(out[0], color::bgr555_to_argb(0x7FFF));
    }

    #[test]
    fn alpha_blend_mixes_first_and_second_target_colors() {
        // Pure red BG0 over pure blue BG1, 50/50 blend (eva=evb=8, /16).
        let bgs = [Some((one_bg_line(0x001F), 0)), Some((one_bg_line(0x7C00), 1)), None, None];
        let objs = [ObjPixel::default(); SCREEN_WIDTH];
        let windows = windows_disabled();
        let mut target1 = LayerMask::all();
        target1.bg = [true, false, false, false];
        target1.obj = false;
        let mut target2 = LayerMask::all();
        target2.bg = [false, true, false, false];
        target2.obj = false;
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::Alpha, target1, target2, 8, 8, 0, 0, false, &mut out,
        );
        let expected = blend_alpha(0x001F, 0x7C00, 8, 8);
        assert_eq!(out[0], color::bgr555_to_argb(expected));
    }

    #[test]
    fn alpha_blend_object_always_blends_regardless_of_bldcnt_target() {
        // An alpha-blend OBJ must still mix with the layer beneath it even
        // when BLDCNT's first-target flags don't name OBJ.
        let bgs = [Some((one_bg_line(0x7C00), 0)), None, None, None];
        let mut objs = [ObjPixel::default(); SCREEN_WIDTH];
        objs[0] = ObjPixel { color: Some(0x001F), priority: 0, semi_transparent: true, window: false };
        let windows = windows_disabled();
        let mut target1 = LayerMask::all();
        target1.obj = false; // OBJ deliberately excluded from BLDCNT's first-target set
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::None, target1, LayerMask::all(), 8, 8, 0, 0, false, &mut out,
        );
        let expected = blend_alpha(0x001F, 0x7C00, 8, 8);
        assert_eq!(out[0], color::bgr555_to_argb(expected));
    }

    #[test]
    fn darken_fades_toward_black() {
        let bgs = [Some((one_bg_line(0x7FFF), 0)), None, None, None];
        let objs = [ObjPixel::default(); SCREEN_WIDTH];
        let windows = windows_disabled();
        let mut out = [0u32; SCREEN_WIDTH];
        compose_scanline(
            &bgs, &objs, &windows, BlendMode::Darken, LayerMask::all(), LayerMask::all(), 0, 0, 16, 0, false,
            &mut out,
        );
        assert_eq!(out[0], color::bgr555_to_argb(0));
    }
}
