use crate::cartridge::save::SaveKind;

/// Startup configuration for [`crate::gba::Gba`].
///
/// No config-parsing crate is introduced here: like the teacher, which
/// takes its handful of options from CLI flags only, the core itself
/// just takes a plain struct. Parsing `CoreConfig` out of a file or CLI
/// is the front-end's job (out of scope, see spec §1).
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Skip BIOS boot animation: seed registers/memory as documented in
    /// spec §6 and jump straight to the cartridge entry point.
    pub bios_skip: bool,
    /// Force a save backend instead of auto-detecting one from the ROM's
    /// signature strings. Needed for carts whose signature is absent or
    /// misleading.
    pub save_override: Option<SaveKind>,
    /// Apply the LCD gamma/mixing correction curve when converting BGR555
    /// to ARGB (see spec §4.6 "Color space").
    pub lcd_color_correction: bool,
    /// Per-game-code overrides, consulted before signature auto-detection.
    pub rom_overrides: &'static [RomOverride],
}

/// Forces save/mirroring behavior for a cartridge identified by its
/// 4-byte game code (header offset 0xAC-0xAF), for games whose ROM
/// doesn't carry a recognizable signature.
#[derive(Debug, Clone, Copy)]
pub struct RomOverride {
    pub game_code: [u8; 4],
    pub save_kind: Option<SaveKind>,
}
