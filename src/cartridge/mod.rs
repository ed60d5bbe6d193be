pub(crate) mod save;

use crate::error::CoreError;
use crate::info::*;
use crate::log;
use save::{make_backend, SaveBackend, SaveKind};

/// The cartridge: fixed ROM image mapped across three wait-state mirrors,
/// plus its save backend. Read/write dispatch mirrors the teacher's
/// `Cartidge::read`/`write` bank-relative addressing, generalized from
/// MBC bank registers to GBA's flat 32 MiB address space (no banking,
/// wait-states substitute for the teacher's bank-switch logic).
pub struct GamePak {
    rom: Box<[u8]>,
    title: [u8; 12],
    game_code: [u8; 4],
    save: Box<dyn SaveBackend>,
    save_kind: SaveKind,
}

impl GamePak {
    pub fn new(rom: &[u8], config: &crate::config::CoreConfig, save_image: Option<Vec<u8>>) -> Result<Self, CoreError> {
        if rom.is_empty() || rom.len() > SIZE_ROM_MAX {
            return Err(CoreError::InvalidRomSize);
        }
        if rom.len() % 0x4000 != 0 {
            log::warn("cartridge: ROM size is not a multiple of 16 KiB");
        }

        let mut title = [0u8; 12];
        let mut game_code = [0u8; 4];
        if rom.len() as u32 > *CART_TITLE.end() {
            title.copy_from_slice(&rom[*CART_TITLE.start() as usize..=*CART_TITLE.end() as usize]);
            game_code.copy_from_slice(&rom[*CART_GAME_CODE.start() as usize..=*CART_GAME_CODE.end() as usize]);
        }

        let kind = config
            .rom_overrides
            .iter()
            .find(|o| o.game_code == game_code)
            .and_then(|o| o.save_kind)
            .or(config.save_override)
            .or_else(|| detect_save_kind(rom))
            .unwrap_or(SaveKind::None);

        if let Some(image) = &save_image {
            if kind != SaveKind::None && image.len() != kind.image_size() {
                return Err(CoreError::SaveFileCorrupted);
            }
        }

        Ok(Self {
            rom: rom.to_vec().into_boxed_slice(),
            title,
            game_code,
            save: make_backend(kind, save_image),
            save_kind: kind,
        })
    }

    pub fn title(&self) -> &[u8; 12] {
        &self.title
    }

    pub fn game_code(&self) -> &[u8; 4] {
        &self.game_code
    }

    pub fn save_kind(&self) -> SaveKind {
        self.save_kind
    }

    pub fn is_save_dirty(&self) -> bool {
        self.save.is_dirty()
    }

    pub fn take_save_image(&mut self) -> Vec<u8> {
        self.save.take_image()
    }

    /// Reads a half-word from the ROM region, honoring the open-bus rule
    /// for addresses past the end of a short ROM.
    pub(crate) fn read_rom16(&self, rom_addr: u32) -> u16 {
        let idx = rom_addr as usize;
        if idx + 1 < self.rom.len() {
            u16::from_le_bytes([self.rom[idx], self.rom[idx + 1]])
        } else {
            (rom_addr >> 1) as u16
        }
    }

    pub(crate) fn read_rom8(&self, rom_addr: u32) -> u8 {
        self.rom.get(rom_addr as usize).copied().unwrap_or_else(|| (rom_addr >> 1) as u8)
    }

    pub(crate) fn read_save8(&self, addr: u32) -> u8 {
        self.save.read(addr)
    }

    pub(crate) fn write_save8(&mut self, addr: u32, val: u8) {
        self.save.write(addr, val);
    }

    pub(crate) fn eeprom_serial_read(&mut self) -> u8 {
        self.save.serial_read()
    }

    pub(crate) fn eeprom_serial_write(&mut self, bit: u8) {
        self.save.serial_write(bit);
    }

    pub(crate) fn eeprom_set_addr_bits(&mut self, bits: u32) {
        self.save.set_addr_bits(bits);
    }

    pub(crate) fn rom_len(&self) -> usize {
        self.rom.len()
    }
}

fn detect_save_kind(rom: &[u8]) -> Option<SaveKind> {
    for (sig, _) in SAVE_SIGNATURES {
        if rom.windows(sig.len()).any(|w| w == *sig) {
            return Some(match *sig {
                b"SRAM_V" | b"SRAM_F_V" => SaveKind::Sram,
                b"EEPROM_V" => SaveKind::Eeprom8k,
                b"FLASH_V" | b"FLASH512_V" => SaveKind::Flash64k,
                b"FLASH1M_V" => SaveKind::Flash128k,
                _ => unreachable!(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;

    fn make_rom(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn rejects_empty_rom() {
        let cfg = CoreConfig::default();
        assert!(GamePak::new(&[], &cfg, None).is_err());
    }

    #[test]
    fn detects_sram_signature() {
        let mut rom = make_rom(0x10000);
        rom[0x5000..0x5006].copy_from_slice(b"SRAM_V");
        let cfg = CoreConfig::default();
        let pak = GamePak::new(&rom, &cfg, None).unwrap();
        assert_eq!(pak.save_kind(), SaveKind::Sram);
    }

    #[test]
    fn no_signature_means_no_save() {
        let rom = make_rom(0x10000);
        let cfg = CoreConfig::default();
        let pak = GamePak::new(&rom, &cfg, None).unwrap();
        assert_eq!(pak.save_kind(), SaveKind::None);
    }
}
