//! Thumb-state decode and execute, mirroring the nested-`switch` decode
//! tree eggvance's `ARM7::decode()` uses for its 16-bit half of the ISA,
//! generalized into a `match` over the same bit groups.

use crate::bus::{Access, Bus};

use super::shifter::{shift, ShiftKind};
use super::Cpu;

fn bit(word: u16, n: u16) -> bool {
    word & (1 << n) != 0
}

fn bits(word: u16, hi: u16, lo: u16) -> u16 {
    (word >> lo) & ((1 << (hi - lo + 1)) - 1)
}

fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    ((value << shift) as i32 >> shift) as u32
}

pub(super) fn execute(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    match bits(word, 15, 13) {
        0b000 => {
            if bits(word, 12, 11) == 0b11 {
                add_subtract(cpu, word);
            } else {
                move_shifted_register(cpu, word);
            }
        }
        0b001 => move_compare_add_sub_immediate(cpu, word),
        0b010 => match bits(word, 12, 10) {
            0b000 => alu_operations(cpu, bus, word),
            0b001 => hi_register_ops_bx(cpu, bus, word),
            0b010 | 0b011 => pc_relative_load(cpu, bus, word),
            _ => {
                if bit(word, 9) {
                    load_store_sign_extended(cpu, bus, word);
                } else {
                    load_store_register_offset(cpu, bus, word);
                }
            }
        },
        0b011 => load_store_immediate_offset(cpu, bus, word),
        0b100 => {
            // Format 10 (load/store halfword, top nibble 1000) and format
            // 11 (SP-relative load/store, top nibble 1001) share this
            // top-3-bit group; bit12 is the format selector here, bit11
            // is each format's own L flag, not a dispatch bit.
            if !bit(word, 12) {
                load_store_halfword(cpu, bus, word);
            } else {
                sp_relative_load_store(cpu, bus, word);
            }
        }
        0b101 => {
            // Format 12 (load address, nibble 1010) vs formats 13/14
            // (add-offset-to-SP / push-pop, both nibble 1011); again
            // bit12 selects the format, not bits(12,11).
            if !bit(word, 12) {
                load_address(cpu, word);
            } else if bit(word, 10) {
                push_pop_registers(cpu, bus, word);
            } else {
                add_offset_to_sp(cpu, word);
            }
        }
        0b110 => {
            // Format 15 (multiple load/store, nibble 1100) vs formats
            // 16/17 (conditional branch / SWI, nibble 1101); bit12 again
            // is the format selector, not bits(12,11).
            if !bit(word, 12) {
                multiple_load_store(cpu, bus, word);
            } else if bits(word, 11, 8) == 0b1111 {
                cpu.enter_swi();
            } else {
                conditional_branch(cpu, word);
            }
        }
        _ => match bits(word, 12, 11) {
            0b00 => unconditional_branch(cpu, word),
            _ => long_branch_with_link(cpu, word),
        },
    }
}

fn move_shifted_register(cpu: &mut Cpu, word: u16) {
    let op = bits(word, 12, 11);
    let offset = u32::from(bits(word, 10, 6));
    let rs = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let carry_in = cpu.cpsr().c;

    let (result, carry) = match op {
        0 => {
            if offset == 0 {
                (rs, carry_in)
            } else {
                shift(ShiftKind::Lsl, rs, offset, carry_in)
            }
        }
        1 => shift(ShiftKind::Lsr, rs, if offset == 0 { 32 } else { offset }, carry_in),
        _ => shift(ShiftKind::Asr, rs, if offset == 0 { 32 } else { offset }, carry_in),
    };
    cpu.set_reg(rd, result);
    cpu.set_nz(result);
    cpu.set_flags_nzcv(result & 0x8000_0000 != 0, result == 0, carry, cpu.cpsr().v);
}

fn add_with_carry(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    let (r1, c1) = a.overflowing_add(b);
    let (r2, c2) = r1.overflowing_add(carry_in);
    let carry = c1 | c2;
    let overflow = ((a ^ r2) & (b ^ r2) & 0x8000_0000) != 0;
    (r2, carry, overflow)
}

fn add_subtract(cpu: &mut Cpu, word: u16) {
    let immediate = bit(word, 10);
    let subtract = bit(word, 9);
    let operand = u32::from(bits(word, 8, 6));
    let rs = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let rhs = if immediate { operand } else { cpu.reg(operand) };

    let (result, carry, overflow) = if subtract { add_with_carry(rs, !rhs, 1) } else { add_with_carry(rs, rhs, 0) };
    cpu.set_reg(rd, result);
    cpu.set_flags_nzcv(result & 0x8000_0000 != 0, result == 0, carry, overflow);
}

fn move_compare_add_sub_immediate(cpu: &mut Cpu, word: u16) {
    let op = bits(word, 12, 11);
    let rd = u32::from(bits(word, 10, 8));
    let imm = u32::from(bits(word, 7, 0));
    let rd_val = cpu.reg(rd);

    match op {
        0 => {
            cpu.set_reg(rd, imm);
            cpu.set_nz(imm);
        }
        1 => {
            let (r, c, v) = add_with_carry(rd_val, !imm, 1);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        2 => {
            let (r, c, v) = add_with_carry(rd_val, imm, 0);
            cpu.set_reg(rd, r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        _ => {
            let (r, c, v) = add_with_carry(rd_val, !imm, 1);
            cpu.set_reg(rd, r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
    }
}

fn alu_operations(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let op = bits(word, 9, 6);
    let rs = u32::from(bits(word, 5, 3));
    let rd = u32::from(bits(word, 2, 0));
    let rs_val = cpu.reg(rs);
    let rd_val = cpu.reg(rd);
    let carry_in = cpu.cpsr().c;

    match op {
        0x0 => {
            let r = rd_val & rs_val;
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
        0x1 => {
            let r = rd_val ^ rs_val;
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
        0x2 => {
            let amount = rs_val & 0xFF;
            let (r, c) = if amount == 0 { (rd_val, carry_in) } else { shift(ShiftKind::Lsl, rd_val, amount, carry_in) };
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, cpu.cpsr().v);
            bus.internal_cycles(1);
        }
        0x3 => {
            let amount = rs_val & 0xFF;
            let (r, c) = if amount == 0 { (rd_val, carry_in) } else { shift(ShiftKind::Lsr, rd_val, amount, carry_in) };
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, cpu.cpsr().v);
            bus.internal_cycles(1);
        }
        0x4 => {
            let amount = rs_val & 0xFF;
            let (r, c) = if amount == 0 { (rd_val, carry_in) } else { shift(ShiftKind::Asr, rd_val, amount, carry_in) };
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, cpu.cpsr().v);
            bus.internal_cycles(1);
        }
        0x5 => {
            let (r, c, v) = add_with_carry(rd_val, rs_val, carry_in as u32);
            cpu.set_reg(rd, r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        0x6 => {
            let (r, c, v) = add_with_carry(rd_val, !rs_val, carry_in as u32);
            cpu.set_reg(rd, r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        0x7 => {
            let amount = rs_val & 0xFF;
            let (r, c) = if amount == 0 { (rd_val, carry_in) } else { shift(ShiftKind::Ror, rd_val, amount, carry_in) };
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, cpu.cpsr().v);
            bus.internal_cycles(1);
        }
        0x8 => {
            let r = rd_val & rs_val;
            cpu.set_nz(r);
        }
        0x9 => {
            let (r, c, v) = add_with_carry(0, !rs_val, 1);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        0xA => {
            let (r, c, v) = add_with_carry(rd_val, !rs_val, 1);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        0xB => {
            let (r, c, v) = add_with_carry(rd_val, rs_val, 0);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        0xC => {
            let r = rd_val | rs_val;
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
        0xD => {
            bus.internal_cycles(1);
            let r = rd_val.wrapping_mul(rs_val);
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
        0xE => {
            let r = rd_val & !rs_val;
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
        _ => {
            let r = !rs_val;
            cpu.set_reg(rd, r);
            cpu.set_nz(r);
        }
    }
}

fn hi_register_ops_bx(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let op = bits(word, 9, 8);
    let h1 = bit(word, 7);
    let h2 = bit(word, 6);
    let rs = u32::from(bits(word, 5, 3)) + if h2 { 8 } else { 0 };
    let rd = u32::from(bits(word, 2, 0)) + if h1 { 8 } else { 0 };
    let rs_val = cpu.reg_or_pc(bus, rs);

    match op {
        0 => {
            let r = cpu.reg_or_pc(bus, rd).wrapping_add(rs_val);
            cpu.set_reg(rd, r);
        }
        1 => {
            let (r, c, v) = add_with_carry(cpu.reg_or_pc(bus, rd), !rs_val, 1);
            cpu.set_flags_nzcv(r & 0x8000_0000 != 0, r == 0, c, v);
        }
        2 => cpu.set_reg(rd, rs_val),
        _ => cpu.branch_exchange(rs_val),
    }
}

fn pc_relative_load(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let rd = u32::from(bits(word, 10, 8));
    let imm = u32::from(bits(word, 7, 0)) * 4;
    let base = (cpu.pc_operand() & !3).wrapping_add(imm);
    let value = bus.read32(base, Access::NonSequential);
    cpu.set_reg(rd, value);
    bus.internal_cycles(1);
}

fn load_store_register_offset(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let load = bit(word, 11);
    let byte = bit(word, 10);
    let ro = cpu.reg(u32::from(bits(word, 8, 6)));
    let rb = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let addr = rb.wrapping_add(ro);

    if load {
        let value = if byte { bus.read8(addr, Access::NonSequential) as u32 } else { bus.read32(addr, Access::NonSequential) };
        cpu.set_reg(rd, value);
        bus.internal_cycles(1);
    } else {
        let value = cpu.reg(rd);
        if byte {
            bus.write8(addr, value as u8, Access::NonSequential);
        } else {
            bus.write32(addr, value, Access::NonSequential);
        }
    }
}

/// Format 8: STRH / LDRH / LDSB / LDSH, selected by `(S, H)`. A misaligned
/// LDSH degrades to a sign-extended byte load, mirroring ARM-state LDRSH's
/// documented quirk (`Cpu::enter_exception` isn't involved -- this is a
/// data quirk, not a trap).
fn load_store_sign_extended(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let h = bit(word, 11);
    let sign_extend_bit = bit(word, 10);
    let ro = cpu.reg(u32::from(bits(word, 8, 6)));
    let rb = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let addr = rb.wrapping_add(ro);

    match (sign_extend_bit, h) {
        (false, false) => {
            bus.write16(addr, cpu.reg(rd) as u16, Access::NonSequential);
        }
        (false, true) => {
            let value = u32::from(bus.read16(addr, Access::NonSequential));
            cpu.set_reg(rd, value);
            bus.internal_cycles(1);
        }
        (true, false) => {
            let value = bus.read8(addr, Access::NonSequential) as i8 as i32 as u32;
            cpu.set_reg(rd, value);
            bus.internal_cycles(1);
        }
        (true, true) => {
            let value = if addr & 1 != 0 {
                bus.read8(addr, Access::NonSequential) as i8 as i32 as u32
            } else {
                bus.read16(addr, Access::NonSequential) as i16 as i32 as u32
            };
            cpu.set_reg(rd, value);
            bus.internal_cycles(1);
        }
    }
}

fn load_store_immediate_offset(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let byte = bit(word, 12);
    let load = bit(word, 11);
    let offset5 = u32::from(bits(word, 10, 6));
    let rb = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let offset = if byte { offset5 } else { offset5 * 4 };
    let addr = rb.wrapping_add(offset);

    if load {
        let value = if byte { bus.read8(addr, Access::NonSequential) as u32 } else { bus.read32(addr, Access::NonSequential) };
        cpu.set_reg(rd, value);
        bus.internal_cycles(1);
    } else {
        let value = cpu.reg(rd);
        if byte {
            bus.write8(addr, value as u8, Access::NonSequential);
        } else {
            bus.write32(addr, value, Access::NonSequential);
        }
    }
}

fn load_store_halfword(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let load = bit(word, 11);
    let offset5 = u32::from(bits(word, 10, 6));
    let rb = cpu.reg(u32::from(bits(word, 5, 3)));
    let rd = u32::from(bits(word, 2, 0));
    let addr = rb.wrapping_add(offset5 * 2);

    if load {
        let value = u32::from(bus.read16(addr, Access::NonSequential));
        cpu.set_reg(rd, value);
        bus.internal_cycles(1);
    } else {
        bus.write16(addr, cpu.reg(rd) as u16, Access::NonSequential);
    }
}

fn sp_relative_load_store(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let load = bit(word, 11);
    let rd = u32::from(bits(word, 10, 8));
    let imm = u32::from(bits(word, 7, 0)) * 4;
    let addr = cpu.reg(13).wrapping_add(imm);

    if load {
        let value = bus.read32(addr, Access::NonSequential);
        cpu.set_reg(rd, value);
        bus.internal_cycles(1);
    } else {
        bus.write32(addr, cpu.reg(rd), Access::NonSequential);
    }
}

fn load_address(cpu: &mut Cpu, word: u16) {
    let from_sp = bit(word, 11);
    let rd = u32::from(bits(word, 10, 8));
    let imm = u32::from(bits(word, 7, 0)) * 4;
    // The PC-relative form clears bit 1 of the pipeline-ahead PC value
    // before adding the offset, per the documented word-alignment rule.
    let base = if from_sp { cpu.reg(13) } else { cpu.pc_operand() & !2 };
    cpu.set_reg(rd, base.wrapping_add(imm));
}

fn add_offset_to_sp(cpu: &mut Cpu, word: u16) {
    let negative = bit(word, 7);
    let imm = u32::from(bits(word, 6, 0)) * 4;
    let sp = cpu.reg(13);
    cpu.set_reg(13, if negative { sp.wrapping_sub(imm) } else { sp.wrapping_add(imm) });
}

fn push_pop_registers(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let pop = bit(word, 11);
    let store_lr_or_load_pc = bit(word, 8);
    let rlist = bits(word, 7, 0);
    let mut sp = cpu.reg(13);

    if pop {
        let mut first = true;
        for i in 0..8u16 {
            if bit(rlist, i) {
                let access = if first { Access::NonSequential } else { Access::Sequential };
                first = false;
                let value = bus.read32(sp, access);
                cpu.set_reg(u32::from(i), value);
                sp = sp.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            let access = if first { Access::NonSequential } else { Access::Sequential };
            let value = bus.read32(sp, access);
            sp = sp.wrapping_add(4);
            cpu.set_reg(13, sp);
            cpu.branch_to(value & !1);
            bus.internal_cycles(1);
            return;
        }
        cpu.set_reg(13, sp);
        bus.internal_cycles(1);
    } else {
        let count = u32::from(rlist.count_ones()) + u32::from(store_lr_or_load_pc);
        let start = sp.wrapping_sub(count * 4);
        cpu.set_reg(13, start);
        let mut addr = start;
        let mut first = true;
        for i in 0..8u16 {
            if bit(rlist, i) {
                let access = if first { Access::NonSequential } else { Access::Sequential };
                first = false;
                bus.write32(addr, cpu.reg(u32::from(i)), access);
                addr = addr.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            let access = if first { Access::NonSequential } else { Access::Sequential };
            bus.write32(addr, cpu.reg(14), access);
        }
    }
}

fn multiple_load_store(cpu: &mut Cpu, bus: &mut Bus, word: u16) {
    let load = bit(word, 11);
    let rb_idx = u32::from(bits(word, 10, 8));
    let rlist = bits(word, 7, 0);
    let mut addr = cpu.reg(rb_idx);

    if rlist == 0 {
        // Documented ARM7TDMI edge case: an empty list transfers r15
        // only, and the base still steps by the full 0x40 (16 words).
        let access = Access::NonSequential;
        if load {
            let value = bus.read32(addr, access);
            cpu.branch_to(value & !1);
        } else {
            bus.write32(addr, cpu.pc_operand(), access);
        }
        cpu.set_reg(rb_idx, addr.wrapping_add(0x40));
        bus.internal_cycles(1);
        return;
    }

    let mut first = true;
    for i in 0..8u16 {
        if bit(rlist, i) {
            let access = if first { Access::NonSequential } else { Access::Sequential };
            first = false;
            if load {
                let value = bus.read32(addr, access);
                cpu.set_reg(u32::from(i), value);
            } else {
                bus.write32(addr, cpu.reg(u32::from(i)), access);
            }
            addr = addr.wrapping_add(4);
        }
    }
    // Writeback is skipped only when Rb was itself in the load list (the
    // loaded value wins), matching ARM-state LDM's base-in-list rule.
    if !(load && bit(rlist, rb_idx as u16)) {
        cpu.set_reg(rb_idx, addr);
    }
    bus.internal_cycles(1);
}

fn conditional_branch(cpu: &mut Cpu, word: u16) {
    let cond = u32::from(bits(word, 11, 8));
    let offset8 = u32::from(bits(word, 7, 0));
    if !cpu.condition_passed(cond) {
        return;
    }
    let signed = (sign_extend(offset8, 8) as i32) * 2;
    let target = (cpu.pc_operand() as i32).wrapping_add(signed) as u32;
    cpu.branch_to(target);
}

fn unconditional_branch(cpu: &mut Cpu, word: u16) {
    let offset11 = u32::from(bits(word, 10, 0));
    let signed = (sign_extend(offset11, 11) as i32) * 2;
    let target = (cpu.pc_operand() as i32).wrapping_add(signed) as u32;
    cpu.branch_to(target);
}

/// Format 19: `BL` split across two 16-bit halves. The first half stashes
/// `PC + (sign-extended hi-offset << 12)` into LR; the second computes the
/// final target from `LR + (lo-offset << 1)` and leaves the return address
/// (the instruction after this one) in LR.
fn long_branch_with_link(cpu: &mut Cpu, word: u16) {
    let second_half = bit(word, 11);
    let offset11 = u32::from(bits(word, 10, 0));

    if !second_half {
        let hi = sign_extend(offset11, 11) as i32;
        let lr = (cpu.pc_operand() as i32).wrapping_add(hi << 12) as u32;
        cpu.set_reg(14, lr);
    } else {
        let return_addr = cpu.pc_operand().wrapping_sub(2) | 1;
        let target = cpu.reg(14).wrapping_add(offset11 << 1);
        cpu.set_reg(14, return_addr);
        cpu.branch_to(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::GamePak;
    use crate::config::CoreConfig;

    fn make_bus() -> Bus {
        let cfg = CoreConfig::default();
        let cart = GamePak::new(&[0u8; 0x1000], &cfg, None).unwrap();
        Bus::new(cart, &cfg)
    }

    #[test]
    fn push_pop_round_trips_registers_through_the_stack() {
        let mut cpu = Cpu::new();
        let mut bus = make_bus();
        cpu.set_reg(13, 0x0300_7F00);
        cpu.set_reg(0, 0x1111_1111);
        cpu.set_reg(1, 0x2222_2222);
        // PUSH {R0, R1}: 1011 0 10 0 0000_0011
        execute(&mut cpu, &mut bus, 0b1011_0_10_0_0000_0011);
        cpu.set_reg(0, 0);
        cpu.set_reg(1, 0);
        // POP {R0, R1}: 1011 1 10 0 0000_0011
        execute(&mut cpu, &mut bus, 0b1011_1_10_0_0000_0011);
        assert_eq!(cpu.reg(0), 0x1111_1111);
        assert_eq!(cpu.reg(1), 0x2222_2222);
        assert_eq!(cpu.reg(13), 0x0300_7F00);
    }

    #[test]
    fn load_store_halfword_dispatches_by_bit12_not_bit11() {
        let mut cpu = Cpu::new();
        let mut bus = make_bus();
        cpu.set_reg(0, 0x0300_0000);
        cpu.set_reg(1, 0xABCD);
        // STRH R1, [R0, #0]: 1000 0 00000 000 001 (format10, L=0)
        execute(&mut cpu, &mut bus, 0b1000_0_00000_000_001);
        cpu.set_reg(2, 0);
        // LDRH R2, [R0, #0]: 1000 1 00000 000 010 (format10, L=1)
        execute(&mut cpu, &mut bus, 0b1000_1_00000_000_010);
        assert_eq!(cpu.reg(2), 0xABCD);
    }

    #[test]
    fn bl_pair_sets_lr_and_branches() {
        let mut cpu = Cpu::new();
        let mut bus = make_bus();
        cpu.set_reg(15, 0x0800_0000);
        // High half: BL with offset 0.
        execute(&mut cpu, &mut bus, 0b1111_0_0000000000);
        let lr_after_first = cpu.reg(14);
        assert_eq!(lr_after_first, 0x0800_0004);
        // Low half: offset 1 (word-pair, shifted left 1 -> +2).
        execute(&mut cpu, &mut bus, 0b1111_1_0000000001);
        assert_eq!(cpu.reg(15), lr_after_first + 2);
        assert!(cpu.reg(14) & 1 == 1);
    }

    #[test]
    fn conditional_branch_skips_when_condition_fails() {
        let mut cpu = Cpu::new();
        cpu.set_reg(15, 0x0800_0000);
        cpu.set_flags_nzcv(false, false, false, false);
        // BEQ with Z=0 must not branch.
        conditional_branch(&mut cpu, 0b1101_0000_00000010);
        assert_eq!(cpu.reg(15), 0x0800_0000);
    }
}
