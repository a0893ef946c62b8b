//! Bus-cycle sequences of individual instructions.
//!
//! Each test loads a short program, steps a known number of instructions
//! and checks both the machine state and the exact cycles reported.

use raider_core::{BusCycle, CtrlFlags, FlatMemory};
use rstest::rstest;
use z80_reference::{CF, StepCycles, ZF, Z80};

const FETCH: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::MREQ).union(CtrlFlags::M1);
const READ: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::MREQ);
const WRITE: CtrlFlags = CtrlFlags::WR.union(CtrlFlags::MREQ);
const IO_IN: CtrlFlags = CtrlFlags::RD.union(CtrlFlags::IORQ);
const IO_OUT: CtrlFlags = CtrlFlags::WR.union(CtrlFlags::IORQ);

fn setup(program: &[u8]) -> (Z80, FlatMemory) {
    let mut mem = FlatMemory::new();
    mem.load(0x0000, program);
    (Z80::new(), mem)
}

fn kinds(cycles: &StepCycles) -> Vec<CtrlFlags> {
    cycles.as_slice().iter().map(|c| c.flags).collect()
}

#[rstest]
#[case::nop(&[0x00], vec![FETCH])]
#[case::ld_a_n(&[0x3E, 0x42], vec![FETCH, READ])]
#[case::ld_bc_nn(&[0x01, 0x34, 0x12], vec![FETCH, READ, READ])]
#[case::ld_hl_ind_n(&[0x36, 0x99], vec![FETCH, READ, WRITE])]
#[case::push_bc(&[0xC5], vec![FETCH, WRITE, WRITE])]
#[case::pop_bc(&[0xC1], vec![FETCH, READ, READ])]
#[case::call_nn(&[0xCD, 0x00, 0x10], vec![FETCH, READ, READ, WRITE, WRITE])]
#[case::out_n_a(&[0xD3, 0xFE], vec![FETCH, READ, IO_OUT])]
#[case::in_a_n(&[0xDB, 0xFE], vec![FETCH, READ, IO_IN])]
#[case::in_b_c(&[0xED, 0x40], vec![FETCH, FETCH, IO_IN])]
#[case::inc_hl_ind(&[0x34], vec![FETCH, READ, WRITE])]
#[case::ld_a_ix_d(&[0xDD, 0x7E, 0x05], vec![FETCH, FETCH, READ, READ])]
#[case::ld_ix_d_n(&[0xDD, 0x36, 0x02, 0x55], vec![FETCH, FETCH, READ, READ, WRITE])]
#[case::set_ix_d(&[0xDD, 0xCB, 0x01, 0xC6], vec![FETCH, FETCH, READ, READ, READ, WRITE])]
#[case::bit_iy_d(&[0xFD, 0xCB, 0x01, 0x46], vec![FETCH, FETCH, READ, READ, READ])]
#[case::ex_sp_hl(&[0xE3], vec![FETCH, READ, READ, WRITE, WRITE])]
#[case::ldi(&[0xED, 0xA0], vec![FETCH, FETCH, READ, WRITE])]
#[case::outi(&[0xED, 0xA3], vec![FETCH, FETCH, READ, IO_OUT])]
fn cycle_kinds(#[case] program: &[u8], #[case] expected: Vec<CtrlFlags>) {
    let (mut cpu, mut mem) = setup(program);
    let cycles = cpu.step(&mut mem);
    assert_eq!(kinds(&cycles), expected);
}

#[test]
fn opcode_fetch_reports_address_and_data() {
    let (mut cpu, mut mem) = setup(&[0x00, 0x3E, 0x42]);
    cpu.step(&mut mem);
    let cycles = cpu.step(&mut mem);
    assert_eq!(cycles.get(0), Some(BusCycle::new(0x0001, 0x3E, FETCH)));
    assert_eq!(cycles.get(1), Some(BusCycle::new(0x0002, 0x42, READ)));
    assert_eq!(cpu.registers().a, 0x42);
    assert_eq!(cpu.pc(), 0x0003);
}

#[test]
fn push_writes_high_byte_first() {
    // LD BC,0x1234; LD SP,0x8000; PUSH BC
    let (mut cpu, mut mem) = setup(&[0x01, 0x34, 0x12, 0x31, 0x00, 0x80, 0xC5]);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    let cycles = cpu.step(&mut mem);
    assert_eq!(cycles.get(1), Some(BusCycle::new(0x7FFF, 0x12, WRITE)));
    assert_eq!(cycles.get(2), Some(BusCycle::new(0x7FFE, 0x34, WRITE)));
    assert_eq!(cpu.registers().sp, 0x7FFE);
}

#[test]
fn io_cycles_drive_the_full_port_address() {
    // LD A,0x12; OUT (0x34),A; LD BC,0xABCD; OUT (C),A
    let (mut cpu, mut mem) = setup(&[0x3E, 0x12, 0xD3, 0x34, 0x01, 0xCD, 0xAB, 0xED, 0x79]);
    cpu.step(&mut mem);
    let out_n = cpu.step(&mut mem);
    assert_eq!(out_n.get(2), Some(BusCycle::new(0x1234, 0x12, IO_OUT)));
    cpu.step(&mut mem);
    let out_c = cpu.step(&mut mem);
    assert_eq!(out_c.get(2), Some(BusCycle::new(0xABCD, 0x12, IO_OUT)));
}

#[test]
fn halt_repeats_fetch_without_advancing() {
    let (mut cpu, mut mem) = setup(&[0x76]);
    cpu.step(&mut mem);
    assert!(cpu.is_halted());
    let pc = cpu.pc();
    for _ in 0..3 {
        let cycles = cpu.step(&mut mem);
        assert_eq!(kinds(&cycles), vec![FETCH]);
        assert_eq!(cycles.get(0).map(|c| c.addr), Some(pc));
    }
    assert_eq!(cpu.pc(), pc, "halted CPU must not advance PC");
}

#[test]
fn reset_leaves_halt() {
    let (mut cpu, mut mem) = setup(&[0x76]);
    cpu.step(&mut mem);
    cpu.reset();
    assert!(!cpu.is_halted());
    assert_eq!(cpu.pc(), 0);
    assert_eq!(cpu.registers().sp, 0xFFFF);
    assert_eq!(cpu.registers().af(), 0xFFFF);
}

#[test]
fn doubled_prefix_is_its_own_instruction() {
    // DD FD 21 34 12: the DD is a lone prefix, then LD IY,0x1234
    let (mut cpu, mut mem) = setup(&[0xDD, 0xFD, 0x21, 0x34, 0x12]);
    let first = cpu.step(&mut mem);
    assert_eq!(kinds(&first), vec![FETCH]);
    assert_eq!(cpu.pc(), 1);
    let second = cpu.step(&mut mem);
    assert_eq!(kinds(&second), vec![FETCH, FETCH, READ, READ]);
    assert_eq!(cpu.registers().iy, 0x1234);
    assert_eq!(cpu.registers().hl(), 0, "HL untouched by indexed load");
}

#[test]
fn index_halves_replace_h_and_l() {
    // LD IX,0x1234; LD A,IXH; LD IXL,0x99
    let (mut cpu, mut mem) = setup(&[0xDD, 0x21, 0x34, 0x12, 0xDD, 0x7C, 0xDD, 0x2E, 0x99]);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    assert_eq!(cpu.registers().a, 0x12);
    cpu.step(&mut mem);
    assert_eq!(cpu.registers().ix, 0x1299);
}

#[test]
fn indexed_memory_operand_keeps_plain_h() {
    // LD IX,0x2000; LD H,(IX+1)
    let (mut cpu, mut mem) = setup(&[0xDD, 0x21, 0x00, 0x20, 0xDD, 0x66, 0x01]);
    mem.load(0x2001, &[0x77]);
    cpu.step(&mut mem);
    let cycles = cpu.step(&mut mem);
    assert_eq!(cycles.get(3), Some(BusCycle::new(0x2001, 0x77, READ)));
    assert_eq!(cpu.registers().h, 0x77);
    assert_eq!(cpu.registers().ix, 0x2000);
}

#[test]
fn ldir_repeats_one_iteration_per_step() {
    // LD HL,0x1000; LD DE,0x2000; LD BC,2; LDIR
    let (mut cpu, mut mem) = setup(&[
        0x21, 0x00, 0x10, 0x11, 0x00, 0x20, 0x01, 0x02, 0x00, 0xED, 0xB0,
    ]);
    mem.load(0x1000, &[0xAA, 0xBB]);
    for _ in 0..3 {
        cpu.step(&mut mem);
    }
    let first = cpu.step(&mut mem);
    assert_eq!(first.get(3), Some(BusCycle::new(0x2000, 0xAA, WRITE)));
    assert_eq!(cpu.pc(), 0x0009, "LDIR rewinds onto itself while BC != 0");
    cpu.step(&mut mem);
    assert_eq!(cpu.pc(), 0x000B);
    assert_eq!(mem.peek(0x2001), 0xBB);
    assert_eq!(cpu.registers().bc(), 0);
}

#[test]
fn djnz_loops_until_b_is_zero() {
    // LD B,3; DJNZ -2 (back to itself)
    let (mut cpu, mut mem) = setup(&[0x06, 0x03, 0x10, 0xFE]);
    cpu.step(&mut mem);
    let mut steps = 0;
    while cpu.pc() == 0x0002 && steps < 10 {
        cpu.step(&mut mem);
        steps += 1;
    }
    assert_eq!(steps, 3);
    assert_eq!(cpu.pc(), 0x0004);
}

#[test]
fn conditional_call_not_taken_skips_writes() {
    // XOR A sets Z; CALL NZ,0x1000
    let (mut cpu, mut mem) = setup(&[0xAF, 0xC4, 0x00, 0x10]);
    cpu.step(&mut mem);
    assert_ne!(cpu.registers().f & ZF, 0);
    let cycles = cpu.step(&mut mem);
    assert_eq!(kinds(&cycles), vec![FETCH, READ, READ]);
    assert_eq!(cpu.pc(), 0x0004);
}

#[test]
fn add_and_carry() {
    // LD A,0xF0; ADD A,0x20
    let (mut cpu, mut mem) = setup(&[0x3E, 0xF0, 0xC6, 0x20]);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    assert_eq!(cpu.registers().a, 0x10);
    assert_ne!(cpu.registers().f & CF, 0);
}

#[test]
fn refresh_counter_counts_opcode_fetches() {
    // NOP; DD-prefixed LD IX,nn; CB-prefixed RLC B
    let (mut cpu, mut mem) = setup(&[0x00, 0xDD, 0x21, 0x00, 0x00, 0xCB, 0x00]);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    cpu.step(&mut mem);
    assert_eq!(cpu.registers().r, 5);
}
