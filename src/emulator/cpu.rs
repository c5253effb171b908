//! The E32 CPU core: fetch-execute loop, ALU, branches, load/store.
//!
//! A step is atomic with respect to observers: all register and flag
//! updates of one instruction become visible together, after any memory
//! writes it performs, and a faulting step applies none of its remaining
//! effects (access checks run before mutation, writeback runs after the
//! access succeeds).
//!
//! # Flag conventions
//!
//! Additions set C on unsigned carry out of bit 31. The subtract family
//! (SUB/SBC/RSB/RSC, and CMP) computes `minuend - subtrahend - borrow_in`
//! and sets C when a borrow occurred; SBC/RSC take the incoming C flag as
//! the borrow. Logical operations take the shifter carry-out as C when
//! operand-two was actually shifted, and preserve C and V otherwise.

use crate::emulator::bus::SystemBus;
use crate::emulator::exception::Exception;
use crate::emulator::instruction::{
    barrel_shift, AluOp, Indexing, Instruction, MemOp, Offset, Operand2,
};
use crate::emulator::registers::{Pstate, RegisterFile, NUM_REGS, PC};

/// Why a [`Cpu::run`] call stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// All requested steps executed.
    Completed { steps: u64 },
    /// A HALT stop (hlt instruction, assertion failure, or emu_err).
    Halted { steps: u64 },
}

/// The CPU core. Owns its system bus for its whole lifetime.
pub struct Cpu {
    pub bus: SystemBus,
    pub(crate) regs: RegisterFile,
    pub(crate) pstate: Pstate,
}

impl Cpu {
    /// Create a core over a bus, with zeroed registers and cleared flags.
    pub fn new(bus: SystemBus) -> Self {
        Self {
            bus,
            regs: RegisterFile::new(),
            pstate: Pstate::new(),
        }
    }

    /// Read a general register (index masked to 5 bits; never faults).
    #[inline]
    pub fn read_reg(&self, reg: u8) -> u32 {
        self.regs.read(reg)
    }

    /// Write a general register (index masked to 5 bits).
    #[inline]
    pub fn write_reg(&mut self, reg: u8, value: u32) {
        self.regs.write(reg, value);
    }

    /// Read a register by an untrusted id, as the SWI gateway does.
    pub(crate) fn checked_reg(&self, reg: u8) -> Result<u32, Exception> {
        if (reg as usize) < NUM_REGS {
            Ok(self.regs.read(reg))
        } else {
            Err(Exception::BadReg { reg })
        }
    }

    /// Current program counter.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.regs.read(PC)
    }

    /// Set the program counter.
    #[inline]
    pub fn set_pc(&mut self, pc: u32) {
        self.regs.write(PC, pc);
    }

    /// Current processor state.
    #[inline]
    pub fn pstate(&self) -> Pstate {
        self.pstate
    }

    /// Set all four condition flags.
    pub fn set_nzcv(&mut self, n: bool, z: bool, c: bool, v: bool) {
        self.pstate.set_nzcv(n, z, c, v);
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<(), Exception> {
        let pc = self.pc();
        let word = self
            .bus
            .read_word(pc)
            .map_err(|_| Exception::BadInstr { addr: pc })?;
        self.set_pc(pc.wrapping_add(4));

        let inst =
            Instruction::decode(word).map_err(|_| Exception::BadInstr { addr: pc })?;
        log::trace!("{:#010X}: {}", pc, inst);

        if !inst.condition().passes(self.pstate) {
            return Ok(());
        }

        match inst {
            Instruction::Halt => Err(Exception::Halt),

            Instruction::DataProc { op, s, rd, rn, op2 } => {
                self.exec_data_proc(op, s, rd, rn, op2);
                Ok(())
            }

            Instruction::MulLong {
                signed,
                s,
                rd_lo,
                rd_hi,
                rn,
                rm,
            } => {
                self.exec_mul_long(signed, s, rd_lo, rd_hi, rn, rm);
                Ok(())
            }

            Instruction::Branch { link, offset, .. } => {
                let next = self.pc();
                if link {
                    self.regs.write(crate::emulator::registers::LR, next);
                }
                self.set_pc(next.wrapping_add((offset << 2) as u32));
                Ok(())
            }

            Instruction::BranchExchange { rm, .. } => {
                let target = self.regs.read(rm);
                self.set_pc(target);
                Ok(())
            }

            Instruction::LoadStore {
                op,
                rt,
                rn,
                offset,
                indexing,
            } => self.exec_load_store(op, rt, rn, offset, indexing),

            Instruction::Swi { cond } => self.exec_swi(cond),
        }
    }

    /// Execute up to `n` steps.
    ///
    /// A HALT stop ends the run normally; any other exception ends it early
    /// and is reported to the caller.
    pub fn run(&mut self, n: u64) -> Result<RunExit, Exception> {
        for step in 0..n {
            match self.step() {
                Ok(()) => {}
                Err(Exception::Halt) => return Ok(RunExit::Halted { steps: step + 1 }),
                Err(e) => {
                    log::error!("exception after {} steps: {}", step, e);
                    return Err(e);
                }
            }
        }
        Ok(RunExit::Completed { steps: n })
    }

    /// Dump the full CPU state to stdout.
    pub fn print_state(&self) {
        println!("PC:     {:#010X}", self.pc());
        println!("PSTATE: {}", self.pstate);
        let regs = self.regs.as_slice();
        for (i, value) in regs.iter().enumerate() {
            if *value != 0 && i != PC as usize {
                println!("x{:<2}    {:#010X}", i, value);
            }
        }
    }

    fn resolve_op2(&self, op2: Operand2) -> (u32, Option<bool>) {
        match op2 {
            Operand2::Imm(imm) => (imm, None),
            Operand2::Reg { rm, shift, amount } => {
                barrel_shift(shift, self.regs.read(rm), amount)
            }
        }
    }

    fn exec_data_proc(&mut self, op: AluOp, s: bool, rd: u8, rn: u8, op2: Operand2) {
        let a = self.regs.read(rn);
        let (b, shifter_carry) = self.resolve_op2(op2);
        let carry = self.pstate.c() as u32;

        match op {
            AluOp::Add => self.arith_result(s, rd, false, add_with_carry(a, b, 0)),
            AluOp::Adc => self.arith_result(s, rd, false, add_with_carry(a, b, carry)),
            AluOp::Cmn => self.arith_result(s, rd, true, add_with_carry(a, b, 0)),

            AluOp::Sub => self.arith_result(s, rd, false, sub_with_borrow(a, b, 0)),
            AluOp::Sbc => self.arith_result(s, rd, false, sub_with_borrow(a, b, carry)),
            AluOp::Rsb => self.arith_result(s, rd, false, sub_with_borrow(b, a, 0)),
            AluOp::Rsc => self.arith_result(s, rd, false, sub_with_borrow(b, a, carry)),
            AluOp::Cmp => self.arith_result(s, rd, true, sub_with_borrow(a, b, 0)),

            AluOp::And => self.logical_result(s, rd, false, a & b, shifter_carry),
            AluOp::Orr => self.logical_result(s, rd, false, a | b, shifter_carry),
            AluOp::Eor => self.logical_result(s, rd, false, a ^ b, shifter_carry),
            AluOp::Bic => self.logical_result(s, rd, false, a & !b, shifter_carry),
            AluOp::Mov => self.logical_result(s, rd, false, b, shifter_carry),
            AluOp::Mvn => self.logical_result(s, rd, false, !b, shifter_carry),
            AluOp::Tst => self.logical_result(s, rd, true, a & b, shifter_carry),
            AluOp::Teq => self.logical_result(s, rd, true, a ^ b, shifter_carry),
        }
    }

    fn arith_result(&mut self, s: bool, rd: u8, discard: bool, out: (u32, bool, bool)) {
        let (result, c, v) = out;
        if !discard {
            self.regs.write(rd, result);
        }
        if s || discard {
            self.pstate.set_nzcv(result >> 31 == 1, result == 0, c, v);
        }
    }

    fn logical_result(
        &mut self,
        s: bool,
        rd: u8,
        discard: bool,
        result: u32,
        shifter_carry: Option<bool>,
    ) {
        if !discard {
            self.regs.write(rd, result);
        }
        if s || discard {
            self.pstate.set_nz(result);
            if let Some(c) = shifter_carry {
                self.pstate
                    .set_flag(crate::emulator::registers::C_FLAG, c);
            }
            // V is preserved; C too when operand-two was not shifted.
        }
    }

    fn exec_mul_long(&mut self, signed: bool, s: bool, rd_lo: u8, rd_hi: u8, rn: u8, rm: u8) {
        let a = self.regs.read(rn);
        let b = self.regs.read(rm);
        let product: u64 = if signed {
            (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64
        } else {
            a as u64 * b as u64
        };

        self.regs.write(rd_lo, product as u32);
        self.regs.write(rd_hi, (product >> 32) as u32);
        if s {
            self.pstate
                .set_flag(crate::emulator::registers::N_FLAG, product >> 63 == 1);
            self.pstate
                .set_flag(crate::emulator::registers::Z_FLAG, product == 0);
        }
    }

    fn exec_load_store(
        &mut self,
        op: MemOp,
        rt: u8,
        rn: u8,
        offset: Offset,
        indexing: Indexing,
    ) -> Result<(), Exception> {
        let base = self.regs.read(rn);
        let off = match offset {
            Offset::Imm(imm) => imm as u32,
            Offset::Reg { rm, shift, amount } => {
                barrel_shift(shift, self.regs.read(rm), amount).0
            }
        };

        let addr = match indexing {
            Indexing::Pre | Indexing::PreWriteback => base.wrapping_add(off),
            Indexing::Post => base,
        };

        let width = op.width();
        if width > 1 && addr % width as u32 != 0 {
            return Err(Exception::Misaligned { addr, width });
        }

        let loaded = if op.is_load() {
            let raw = self.bus.read(addr, width)?;
            Some(match op {
                MemOp::Ldrsb => raw as u8 as i8 as i32 as u32,
                _ => raw,
            })
        } else {
            self.bus.write(addr, self.regs.read(rt), width)?;
            None
        };

        match indexing {
            Indexing::PreWriteback => self.regs.write(rn, addr),
            Indexing::Post => self.regs.write(rn, base.wrapping_add(off)),
            Indexing::Pre => {}
        }
        if let Some(value) = loaded {
            self.regs.write(rt, value);
        }
        Ok(())
    }
}

/// `a + b + carry_in`, returning (result, carry out, signed overflow).
fn add_with_carry(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    let c = wide > u32::MAX as u64;
    let v = (!(a ^ b) & (a ^ result)) >> 31 == 1;
    (result, c, v)
}

/// `minuend - subtrahend - borrow_in`, returning (result, borrow occurred,
/// signed overflow).
fn sub_with_borrow(minuend: u32, subtrahend: u32, borrow_in: u32) -> (u32, bool, bool) {
    let result = minuend
        .wrapping_sub(subtrahend)
        .wrapping_sub(borrow_in);
    let c = (minuend as u64) < subtrahend as u64 + borrow_in as u64;
    let v = ((minuend ^ subtrahend) & (minuend ^ result)) >> 31 == 1;
    (result, c, v)
}
