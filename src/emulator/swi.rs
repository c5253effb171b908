//! SWI gateway: emulator-side debug syscalls.
//!
//! An `swi` instruction whose condition passes reads the syscall number
//! from NR and its arguments from x0..x4, then dispatches:
//!
//! | NR   | call        | arguments                                  |
//! |------|-------------|--------------------------------------------|
//! | 1000 | emu_print   | -                                          |
//! | 1001 | emu_printr  | reg_id                                     |
//! | 1002 | emu_printm  | addr, size, little_endian                  |
//! | 1003 | emu_printp  | -                                          |
//! | 1010 | emu_assertr | reg_id, min, max                           |
//! | 1011 | emu_assertm | addr, size, little_endian, min, max        |
//! | 1012 | emu_assertp | flag_id, expected                          |
//! | 1020 | emu_log     | ptr to NUL-terminated string               |
//! | 1021 | emu_err     | ptr to NUL-terminated string, then halts   |
//!
//! Assertion failures halt with a diagnostic on the error log. An NR value
//! outside the table is fatal.

use crate::emulator::cpu::Cpu;
use crate::emulator::exception::Exception;
use crate::emulator::instruction::Condition;
use crate::emulator::registers::NR;

const EMU_PRINT: u32 = 1000;
const EMU_PRINTR: u32 = 1001;
const EMU_PRINTM: u32 = 1002;
const EMU_PRINTP: u32 = 1003;
const EMU_ASSERTR: u32 = 1010;
const EMU_ASSERTM: u32 = 1011;
const EMU_ASSERTP: u32 = 1012;
const EMU_LOG: u32 = 1020;
const EMU_ERR: u32 = 1021;

impl Cpu {
    /// Dispatch an `swi` whose condition already passed.
    pub(crate) fn exec_swi(&mut self, cond: Condition) -> Result<(), Exception> {
        let nr = self.regs.read(NR);
        log::debug!("swi {:?} nr={}", cond, nr);

        let x0 = self.regs.read(0);
        let x1 = self.regs.read(1);
        let x2 = self.regs.read(2);
        let x3 = self.regs.read(3);
        let x4 = self.regs.read(4);

        match nr {
            EMU_PRINT => {
                self.print_state();
                Ok(())
            }
            EMU_PRINTR => {
                let value = self.checked_reg(x0 as u8)?;
                println!("REG: x{} = {:#010X}", x0, value);
                Ok(())
            }
            EMU_PRINTM => {
                let value = self.read_mem_value(x0, x1 as u8, x2 != 0)?;
                println!("MEM: {:#010X} = {:#X}", x0, value);
                Ok(())
            }
            EMU_PRINTP => {
                println!("PSTATE: {}", self.pstate);
                Ok(())
            }
            EMU_ASSERTR => self.emu_assertr(x0 as u8, x1, x2),
            EMU_ASSERTM => self.emu_assertm(x0, x1 as u8, x2 != 0, x3, x4),
            EMU_ASSERTP => self.emu_assertp(x0 as u8, x1 != 0),
            EMU_LOG => {
                let msg = self.read_c_string(x0)?;
                println!("{}", msg);
                Ok(())
            }
            EMU_ERR => {
                let msg = self.read_c_string(x0)?;
                eprintln!("{}", msg);
                Err(Exception::Halt)
            }
            _ => {
                log::error!("invalid syscall number: {}", nr);
                Err(Exception::UnknownSyscall { nr })
            }
        }
    }

    /// Assemble `size` bytes starting at `addr` into a value.
    ///
    /// With `little_endian` the byte at `addr + 0` has the lowest
    /// significance; otherwise the byte at `addr + size - 1` does. Bytes
    /// beyond the low word are discarded.
    fn read_mem_value(&self, addr: u32, size: u8, little_endian: bool) -> Result<u32, Exception> {
        let mut value: u32 = 0;
        if little_endian {
            for i in 0..size as u32 {
                let byte = self.bus.read_byte(addr + i)? as u32;
                if 8 * i < 32 {
                    value |= byte << (8 * i);
                }
            }
        } else {
            for i in 0..size as u32 {
                value = (value << 8) | self.bus.read_byte(addr + i)? as u32;
            }
        }
        Ok(value)
    }

    fn emu_assertr(&mut self, reg_id: u8, min: u32, max: u32) -> Result<(), Exception> {
        let value = self.checked_reg(reg_id)?;
        if value < min || value > max {
            log::error!(
                "expected register x{} to be between {} and {}, got {}",
                reg_id,
                min,
                max,
                value
            );
            return Err(Exception::Halt);
        }
        Ok(())
    }

    fn emu_assertm(
        &mut self,
        addr: u32,
        size: u8,
        little_endian: bool,
        min: u32,
        max: u32,
    ) -> Result<(), Exception> {
        let value = self.read_mem_value(addr, size, little_endian)?;
        if value < min || value > max {
            log::error!(
                "expected value at {:#010X} to be between {} and {}, got {}",
                addr,
                min,
                max,
                value
            );
            return Err(Exception::Halt);
        }
        Ok(())
    }

    fn emu_assertp(&mut self, flag_id: u8, expected: bool) -> Result<(), Exception> {
        let value = self.pstate.flag(flag_id & 0x1F);
        if value != expected {
            log::error!(
                "expected pstate bit {} to be {}, got {}",
                flag_id,
                expected,
                value
            );
            return Err(Exception::Halt);
        }
        Ok(())
    }

    /// Read a NUL-terminated string via the bus.
    fn read_c_string(&self, mut addr: u32) -> Result<String, Exception> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.bus.read_byte(addr)?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            addr = addr.wrapping_add(1);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::bus::SystemBus;
    use crate::emulator::cpu::RunExit;
    use crate::emulator::instruction::Instruction;
    use crate::emulator::memory::{Ram, Region};
    use crate::emulator::registers::{C_FLAG, Z_FLAG};

    /// A core with RAM at 0 and an `swi al` at address 0, PC pointed at it.
    fn cpu_with_swi() -> Cpu {
        let mut bus = SystemBus::new();
        bus.map(Region::Ram(Ram::new(0, 0x0FFF))).unwrap();
        let mut cpu = Cpu::new(bus);
        cpu.bus
            .write_word(
                0,
                Instruction::Swi {
                    cond: Condition::Al,
                }
                .encode(),
            )
            .unwrap();
        cpu.set_pc(0);
        cpu
    }

    #[test]
    fn test_assertr_in_range_continues() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, EMU_ASSERTR);
        cpu.write_reg(0, 7); // reg_id
        cpu.write_reg(1, 5); // min
        cpu.write_reg(2, 10); // max
        cpu.write_reg(7, 6);

        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
    }

    #[test]
    fn test_assertr_out_of_range_halts() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, EMU_ASSERTR);
        cpu.write_reg(0, 7);
        cpu.write_reg(1, 5);
        cpu.write_reg(2, 10);
        cpu.write_reg(7, 11);

        assert_eq!(cpu.run(1), Ok(RunExit::Halted { steps: 1 }));
    }

    #[test]
    fn test_assertr_bad_register_id() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, EMU_ASSERTR);
        cpu.write_reg(0, 40);

        assert_eq!(cpu.run(1), Err(Exception::BadReg { reg: 40 }));
    }

    #[test]
    fn test_assertm_byte_order() {
        let mut cpu = cpu_with_swi();
        cpu.bus.write_byte(0x100, 0xAA).unwrap();
        cpu.bus.write_byte(0x101, 0xBB).unwrap();

        // Default order: addr+0 is most significant -> 0xAABB.
        cpu.write_reg(NR, EMU_ASSERTM);
        cpu.write_reg(0, 0x100);
        cpu.write_reg(1, 2);
        cpu.write_reg(2, 0); // big-endian assembly
        cpu.write_reg(3, 0xAABB);
        cpu.write_reg(4, 0xAABB);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));

        // Little-endian assembly of the same bytes -> 0xBBAA.
        cpu.set_pc(0);
        cpu.write_reg(2, 1);
        assert_eq!(cpu.run(1), Ok(RunExit::Halted { steps: 1 }));

        cpu.set_pc(0);
        cpu.write_reg(3, 0xBBAA);
        cpu.write_reg(4, 0xBBAA);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
    }

    #[test]
    fn test_assertm_unmapped_address_faults() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, EMU_ASSERTM);
        cpu.write_reg(0, 0x8000);
        cpu.write_reg(1, 1);

        assert_eq!(cpu.run(1), Err(Exception::NoRegion { addr: 0x8000 }));
    }

    #[test]
    fn test_assertp_matches_flag() {
        let mut cpu = cpu_with_swi();
        cpu.set_nzcv(false, true, false, false);
        cpu.write_reg(NR, EMU_ASSERTP);
        cpu.write_reg(0, Z_FLAG as u32);
        cpu.write_reg(1, 1);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));

        cpu.set_pc(0);
        cpu.write_reg(0, C_FLAG as u32);
        assert_eq!(cpu.run(1), Ok(RunExit::Halted { steps: 1 }));
    }

    #[test]
    fn test_unknown_syscall_is_fatal() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, 9999);

        assert_eq!(cpu.run(1), Err(Exception::UnknownSyscall { nr: 9999 }));
    }

    #[test]
    fn test_condition_failure_skips_dispatch() {
        let mut cpu = cpu_with_swi();
        cpu.bus
            .write_word(
                0,
                Instruction::Swi {
                    cond: Condition::Eq,
                }
                .encode(),
            )
            .unwrap();
        cpu.write_reg(NR, 9999); // would be fatal if dispatched

        // Z clear, EQ fails: the swi is a no-op.
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_emu_log_reads_string_via_bus() {
        let mut cpu = cpu_with_swi();
        for (i, b) in b"hello\0".iter().enumerate() {
            cpu.bus.write_byte(0x200 + i as u32, *b).unwrap();
        }
        cpu.write_reg(NR, EMU_LOG);
        cpu.write_reg(0, 0x200);

        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
    }

    #[test]
    fn test_emu_err_halts() {
        let mut cpu = cpu_with_swi();
        for (i, b) in b"boom\0".iter().enumerate() {
            cpu.bus.write_byte(0x200 + i as u32, *b).unwrap();
        }
        cpu.write_reg(NR, EMU_ERR);
        cpu.write_reg(0, 0x200);

        assert_eq!(cpu.run(1), Ok(RunExit::Halted { steps: 1 }));
    }

    #[test]
    fn test_print_calls_do_not_disturb_state() {
        let mut cpu = cpu_with_swi();
        cpu.write_reg(NR, EMU_PRINTP);
        cpu.set_nzcv(true, false, true, false);

        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
        assert!(cpu.pstate().n());
        assert!(cpu.pstate().c());

        cpu.set_pc(0);
        cpu.write_reg(NR, EMU_PRINT);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));

        cpu.set_pc(0);
        cpu.write_reg(NR, EMU_PRINTR);
        cpu.write_reg(0, 1);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));

        cpu.set_pc(0);
        cpu.write_reg(NR, EMU_PRINTM);
        cpu.write_reg(0, 0x100);
        cpu.write_reg(1, 4);
        cpu.write_reg(2, 0);
        assert_eq!(cpu.run(1), Ok(RunExit::Completed { steps: 1 }));
    }
}
