//! emu32: emulator and assembler toolchain for the E32 32-bit ISA.
//!
//! `emu32 prog.basm [-o prog.bi] [-I dir]...` preprocesses a source file.
//! `emu32 image.bin [--steps N] [--dump-state]` runs a flat binary image.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::bail;

use emu32::assembler::Preprocessor;
use emu32::config::Config;
use emu32::emulator::memory::{Ram, Region};
use emu32::emulator::{Cpu, RunExit, SystemBus};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut input: Option<String> = None;
    let mut output: Option<String> = None;
    let mut include_dirs: Vec<PathBuf> = Vec::new();
    let mut steps: u64 = 1_000_000;
    let mut dump_state = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-o" => {
                i += 1;
                match args.get(i) {
                    Some(path) => output = Some(path.clone()),
                    None => bail!("-o requires an output path"),
                }
            }
            "-I" => {
                i += 1;
                match args.get(i) {
                    Some(dir) => include_dirs.push(PathBuf::from(dir)),
                    None => bail!("-I requires a directory"),
                }
            }
            "--steps" => {
                i += 1;
                match args.get(i) {
                    Some(n) => steps = n.parse()?,
                    None => bail!("--steps requires a count"),
                }
            }
            "--dump-state" => dump_state = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            arg if !arg.starts_with('-') => input = Some(arg.to_string()),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    let input = match input {
        Some(path) => path,
        None => {
            print_usage();
            return Ok(());
        }
    };

    // Choose the mode by extension: assembly source is preprocessed,
    // anything else is treated as a flat binary image.
    if input.ends_with(".basm") {
        preprocess(Path::new(&input), output.as_deref(), include_dirs)
    } else {
        run_image(Path::new(&input), steps, dump_state)
    }
}

fn print_usage() {
    println!("usage: emu32 <input.basm> [-o out.bi] [-I dir]...");
    println!("       emu32 <image.bin> [--steps N] [--dump-state]");
    println!();
    println!("       --sample-config   print a sample configuration file");
    if let Some(path) = Config::user_config_path() {
        println!();
        println!("user config: {}", path.display());
    }
}

/// Preprocess a source file into its `.bi` intermediate.
fn preprocess(
    input: &Path,
    output: Option<&str>,
    mut include_dirs: Vec<PathBuf>,
) -> anyhow::Result<()> {
    include_dirs.extend(Config::get().include_paths());

    let out_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| Preprocessor::output_path_for(input));

    println!("Preprocessing: {}", input.display());
    let mut preprocessor = Preprocessor::from_file(input, include_dirs)?;
    preprocessor.preprocess_to_file(&out_path)?;
    println!("Wrote: {}", out_path.display());
    Ok(())
}

/// Run a flat binary image in a fresh core.
fn run_image(path: &Path, steps: u64, dump_state: bool) -> anyhow::Result<()> {
    let image = std::fs::read(path)?;
    let ram_bytes = Config::get().ram_bytes().max(image.len() as u32);

    let mut bus = SystemBus::new();
    bus.map(Region::Ram(Ram::new(0, ram_bytes - 1)))?;
    let mut cpu = Cpu::new(bus);
    for (offset, byte) in image.iter().enumerate() {
        cpu.bus.write_byte(offset as u32, *byte)?;
    }
    cpu.set_pc(0);

    println!(
        "Loaded {} bytes into {} KiB RAM; running up to {} steps",
        image.len(),
        ram_bytes / 1024,
        steps
    );

    match cpu.run(steps) {
        Ok(RunExit::Halted { steps }) => println!("Halted after {} steps", steps),
        Ok(RunExit::Completed { steps }) => println!("Step limit reached ({} steps)", steps),
        Err(e) => {
            if dump_state {
                println!();
                cpu.print_state();
            }
            return Err(e.into());
        }
    }

    if dump_state {
        println!();
        cpu.print_state();
    }
    Ok(())
}
