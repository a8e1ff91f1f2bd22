//! Command-line driver: run scripts, build program blobs, dump them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use scriv_bytecode::{Program, dump};
use scriv_vm::{Outcome, Vm};

#[derive(Parser)]
#[command(name = "scriv", version, about = "scriv scripting engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and execute a script
    Run {
        file: PathBuf,
        /// Tag delimiters (default: [ ])
        #[arg(long, num_args = 2, value_names = ["LEFT", "RIGHT"])]
        delimiters: Option<Vec<String>>,
        /// The input is an already compiled program blob
        #[arg(long)]
        compiled: bool,
    },
    /// Compile a script to a relocatable program blob
    Build {
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Summarize a compiled program as JSON
    Dump {
        file: PathBuf,
        /// The input is source text; compile it first
        #[arg(long)]
        source: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            file,
            delimiters,
            compiled,
        } => run(&file, delimiters.as_deref(), compiled),
        Command::Build { file, output } => build(&file, &output),
        Command::Dump { file, source } => dump_program(&file, source),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("scriv: {message}");
            ExitCode::FAILURE
        }
    }
}

fn configure(vm: &mut Vm, file: &Path, delimiters: Option<&[String]>) -> Result<String, String> {
    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
    {
        vm.set_base_dir(parent);
    }
    if let Some(pair) = delimiters {
        vm.set_delimiters(&pair[0], &pair[1])
            .map_err(|e| e.to_string())?;
    }
    vm.set_report(|msg| eprintln!("scriv: {msg}"));
    file.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("not a file: {}", file.display()))
}

fn run(file: &Path, delimiters: Option<&[String]>, compiled: bool) -> Result<(), String> {
    let mut vm = Vm::new();
    let name = configure(&mut vm, file, delimiters)?;
    if compiled {
        let blob = std::fs::read(file).map_err(|e| e.to_string())?;
        vm.load_program_blob(&blob).map_err(|e| e.to_string())?;
    } else {
        vm.load_source_file(&name).map_err(|e| e.to_string())?;
    }
    // Resume over host-level stops until the script exits.
    loop {
        match vm.run().map_err(|e| e.to_string())? {
            Outcome::Stopped => continue,
            Outcome::Exited => return Ok(()),
        }
    }
}

fn build(file: &Path, output: &Path) -> Result<(), String> {
    let mut vm = Vm::new();
    let _ = configure(&mut vm, file, None)?;
    let src = std::fs::read_to_string(file).map_err(|e| e.to_string())?;
    let compiled = vm.compile_only(&src).map_err(|e| e.to_string())?;
    for warning in &compiled.warnings {
        eprintln!("scriv: warning: line {}: {}", warning.line, warning.message);
    }
    std::fs::write(output, compiled.program.encode()).map_err(|e| e.to_string())?;
    Ok(())
}

fn dump_program(file: &Path, source: bool) -> Result<(), String> {
    let program: Program = if source {
        let mut vm = Vm::new();
        let _ = configure(&mut vm, file, None)?;
        let src = std::fs::read_to_string(file).map_err(|e| e.to_string())?;
        vm.compile_only(&src).map_err(|e| e.to_string())?.program
    } else {
        let blob = std::fs::read(file).map_err(|e| e.to_string())?;
        Program::decode(&blob).map_err(|e| e.to_string())?
    };
    let summary = dump::dump(&program);
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
