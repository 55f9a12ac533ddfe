use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use tollway::{FlatRateStation, Linker, LinkerConfig, Module, ModuleConfig};

#[derive(Parser)]
#[command(name = "tollway", about = "WebAssembly interpreter with per-instruction metering")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke an exported function of a .wasm or .wat module.
    Run {
        /// Path to the module.
        file: PathBuf,
        /// Raw u64 argument slots for the export.
        args: Vec<u64>,
        /// Name of the export to invoke.
        #[arg(long, default_value = "main")]
        invoke: String,
        /// Toll budget; execution stops once it is spent.
        #[arg(long)]
        toll: Option<u64>,
        /// Cap on call depth.
        #[arg(long)]
        call_depth: Option<usize>,
        /// Print interpreter diagnostics to stderr.
        #[arg(long)]
        verbose: bool,
    },
    /// List a module's imports and exports.
    Inspect {
        /// Path to the module.
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { file, args, invoke, toll, call_depth, verbose } => {
            run(file, args, invoke, toll, call_depth, verbose)
        }
        Command::Inspect { file } => inspect(file),
    }
}

fn run(
    file: PathBuf,
    args: Vec<u64>,
    invoke: String,
    toll: Option<u64>,
    call_depth: Option<usize>,
    verbose: bool,
) -> anyhow::Result<()> {
    let station = toll.map(|budget| {
        Rc::new(RefCell::new(FlatRateStation::new(budget))) as tollway::SharedTollStation
    });
    let config = ModuleConfig {
        toll_station: station.clone(),
        call_depth_limit: call_depth,
        logger: verbose.then(|| Rc::new(|text: &str| eprintln!("tollway: {text}")) as tollway::Logger),
        ..ModuleConfig::default()
    };

    let module = Module::new(config, &read_module(&file)?)?;
    let linker = Linker::new(LinkerConfig::default());
    let mut instance = linker.instantiate(&module)?;

    let results = instance.call_export(&invoke, &args)?;
    for slot in results {
        println!("{slot}");
    }
    if let Some(station) = station {
        if verbose {
            eprintln!("tollway: toll remaining: {}", station.borrow().balance());
        }
    }
    Ok(())
}

fn inspect(file: PathBuf) -> anyhow::Result<()> {
    let module = Module::new(ModuleConfig::default(), &read_module(&file)?)?;
    for import in module.imports() {
        println!("import {} {}.{}", import.kind(), import.module, import.name);
    }
    let mut exports: Vec<_> = module.exports().collect();
    exports.sort_by_key(|(name, _)| name.to_string());
    for (name, desc) in exports {
        println!("export {} {} (index {})", desc.kind, name, desc.index);
    }
    Ok(())
}

/// Accept either the binary format or WAT text.
fn read_module(file: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let bytes = std::fs::read(file)?;
    if bytes.starts_with(b"\0asm") {
        return Ok(bytes);
    }
    Ok(wat::parse_bytes(&bytes)?.into_owned())
}
