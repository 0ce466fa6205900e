use clap::Parser;
use knot_runtime::Runtime;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, Options};

pub mod bench;
pub mod cli;

fn main() -> miette::Result<()> {
    // Install the panic handler.
    bupropion::install(bupropion::BupropionHandlerOpts::new).into_diagnostic()?;

    // Parse the command line arguments.
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| miette::miette!("cannot install the logger: {error}"))?;

    let mut rt = Runtime::new(options.config())?;

    match options.command {
        Command::Bench { program } => {
            let report = bench::run(&mut rt, program)?;
            println!("result: {}", report.result);
            println!("max frames: {}", report.max_frames);
            println!(
                "collections: {}, live objects: {}, live words: {}, freed objects: {}, capacity: {}",
                report.heap.collections,
                report.heap.live_objects,
                report.heap.live_words,
                report.heap.freed_objects,
                report.heap.capacity,
            );
        }
        Command::Info => info(&rt),
    }

    Ok(())
}

fn info(rt: &Runtime) {
    println!("builtins:");
    for builtin in rt.builtins() {
        println!("  {}", builtin.name);
    }

    println!("types:");
    for (_, info) in rt.types().iter() {
        println!("  {:<24} size {:>3}  align {}", rt.display(info.descriptor), info.size, info.align);
    }
}
