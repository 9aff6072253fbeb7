use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use klipper_tool_endstop::configfile::Configfile;
use klipper_tool_endstop::reactor::SystemReactor;
use klipper_tool_endstop::Printer;
use log::{error, info};

/// Klipper tool endstop host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg()]
    config_file: String,

    /// read commands from file instead of from stdin
    #[arg(short, long)]
    debuginput: Option<String>,

    /// write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<String>,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,

    /// print tool endstop status after the last command
    #[arg(long)]
    status: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    if let Some(ref logfile) = args.logfile {
        let target = Box::new(
            std::fs::File::create(logfile).with_context(|| format!("Can't create logfile '{}'", logfile))?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();

    info!("Starting tool endstop host...");

    let config = Configfile::read(Path::new(&args.config_file))?;
    info!("Loaded config '{}'", config.filename().unwrap_or(&args.config_file));
    let mut printer = Printer::from_config(&config, Arc::new(SystemReactor::new()))?;
    printer.connect()?;

    let input: Box<dyn BufRead> = match args.debuginput {
        Some(ref path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("Can't open debuginput '{}'", path))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    for line in input.lines() {
        let line = line?;
        match printer.run_command(&line) {
            Ok(responses) => {
                for msg in responses {
                    println!("// {}", msg.replace('\n', "\n// "));
                }
            }
            Err(e) => {
                error!("{}", e);
                println!("!! {}", e);
            }
        }
    }

    if args.status {
        println!("{}", serde_json::to_string_pretty(&printer.status())?);
    }
    Ok(())
}
