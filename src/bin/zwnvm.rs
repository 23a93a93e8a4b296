//! # zwnvm CLI Entry Point
//!
//! Binary entry point for inspecting and editing NVM3 images.
//!
//! ## Usage
//!
//! ```bash
//! # Show image geometry
//! zwnvm backup.bin info
//!
//! # List every live object
//! zwnvm backup.bin dump
//!
//! # Create and format a new image
//! zwnvm --create 65536 new.bin erase --shared
//! ```

use eyre::{bail, Result, WrapErr};
use std::env;
use std::path::PathBuf;
use zwnvm::cli::{execute, Command};
use zwnvm::{MmapIo, Nvm3};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut create_size: Option<usize> = None;
    let mut image_path: Option<PathBuf> = None;
    let mut command_args: Vec<&str> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" if image_path.is_none() => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" if image_path.is_none() => {
                println!("zwnvm {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--create" | "-c" if image_path.is_none() => {
                let Some(size) = args.get(i + 1) else {
                    bail!("--create needs an image size in bytes");
                };
                create_size = Some(
                    size.parse()
                        .wrap_err_with(|| format!("invalid image size '{}'", size))?,
                );
                i += 1;
            }
            arg if image_path.is_none() && arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            path if image_path.is_none() => {
                image_path = Some(PathBuf::from(path));
            }
            arg => command_args.push(arg),
        }
        i += 1;
    }

    let Some(image_path) = image_path else {
        print_usage();
        return Ok(());
    };

    let command = Command::parse(&command_args).wrap_err("failed to parse command")?;

    let io = match create_size {
        Some(size) => MmapIo::create(&image_path, size)
            .wrap_err_with(|| format!("failed to create NVM image at {:?}", image_path))?,
        None => MmapIo::open_path(&image_path)
            .wrap_err_with(|| format!("failed to open NVM image at {:?}", image_path))?,
    };

    let mut nvm = Nvm3::new(io);
    let output = execute(&mut nvm, &command)
        .wrap_err_with(|| format!("command failed on {:?}", image_path))?;
    nvm.close()
        .wrap_err_with(|| format!("failed to close NVM image at {:?}", image_path))?;

    if command.is_mutating() {
        tracing::info!(path = %image_path.display(), "NVM image updated");
    }
    println!("{}", output.trim_end());

    Ok(())
}

fn print_usage() {
    println!("zwnvm - Z-Wave NVM3 image tool");
    println!();
    println!("USAGE:");
    println!("    zwnvm [OPTIONS] <IMAGE> <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    info                              Show image geometry and sections");
    println!("    dump                              List every live object");
    println!("    get <KEY>                         Print one value as hex");
    println!("    set <KEY> <HEX>                   Write a value");
    println!("    delete <KEY>                      Delete a value");
    println!("    erase [--page-size N] [--shared]  Format the whole image");
    println!();
    println!("OPTIONS:");
    println!("    -c, --create <SIZE>  Create a new image of SIZE bytes first");
    println!("    -h, --help           Print help information");
    println!("    -v, --version        Print version information");
    println!();
    println!("EXAMPLES:");
    println!("    zwnvm backup.bin get 0x50004");
    println!("    zwnvm --create 65536 new.bin erase --shared");
}
