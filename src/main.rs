use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use stkprog::device::ChipDB;
use stkprog::error::Pass;
use stkprog::flashing::{Config, Progress, ResetMethod};
use stkprog::transport::{Baudrate, SerialTransport};
use stkprog::Flashing;

#[derive(Parser)]
#[command(
    name = "stkprog",
    version,
    about = "Flash Intel-HEX firmware to AVR targets running Optiboot, over STK500 v1"
)]
struct Cli {
    /// Serial port of the target, defaults to the first one found
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Bootloader baudrate
    #[arg(short, long, global = true, value_enum, default_value_t = Baudrate::default())]
    baudrate: Baudrate,

    /// Target chip, sets the flash page size
    #[arg(short, long, global = true, default_value = "atmega328p")]
    chip: String,

    /// How to reset the target into its bootloader
    #[arg(long, global = true, value_enum, default_value_t = ResetMethod::default())]
    reset: ResetMethod,

    /// Verbose output, repeat for protocol traces
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available serial ports
    List {},
    /// Get info about the connected chip and its bootloader
    Info {},
    /// Reset the target connected
    Reset {},
    /// Write a hex file to code flash, verify it and start it
    Flash {
        /// The path to the Intel-HEX file to be written
        path: String,
        /// Reject records whose checksum does not match
        #[arg(long)]
        strict_checksum: bool,
    },
    /// Read code flash into an Intel-HEX file
    Dump {
        path: String,
        /// Bytes to read, defaults to the whole flash of the chip
        #[arg(long)]
        size: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    if let Command::List {} = cli.command {
        for port in SerialTransport::scan_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let db = ChipDB::load()?;
    let chip = db.find_by_name(&cli.chip)?;
    log::debug!("Target chip: {}", chip);

    let mut config = Config::for_chip(&chip);
    config.baudrate = cli.baudrate.into();
    config.reset = cli.reset;
    if let Command::Flash {
        strict_checksum, ..
    } = &cli.command
    {
        config.verify_checksums = *strict_checksum;
    }

    let mut flashing = Flashing::new_from_serial(cli.port.as_deref(), config)?;
    match cli.command {
        Command::Info {} => {
            let info = flashing.identify()?;
            match db.find_by_signature(info.signature) {
                Ok(found) => {
                    log::info!("Chip: {} (CodeFlash: {}KiB)", found, found.flash_size / 1024);
                    if found.name != chip.name {
                        log::warn!("Connected chip does not match --chip {}", chip.name);
                    }
                }
                Err(_) => log::warn!("Unknown signature: {}", hex::encode(info.signature)),
            }
            log::info!(
                "Bootloader version: {}.{}",
                info.bootloader_version.0,
                info.bootloader_version.1
            );
        }
        Command::Reset {} => {
            flashing.reset()?;
            log::info!("Device reset");
        }
        Command::Flash { path, .. } => {
            let file = stkprog::source::open(&path)?;
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("{msg:>8} [{bar:40}] {bytes}/{total_bytes}")?
                    .progress_chars("=> "),
            );
            let mut pass = None;
            flashing.program(file, |p: Progress| {
                if pass != Some(p.pass) {
                    pass = Some(p.pass);
                    bar.reset();
                    bar.set_length(p.total);
                    bar.set_message(match p.pass {
                        Pass::Writing => "Writing",
                        Pass::Verifying => "Verifying",
                    });
                }
                bar.set_position(p.consumed);
            })?;
            bar.finish_with_message("Done");
            log::info!("Programmed {}", path);
        }
        Command::Dump { path, size } => {
            let size = size.unwrap_or(chip.flash_size as usize);
            anyhow::ensure!(
                size <= chip.flash_size as usize,
                "{} bytes requested, {} has {} bytes of flash",
                size,
                chip.name,
                chip.flash_size
            );
            let image = flashing.read_flash(size)?;
            std::fs::write(&path, stkprog::format::write_ihex(&image)?)?;
            log::info!("Wrote {} bytes of flash to {}", image.len(), path);
        }
        Command::List {} => (),
    }

    Ok(())
}
