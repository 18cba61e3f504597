extern crate cbm_media;
extern crate clap;

use clap::{App, AppSettings, Arg, SubCommand};
use std::fs;
use std::io::{self, Read, Write};
use std::process;

use tracing_subscriber::EnvFilter;

use cbm_media::util;
use cbm_media::vfs::{MFile, Registry};
use cbm_media::Config;

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// If a dash is specified for a filename, this indicates that the user wants
/// to write to standard output.
static STDOUT_PSEUDOFILENAME: &str = "-";

fn main() {
    // Parse command-line arguments
    let app = App::new("Commodore Media Stream Utility")
        .version("0.1.0")
        .about("List, read, and dump files in Commodore disk, tape, and cartridge images.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("path").required(true).help(
            "Host path, path into a container (e.g. games.lnx/DISK.D64/LOADER), or json:/sha256:/qr: URL",
        ))
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Log more detail (repeat for more)"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .help("TOML configuration file"),
        )
        .subcommand(SubCommand::with_name("dir").about("Show a directory listing"))
        .subcommand(
            SubCommand::with_name("read")
                .about("Copy a file's bytes out.")
                .arg(Arg::with_name("destination_filename").required(false)),
        )
        .subcommand(SubCommand::with_name("dump").about("Provide a hex dump of a file."))
        .subcommand(SubCommand::with_name("info").about("Describe a file or container."));

    let mut app_clone = app.clone();
    let matches = app.get_matches();

    init_logging(matches.occurrences_of("verbose"));

    let config = match matches.value_of("config") {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}: {}", path, e);
                process::exit(EXIT_FAILURE);
            }
        },
        None => Config::default(),
    };
    let registry = Registry::with_config(config);

    let path = matches.value_of("path").unwrap_or_default();
    let result = match matches.subcommand() {
        ("dir", Some(_)) => cmd_dir(&registry, path),
        ("read", Some(m)) => cmd_read(&registry, path, m.value_of("destination_filename")),
        ("dump", Some(_)) => cmd_dump(&registry, path),
        ("info", Some(_)) => cmd_info(&registry, path),
        _ => {
            let _ = app_clone.print_help();
            println!();
            process::exit(EXIT_FAILURE);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(EXIT_FAILURE);
    }
}

/// Log to stderr, filtered by `RUST_LOG` when set, else by the `-v` count.
fn init_logging(verbosity: u64) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Open a file for writing
fn open_fs_writer(filename: &str) -> io::Result<Box<dyn Write>> {
    if filename == STDOUT_PSEUDOFILENAME {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(filename)?))
    }
}

fn cmd_dir(registry: &Registry, path: &str) -> io::Result<()> {
    let mut dir = registry.open(path)?;
    if let Ok(image) = dir.image() {
        println!("{} \"{}\"", image.format(), image.handler().label());
    }
    let mut count = 0;
    while let Some(file) = dir.get_next_file_in_dir()? {
        println!("{:<8} {:<6} {}", file.size(), file.type_name(), quoted(&file));
        count += 1;
    }
    println!("{} entries", count);
    Ok(())
}

fn quoted(file: &MFile) -> String {
    format!("\"{}\"{}", file.name(), if file.is_dir() { "/" } else { "" })
}

fn cmd_read(registry: &Registry, path: &str, destination_filename: Option<&str>) -> io::Result<()> {
    let file = registry.open(path)?;
    let destination_filename = destination_filename.unwrap_or_else(|| file.name());
    let mut reader = file.open()?;
    let mut writer = open_fs_writer(destination_filename)?;
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn cmd_dump(registry: &Registry, path: &str) -> io::Result<()> {
    let file = registry.open(path)?;
    let mut reader = file.open()?;
    let mut buffer = vec![0u8; 4096];
    let mut offset = 0u64;
    loop {
        let nbytes = read_full(&mut reader, &mut buffer)?;
        if nbytes == 0 {
            break;
        }
        println!("{}", util::hex_at(offset, &buffer[..nbytes]));
        offset += nbytes as u64;
    }
    Ok(())
}

/// Fill `buffer` as far as the reader allows, so dump rows stay aligned.
fn read_full(reader: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        match reader.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn cmd_info(registry: &Registry, path: &str) -> io::Result<()> {
    let file = registry.open(path)?;
    println!("url:       {}", file.url());
    println!("name:      {}", file.name());
    println!("size:      {}", file.size());
    println!("type:      {}", file.type_name());
    println!("directory: {}", file.is_dir());
    println!("text:      {}", file.is_text());
    if let Some(entry) = file.container_entry() {
        println!("index:     {}", entry.index);
        if let Some((track, sector)) = entry.location {
            println!("start:     {}/{}", track, sector);
        }
        if let Some(load_address) = entry.load_address {
            println!("load:      ${:04x}", load_address);
        }
        if let Some(timestamp) = entry.timestamp {
            println!("modified:  {}", timestamp);
        }
        if entry.partial {
            println!("partial:   true");
        }
    }
    if let Ok(image) = file.image() {
        let handler = image.handler();
        println!("format:    {}", handler.format());
        println!("label:     {}", handler.label());
        println!("entries:   {}", image.entries()?.len());
        println!("blocksize: {}", handler.block_size());
    }
    Ok(())
}
