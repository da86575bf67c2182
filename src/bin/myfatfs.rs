//! Command dispatch layer: a thin, line-oriented REPL that tokenizes a
//! command line and calls into the `myfatfs` library. Not part of the core
//! contract — argument parsing, help text, and logging live here, not in
//! the library.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use log::{error, warn};

use myfatfs::{config, DirEntry, Error, FileSystem, FormatOptions};

/// A self-contained FAT-style file system in a single host file.
#[derive(Parser, Debug)]
#[command(name = "myfatfs", version, about)]
struct Args {
    /// Mount this image immediately on startup.
    #[arg(long)]
    mount: Option<PathBuf>,
}

/// `format`'s in-line flags, matching the bounds spec.md §6 documents.
/// Parsed from the rest of a `format` command line the same way `Args`
/// parses the process's argv, so the bounds validation lives in one place
/// (`clap`'s range-checked value parsers plus `FormatOptions::validate`).
#[derive(Parser, Debug)]
#[command(name = "format")]
struct FormatArgs {
    /// Image path to create/truncate.
    path: PathBuf,

    /// Total image size in bytes (1 MiB - 1 GiB).
    #[arg(long, value_parser = clap::value_parser!(u64).range(
        config::MIN_DISK_SIZE..=config::MAX_DISK_SIZE
    ))]
    disk_size: Option<u64>,

    /// Bytes per block, a power of two (512 B - 16 KiB).
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        config::MIN_BLOCK_SIZE as i64..=config::MAX_BLOCK_SIZE as i64
    ))]
    block_size: Option<u32>,

    /// Max entries per directory block (16 - 1024).
    #[arg(long, value_parser = clap::value_parser!(u16).range(
        config::MIN_FILES_PER_DIR as i64..=config::MAX_FILES_PER_DIR as i64
    ))]
    max_files_per_dir: Option<u16>,

    /// Max blocks per file's chain (1 - 65535).
    #[arg(long, value_parser = clap::value_parser!(u32).range(
        config::MIN_FILE_BLOCKS as i64..=config::MAX_FILE_BLOCKS as i64
    ))]
    max_file_blocks: Option<u32>,

    /// Volume label (up to 15 bytes).
    #[arg(long)]
    volume_label: Option<String>,

    /// Enables the (not cryptographically secure) XOR data-block mask.
    #[arg(long)]
    xor_password: Option<String>,
}

impl FormatArgs {
    fn into_options(self) -> FormatOptions {
        let default = FormatOptions::default();
        FormatOptions {
            disk_size: self.disk_size.unwrap_or(default.disk_size),
            block_size: self.block_size.unwrap_or(default.block_size),
            max_files_per_dir: self.max_files_per_dir.unwrap_or(default.max_files_per_dir),
            max_file_blocks: self.max_file_blocks.unwrap_or(default.max_file_blocks),
            volume_label: self.volume_label.unwrap_or(default.volume_label),
            xor_password: self.xor_password,
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut fs: Option<FileSystem> = None;
    if let Some(path) = args.mount {
        match FileSystem::mount(&path) {
            Ok(mounted) => fs = Some(mounted),
            Err(e) => {
                eprintln!("mount failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("stdin read error: {}", e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !dispatch(trimmed, &mut fs) {
            break;
        }
        io::stdout().flush().ok();
    }
}

/// Returns `false` when the REPL should stop (on `exit`).
fn dispatch(line: &str, fs: &mut Option<FileSystem>) -> bool {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim_start()),
        None => (line, ""),
    };

    match cmd {
        "exit" => return false,
        "help" => print_help(),
        "format" => {
            if rest.trim().is_empty() {
                println!(
                    "usage: format <path> [--disk-size N] [--block-size N] \
                     [--max-files-per-dir N] [--max-file-blocks N] \
                     [--volume-label LABEL] [--xor-password PASSWORD]"
                );
                return true;
            }
            // `try_parse_from` expects argv[0] to be the program name; this
            // REPL line has no such token, so a placeholder is prepended.
            let tokens = std::iter::once("format").chain(rest.split_whitespace());
            let args = match FormatArgs::try_parse_from(tokens) {
                Ok(a) => a,
                Err(e) => {
                    println!("{}", e);
                    return true;
                }
            };
            let path = args.path.clone();
            match myfatfs::format(&path, &args.into_options()) {
                Ok(()) => println!("formatted {}", path.display()),
                Err(e) => println!("error: {}", e),
            }
        }
        "mount" => {
            let path = rest.trim();
            if path.is_empty() {
                println!("usage: mount <path>");
                return true;
            }
            match FileSystem::mount(path.as_ref()) {
                Ok(mounted) => {
                    *fs = Some(mounted);
                    println!("mounted {}", path);
                }
                Err(e) => println!("error: {}", e),
            }
        }
        "unmount" => match fs.take() {
            Some(mounted) => {
                mounted.unmount();
                println!("unmounted");
            }
            None => println!("error: {}", Error::NotMounted),
        },
        "ls" => with_mounted(fs, |m| {
            let mut entries = m.ls()?;
            entries.sort_by(|a, b| a.filename.cmp(&b.filename));
            for e in &entries {
                print_entry(e);
            }
            Ok(())
        }),
        "mkdir" => with_mounted(fs, |m| {
            let name = rest.trim();
            m.mkdir(name)
        }),
        "create" => with_mounted(fs, |m| {
            let name = rest.trim();
            m.create_file(name)
        }),
        "write" => with_mounted(fs, |m| {
            let (name, data) = match rest.split_once(char::is_whitespace) {
                Some((n, d)) => (n, d),
                None => (rest, ""),
            };
            m.write_file(name, data.as_bytes())
        }),
        "read" => with_mounted(fs, |m| {
            let name = rest.trim();
            let data = m.read_file(name)?;
            println!("{}", String::from_utf8_lossy(&data));
            Ok(())
        }),
        "delete" => with_mounted(fs, |m| {
            let name = rest.trim();
            m.delete_file(name)
        }),
        "truncate" => with_mounted(fs, |m| {
            let (name, size_str) = match rest.split_once(char::is_whitespace) {
                Some((n, s)) => (n, s.trim()),
                None => {
                    println!("usage: truncate <name> <size>");
                    return Ok(());
                }
            };
            let size: u32 = match size_str.parse() {
                Ok(s) => s,
                Err(_) => {
                    println!("error: size must be an unsigned integer");
                    return Ok(());
                }
            };
            m.truncate_file(name, size)
        }),
        other => {
            warn!("unknown command: {}", other);
            println!("unknown command '{}'; type 'help' for usage", other);
        }
    }
    true
}

fn with_mounted(fs: &mut Option<FileSystem>, op: impl FnOnce(&mut FileSystem) -> myfatfs::Result<()>) {
    match fs {
        Some(m) => {
            if let Err(e) = op(m) {
                println!("error: {}", e);
            }
        }
        None => println!("error: {}", Error::NotMounted),
    }
}

fn print_entry(e: &DirEntry) {
    let kind = if e.is_dir() { "DIR " } else { "FILE" };
    println!("{} {:>10} {}", kind, e.file_size, e.filename);
}

fn print_help() {
    println!(
        "commands:\n\
         \x20 format <path> [--disk-size N] [--block-size N]\n\
         \x20          [--max-files-per-dir N] [--max-file-blocks N]\n\
         \x20          [--volume-label LABEL] [--xor-password PASSWORD]\n\
         \x20                           create + format image\n\
         \x20 mount <path>             mount image\n\
         \x20 unmount                  unmount\n\
         \x20 ls                       list current directory\n\
         \x20 mkdir <name>             create subdirectory in cwd\n\
         \x20 create <name>            create empty file\n\
         \x20 write <name> <data>      overwrite file\n\
         \x20 read <name>              print file contents\n\
         \x20 delete <name>            remove file\n\
         \x20 truncate <name> <size>   shrink file\n\
         \x20 help                     usage\n\
         \x20 exit                     quit"
    );
}
