use clap::{ArgGroup, Parser};
use slog::{crit, info, warn, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use spgz::{OpenFlags, SpgzFile};
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::process;
use swiss_writer::SparseWriter;

/// Bulk compressor and extractor for spgz files.
#[derive(Parser)]
#[command(name = "spgz")]
#[command(group = ArgGroup::new("mode").required(true).args(["create", "extract"]))]
struct Cli {
    /// Create COMPRESSED from the source file ('-' reads standard input)
    #[arg(short = 'c', long = "create", value_name = "COMPRESSED")]
    create: Option<PathBuf>,

    /// Extract COMPRESSED into the target file or block device
    #[arg(short = 'x', long = "extract", value_name = "COMPRESSED")]
    extract: Option<PathBuf>,

    /// Do not re-sparsify zero runs in the extracted output
    #[arg(long = "no-sparse")]
    no_sparse: bool,

    /// Source file (compress) or target file/device (extract)
    name: String,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if cli.verbose {
        Severity::Debug
    } else {
        Severity::Info
    });
    builder.destination(Destination::Stderr);
    let logger = builder.build().unwrap();

    let result = match (&cli.create, &cli.extract) {
        (_, Some(path)) => extract(&cli, path, &logger),
        (Some(path), _) => compress(&cli, path, &logger),
        _ => unreachable!("clap enforces the mode group"),
    };

    if let Err(e) = result {
        crit!(logger, "{}", e);
        process::exit(1);
    }
}

fn compress(cli: &Cli, path: &PathBuf, logger: &Logger) -> Result<(), String> {
    let mut f = SpgzFile::open_with_logger(
        path,
        OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::CREATE_NEW,
        logger.clone(),
    )
    .map_err(|e| format!("could not open compressed file: {}", e))?;

    let total = if cli.name == "-" {
        let stdin = io::stdin();
        f.copy_from(&mut stdin.lock())
    } else {
        let mut src = File::open(&cli.name)
            .map_err(|e| format!("could not open source file '{}': {}", cli.name, e))?;
        f.copy_from(&mut src)
    }
    .map_err(|e| format!("copy failed: {}", e))?;

    f.close().map_err(|e| format!("close failed: {}", e))?;
    info!(logger, "compressed"; "bytes" => total);
    Ok(())
}

fn extract(cli: &Cli, path: &PathBuf, logger: &Logger) -> Result<(), String> {
    let mut f = SpgzFile::open_with_logger(path, OpenFlags::READ, logger.clone())
        .map_err(|e| format!("could not open compressed file: {}", e))?;

    let mut out = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&cli.name)
        .map_err(|e| format!("could not open output file '{}': {}", cli.name, e))?;

    let dev = is_block_device(&out)
        .map_err(|e| format!("could not determine the target file type: {}", e))?;

    let total = if dev {
        let size = out
            .seek(SeekFrom::End(0))
            .map_err(|e| format!("could not determine target device size: {}", e))?;
        let src_size = f
            .size()
            .map_err(|e| format!("could not determine source size: {}", e))?;
        if size != src_size {
            return Err(format!(
                "target device size ({}) does not match source size ({})",
                size, src_size
            ));
        }
        out.seek(SeekFrom::Start(0))
            .map_err(|e| format!("seek failed: {}", e))?;
        f.copy_to(&mut out).map_err(|e| format!("copy failed: {}", e))?
    } else {
        if let Err(e) = out.set_len(0) {
            warn!(logger, "truncate failed: {}", e);
        }
        if cli.no_sparse {
            f.copy_to(&mut out).map_err(|e| format!("copy failed: {}", e))?
        } else {
            let mut w = SparseWriter::new(out);
            let n = f.copy_to(&mut w).map_err(|e| format!("copy failed: {}", e))?;
            w.finish()
                .map_err(|e| format!("finalizing sparse output failed: {}", e))?;
            n
        }
    };

    info!(logger, "extracted"; "bytes" => total);
    Ok(())
}

#[cfg(unix)]
fn is_block_device(f: &File) -> io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;
    Ok(f.metadata()?.file_type().is_block_device())
}

#[cfg(not(unix))]
fn is_block_device(_f: &File) -> io::Result<bool> {
    Ok(false)
}
