use clap::{Parser, Subcommand};
use parchive::context::Direction;
use parchive::reader::{scan_archive_end, Reader};
use parchive::{Archive, ReaderConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "parchive", version, about = "Inspect archive log containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the label and volume range of an archive.
    Info { base: PathBuf },
    /// List the data volumes discovered for an archive.
    ListVolumes { base: PathBuf },
    /// Dump records from one or more archives, in timestamp order.
    Dump {
        #[arg(num_args = 1..)]
        bases: Vec<PathBuf>,
        /// Dump backward from the end instead of forward from the start.
        #[arg(long)]
        backward: bool,
        /// Stop after this many records (0 = unlimited).
        #[arg(long, default_value = "0")]
        limit: usize,
    },
    /// Seek to a timestamp (`SEC[.NSEC]`) and read the next record.
    Seek {
        #[arg(num_args = 1..)]
        bases: Vec<PathBuf>,
        time: String,
        #[arg(long)]
        backward: bool,
    },
    /// Forward-scan an archive's last volume to find its true end,
    /// validating each record with the paranoid structural sanity pass.
    Scan { base: PathBuf },
}

fn parse_timestamp(s: &str) -> Result<parchive::Timestamp, String> {
    let (sec_part, nsec_part) = s.split_once('.').unwrap_or((s, "0"));
    let sec: i64 = sec_part.parse().map_err(|_| format!("bad seconds: {sec_part}"))?;
    let frac_digits = nsec_part.len().min(9);
    let padded = format!("{:0<9}", &nsec_part[..frac_digits]);
    let nsec: i32 = padded.parse().map_err(|_| format!("bad nanoseconds: {nsec_part}"))?;
    Ok(parchive::Timestamp::new(sec, nsec))
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Info { base } => {
            let archive = Archive::open(&base).map_err(|e| e.to_string())?;
            println!("base:      {}", archive.base.display());
            println!("version:   {:?}", archive.label.version);
            println!("pid:       {}", archive.label.pid);
            println!("hostname:  {}", archive.label.hostname);
            println!("timezone:  {}", archive.label.timezone);
            if !archive.label.zoneinfo.is_empty() {
                println!("zoneinfo:  {}", archive.label.zoneinfo);
            }
            println!("start:     {}", archive.label.start);
            println!("volumes:   [{}..{}]", archive.min_vol, archive.max_vol);
            println!("index entries: {}", archive.index.len());
        }
        Commands::ListVolumes { base } => {
            let archive = Archive::open(&base).map_err(|e| e.to_string())?;
            for vol in archive.min_vol..=archive.max_vol {
                let path = parchive::Volume::path_for(&archive.base, vol);
                let exists = path.is_file();
                println!("{vol}\t{}\t{}", path.display(), if exists { "ok" } else { "missing" });
            }
        }
        Commands::Dump { bases, backward, limit } => {
            let paths: Vec<&std::path::Path> = bases.iter().map(|p| p.as_path()).collect();
            let mut reader = Reader::open(&paths, ReaderConfig::default()).map_err(|e| e.to_string())?;
            let direction = if backward { Direction::Backward } else { Direction::Forward };
            let mut count = 0usize;
            loop {
                if limit != 0 && count >= limit {
                    break;
                }
                match reader.read_next(direction) {
                    Ok(rec) => {
                        if rec.is_mark() {
                            println!("{}\t<mark>", rec.timestamp);
                        } else {
                            println!("{}\t{} metric(s)", rec.timestamp, rec.value_sets.len());
                        }
                        count += 1;
                    }
                    Err(parchive::ReaderError::EndOfLog) => break,
                    Err(e) => return Err(e.to_string()),
                }
            }
        }
        Commands::Seek { bases, time, backward } => {
            let paths: Vec<&std::path::Path> = bases.iter().map(|p| p.as_path()).collect();
            let mut reader = Reader::open(&paths, ReaderConfig::default()).map_err(|e| e.to_string())?;
            let target = parse_timestamp(&time)?;
            reader.set_time(target).map_err(|e| e.to_string())?;
            let direction = if backward { Direction::Backward } else { Direction::Forward };
            let rec = reader.read_next(direction).map_err(|e| e.to_string())?;
            println!("{}\t{} metric(s)", rec.timestamp, rec.value_sets.len());
        }
        Commands::Scan { base } => {
            let mut archive = Archive::open(&base).map_err(|e| e.to_string())?;
            let end = scan_archive_end(&mut archive, true).map_err(|e| e.to_string())?;
            println!("last good record: {end}");
            println!("reads so far (process-wide): {}", parchive::diag::snapshot().reads);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
