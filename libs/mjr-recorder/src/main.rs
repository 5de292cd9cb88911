use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use mjr_recorder::{MediaKind, Recorder, RecorderConfig, SinkConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(
        long,
        value_enum,
        default_value = "info",
        global = true,
        help = "Log level (error, warn, info, debug, trace)"
    )]
    log_level: LogLevel,
}

#[derive(Subcommand, Clone)]
enum Commands {
    #[command(about = "Record fixed-size frames read from a file or stdin")]
    Record(RecordArgs),
    #[command(about = "List supported codecs")]
    Codecs,
}

#[derive(clap::Args, Clone, Debug)]
struct RecordArgs {
    #[clap(long, help = "Codec of the recorded frames (e.g. opus, vp8, text)")]
    codec: String,
    #[clap(long, short, help = "Input file, stdin when omitted")]
    input: Option<PathBuf>,
    #[clap(long, help = "Directory to record into")]
    dir: Option<PathBuf>,
    #[clap(long, help = "Recording name without extension, random when omitted")]
    name: Option<String>,
    #[clap(
        long,
        default_value_t = 1024,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Payload bytes per frame"
    )]
    frame_size: u16,
    #[clap(long, help = "Remote archive endpoint (host[:port]) instead of a local file")]
    remote: Option<String>,
    #[clap(long, help = "Write under a temporary name and rename on close")]
    temp_names: bool,
    #[clap(long, help = "Temporary extension, implies --temp-names")]
    temp_ext: Option<String>,
    #[clap(long, help = "Path to a JSON recorder configuration file")]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

const CODECS: &[&str] = &["vp8", "vp9", "h264", "opus", "g711", "pcmu", "pcma", "g722", "text"];

fn main() -> miette::Result<()> {
    let args = Cli::parse();
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::builder().from_env_lossy()
    } else {
        EnvFilter::builder().parse_lossy(format!("mjr_recorder={}", args.log_level.as_str()))
    };

    let _ = tracing_subscriber::fmt::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ))
        .try_init();

    match args.command {
        Commands::Record(args) => record(args),
        Commands::Codecs => {
            for codec in CODECS {
                if let Some(kind) = MediaKind::from_codec(codec) {
                    println!("{codec:<6} {kind}");
                }
            }
            Ok(())
        }
    }
}

fn record(args: RecordArgs) -> miette::Result<()> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::read(path)?,
        None => RecorderConfig::default(),
    };
    if args.temp_names || args.temp_ext.is_some() {
        config = config.with_temp_names(args.temp_ext.as_deref());
    }
    if let Some(endpoint) = args.remote {
        config = config.with_sink(SinkConfig::remote(endpoint));
    }

    let mut input: Box<dyn Read> = match &args.input {
        Some(path) => Box::new(File::open(path).into_diagnostic()?),
        None => Box::new(io::stdin().lock()),
    };

    let recorder = Recorder::create(
        &config,
        args.dir.as_deref(),
        &args.codec,
        args.name.as_deref(),
    )?;
    let mut buf = vec![0u8; args.frame_size as usize];
    let result = loop {
        let n = match read_frame(&mut input, &mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(miette::miette!("failed to read input: {err}")),
        };
        if let Err(err) = recorder.append(&buf[..n]) {
            break Err(miette::Report::from(err));
        }
    };

    recorder.close()?;
    let finished = recorder.get()?;
    let path = finished.path();
    info!(
        path = %path.display(),
        frames = finished.frames_written(),
        bytes = finished.committed_len(),
        "recording finished"
    );
    println!("{}", path.display());
    drop(finished);
    recorder.destroy();
    result
}

/// Fills `buf` from `reader`, stopping early only at end of input.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
