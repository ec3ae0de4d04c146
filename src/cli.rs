use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_THRESHOLD, DEFAULT_WORKERS};

#[derive(Parser, Debug)]
#[command(name = "zipshrink")]
#[command(version)]
#[command(about = "Shrink ZIP packages into shared blocks and repack them byte-for-byte", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipshrink shrink app.apk -o upload/app.apk -b upload/blocks      publish a build\n  \
  zipshrink fetch https://cdn.example.com/app/app.apk -c cache     rebuild from remote blocks\n  \
  zipshrink diff old.apk new.apk                                    show changed entries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-vv for trace)
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace large entries with block digests and store the blocks
    Shrink(ShrinkArgs),
    /// Rebuild the original archive from a stub and local blocks
    Repack(RepackArgs),
    /// Download missing blocks for a stub, then repack it
    Fetch(FetchArgs),
    /// List entries that are new or changed between two archives
    Diff(DiffArgs),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct ThresholdArg {
    /// Entries with a payload larger than this many bytes are extracted
    #[arg(short = 't', long = "threshold", value_name = "BYTES", default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: u64,
}

#[derive(Args, Debug)]
pub struct ShrinkArgs {
    /// Original archive
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Stub archive to write
    #[arg(short = 'o', long = "output", value_name = "STUB")]
    pub output: PathBuf,

    /// Block store directory
    #[arg(short = 'b', long = "blocks", value_name = "DIR")]
    pub blocks: PathBuf,

    /// Report the block of the entry with this exact name
    #[arg(long = "locate", value_name = "ENTRY")]
    pub locate: Vec<String>,

    /// Skip repacking the stub to verify it
    #[arg(long = "no-verify")]
    pub no_verify: bool,

    #[command(flatten)]
    pub threshold: ThresholdArg,
}

#[derive(Args, Debug)]
pub struct RepackArgs {
    /// Stub archive
    #[arg(value_name = "STUB")]
    pub stub: PathBuf,

    /// Reconstructed archive to write
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    /// Block store directory
    #[arg(short = 'b', long = "blocks", value_name = "DIR")]
    pub blocks: PathBuf,

    #[command(flatten)]
    pub threshold: ThresholdArg,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Stub archive path or HTTP URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Local block cache directory
    #[arg(short = 'c', long = "cache", value_name = "DIR", default_value = "cache")]
    pub cache: PathBuf,

    /// Output file, or directory if it has no extension
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Base serving blocks/<digest>: a URL or a local directory
    /// (default: origin of SOURCE)
    #[arg(long = "blocks-url", value_name = "BASE")]
    pub blocks_url: Option<String>,

    /// Number of concurrent download workers
    #[arg(short = 'j', long = "jobs", value_name = "N", default_value_t = DEFAULT_WORKERS)]
    pub jobs: usize,

    /// Attempts per block before giving up
    #[arg(long = "attempts", value_name = "N", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub attempts: u32,

    /// Base delay between attempts in milliseconds (n-th retry waits n times this)
    #[arg(long = "retry-delay-ms", value_name = "MS", default_value_t = 0)]
    pub retry_delay_ms: u64,

    #[command(flatten)]
    pub threshold: ThresholdArg,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Previous build
    #[arg(value_name = "BASE")]
    pub base: PathBuf,

    /// New build
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    #[command(flatten)]
    pub threshold: ThresholdArg,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Default log filter implied by `-q`/`-v`.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => "error",
            (1, _) => "warn",
            (_, 0) => "info",
            (_, 1) => "debug",
            _ => "trace",
        }
    }
}

impl FetchArgs {
    /// File name of the stub, taken from the last path segment of SOURCE.
    pub fn source_file_name(&self) -> String {
        let path = self.source.split(['?', '#']).next().unwrap_or(&self.source);
        path.rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or("package.zip")
            .to_string()
    }

    /// Where the reconstructed archive goes: the stub's file name by default;
    /// `-o` without an extension is a directory to place it in.
    pub fn output_path(&self) -> PathBuf {
        let file_name = self.source_file_name();
        match &self.output {
            None => PathBuf::from(file_name),
            Some(out) if out.extension().is_none() => out.join(file_name),
            Some(out) => out.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn fetch_args(cli: Cli) -> FetchArgs {
        match cli.command {
            Command::Fetch(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn fetch_defaults() {
        let args = fetch_args(parse(&["zipshrink", "fetch", "https://h/app-main/b.apk"]));
        assert_eq!(args.cache, PathBuf::from("cache"));
        assert_eq!(args.jobs, 5);
        assert_eq!(args.attempts, 3);
        assert_eq!(args.threshold.threshold, 4096);
        assert_eq!(args.output_path(), PathBuf::from("b.apk"));
    }

    #[test]
    fn fetch_output_directory_or_file() {
        let args = fetch_args(parse(&[
            "zipshrink", "fetch", "https://h/x/b.apk?sig=1", "-o", "out",
        ]));
        assert_eq!(args.output_path(), PathBuf::from("out").join("b.apk"));

        let args = fetch_args(parse(&["zipshrink", "fetch", "stub.apk", "-o", "out/app.apk"]));
        assert_eq!(args.output_path(), PathBuf::from("out/app.apk"));
    }

    #[test]
    fn log_level_follows_flags() {
        assert_eq!(parse(&["zipshrink", "diff", "a", "b"]).log_level(), "info");
        assert_eq!(parse(&["zipshrink", "-q", "diff", "a", "b"]).log_level(), "warn");
        assert_eq!(parse(&["zipshrink", "diff", "a", "b", "-qq"]).log_level(), "error");
        assert_eq!(parse(&["zipshrink", "-vv", "diff", "a", "b"]).log_level(), "trace");
    }

    #[test]
    fn shrink_requires_output_and_blocks() {
        assert!(Cli::try_parse_from(["zipshrink", "shrink", "a.apk"]).is_err());
        let cli = parse(&[
            "zipshrink", "shrink", "a.apk", "-o", "s.apk", "-b", "blocks", "--locate", "res/icon.png",
        ]);
        match cli.command {
            Command::Shrink(args) => {
                assert_eq!(args.locate, ["res/icon.png"]);
                assert!(!args.no_verify);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
