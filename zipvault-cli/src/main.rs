//! zipvault - ZIP archives with WinZip AES and ZipCrypto encryption
//!
//! Lists, extracts, creates, verifies and re-encodes ZIP and JAR archives.

mod commands;
mod utils;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    CompressionArg, CreateOptions, EncryptionArg, ExtractOptions, ListOptions, cmd_convert,
    cmd_create, cmd_detect, cmd_extract, cmd_list, cmd_test, default_output,
    resolve_writer_options,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use utils::Settings;
use zipvault_core::error::ZipError;

#[derive(Parser)]
#[command(name = "zipvault")]
#[command(author, version, about = "ZIP archives with AES and ZipCrypto encryption")]
#[command(long_about = "
zipvault reads and writes ZIP archives, including Zip64 and encrypted entries.

Examples:
  zipvault list archive.zip
  zipvault list --json archive.zip
  zipvault extract archive.zip -o out
  zipvault extract secret.zip --password hunter2 -I '*.txt'
  zipvault create archive.zip src README.md
  zipvault create -e aes256 secret.zip notes.txt
  zipvault test archive.zip
  zipvault convert old.zip new.zip -e aes256
  zipvault completions bash
")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON file with reader and writer settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List contents of an archive
    #[command(alias = "l")]
    List {
        /// Archive file to list
        archive: PathBuf,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,

        /// Include only entries matching pattern (glob syntax: *.txt, src/**/*)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,
    },

    /// Extract files from an archive
    #[command(alias = "x")]
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Entries to extract (all if empty)
        files: Vec<String>,

        /// Output directory (defaults to the archive name without extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include only entries matching pattern (glob syntax: *.txt, src/**/*)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,

        /// Password for encrypted entries (prompted for when missing)
        #[arg(short, long)]
        password: Option<String>,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Create a new archive
    #[command(alias = "c")]
    Create {
        /// Output archive file
        archive: PathBuf,

        /// Files and directories to add
        files: Vec<PathBuf>,

        /// Compression level
        #[arg(short = 'l', long, value_enum)]
        compression: Option<CompressionArg>,

        /// Encryption method
        #[arg(short, long, value_enum)]
        encryption: Option<EncryptionArg>,

        /// Password for encryption (prompted for when missing)
        #[arg(short, long)]
        password: Option<String>,

        /// Archive comment
        #[arg(long)]
        comment: Option<String>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Verify CRC-32 and authentication codes of every entry
    #[command(alias = "t")]
    Test {
        /// Archive file to test
        archive: PathBuf,

        /// Password for encrypted entries (prompted for when missing)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Detect whether a file is a ZIP container
    Detect {
        /// File to inspect
        file: PathBuf,
    },

    /// Re-encode an archive with new compression or encryption
    Convert {
        /// Input archive file
        input: PathBuf,

        /// Output archive file
        output: PathBuf,

        /// Password of the input archive
        #[arg(short, long)]
        password: Option<String>,

        /// Password for the output archive
        #[arg(long)]
        new_password: Option<String>,

        /// Compression level for output
        #[arg(short = 'l', long, value_enum)]
        compression: Option<CompressionArg>,

        /// Encryption method for output
        #[arg(short, long, value_enum)]
        encryption: Option<EncryptionArg>,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(cli.config.as_deref())?;
    let verbose = cli.verbose > 0;
    let mut reader_options = settings.reader;

    match cli.command {
        Commands::List {
            archive,
            json,
            include,
            exclude,
        } => {
            let options = ListOptions {
                verbose,
                json,
                include: &include,
                exclude: &exclude,
            };
            cmd_list(&archive, reader_options, &options)
        }
        Commands::Extract {
            archive,
            files,
            output,
            include,
            exclude,
            password,
            overwrite,
            no_progress,
        } => {
            if let Some(password) = password {
                reader_options.password = Some(password.into());
            }
            let output = output.unwrap_or_else(|| default_output(&archive));
            let options = ExtractOptions {
                output: &output,
                files: &files,
                include: &include,
                exclude: &exclude,
                overwrite,
                verbose,
                progress: !no_progress,
            };
            cmd_extract(&archive, reader_options, &options)
        }
        Commands::Create {
            archive,
            files,
            compression,
            encryption,
            password,
            comment,
            no_progress,
        } => {
            let writer =
                resolve_writer_options(settings.writer, compression, encryption, password, comment)?;
            let options = CreateOptions {
                writer,
                verbose,
                progress: !no_progress,
            };
            cmd_create(&archive, &files, options)
        }
        Commands::Test { archive, password } => {
            if let Some(password) = password {
                reader_options.password = Some(password.into());
            }
            cmd_test(&archive, reader_options, verbose)
        }
        Commands::Detect { file } => cmd_detect(&file),
        Commands::Convert {
            input,
            output,
            password,
            new_password,
            compression,
            encryption,
        } => {
            if let Some(password) = password {
                reader_options.password = Some(password.into());
            }
            let writer =
                resolve_writer_options(settings.writer, compression, encryption, new_password, None)?;
            cmd_convert(&input, &output, reader_options, writer, verbose)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "zipvault", &mut io::stdout());
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        let password_problem = e
            .downcast_ref::<ZipError>()
            .is_some_and(ZipError::is_password_error);
        std::process::exit(if password_problem { 2 } else { 1 });
    }
}
