use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use abconv::config::{self, Config};
use abconv::convert::{self, ConvertRequest, OutputShape};
use abconv::country;
use abconv::error::PipelineError;
use abconv::format::{FormatToken, RecordError};
use abconv::transform::Transformations;

#[derive(Parser, Debug)]
#[command(name = "abconv", version, about = "Address book converter")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an address book into another format
    Convert(ConvertArgs),
    /// Print record counts of an address book
    Info(InfoArgs),
    /// Pair the records of two address books
    Compare(CompareArgs),
    /// List country rules for --intl-prefix
    Rules,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    #[arg(short, long, value_enum)]
    format: FormatToken,

    /// Overwrite an existing output file
    #[arg(short = 'w', long)]
    overwrite: bool,

    /// Write a single file even for directory input
    #[arg(short = 's', long)]
    single_file: bool,

    /// Write one file per record into a directory
    #[arg(short = 'd', long)]
    directory: bool,

    #[arg(long)]
    swap_names: bool,

    #[arg(long)]
    split_names: bool,

    #[arg(long)]
    generate_full_names: bool,

    #[arg(long)]
    drop_full_names: bool,

    #[arg(long)]
    reverse_full_names: bool,

    #[arg(long)]
    drop_slashes: bool,

    /// Replace national phone prefixes using this country rule
    #[arg(long, value_name = "RULE")]
    intl_prefix: Option<usize>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    #[arg(value_name = "PATH")]
    input: PathBuf,

    /// Print statistics as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(value_name = "LEFT")]
    left: PathBuf,

    #[arg(value_name = "RIGHT")]
    right: PathBuf,
}

fn main() -> ExitCode {
    // stdout carries reports only
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(failure) = err.downcast_ref::<PipelineError>() {
                print_errors(&failure.errors);
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Convert(args) => handle_convert(args, &config),
        Command::Info(args) => handle_info(&args, &config),
        Command::Compare(args) => handle_compare(&args.left, &args.right, &config),
        Command::Rules => {
            for (index, rule) in country::available_rules().iter().enumerate() {
                println!("{index}\t{rule}");
            }
            Ok(())
        }
    }
}

fn print_errors<'a>(errors: impl IntoIterator<Item = &'a RecordError>) {
    for err in errors {
        eprintln!("{err}");
    }
}

fn handle_convert(args: ConvertArgs, config: &Config) -> Result<()> {
    let request = ConvertRequest {
        input: args.input,
        output: args.output,
        format: args.format,
        shape: OutputShape::from_flags(args.single_file, args.directory)?,
        overwrite: args.overwrite,
        transforms: Transformations {
            swap_names: args.swap_names,
            split_names: args.split_names,
            generate_full_names: args.generate_full_names,
            drop_full_names: args.drop_full_names,
            reverse_full_names: args.reverse_full_names,
            drop_slashes: args.drop_slashes,
            intl_phone_prefix: None,
        },
        intl_prefix: args.intl_prefix,
    };

    let report = convert::convert(&request, config)?;
    print_errors(report.errors());
    println!(
        "Converted {} records ({} -> {}).",
        report.records,
        report.input_kind.label(),
        report.output_kind.label()
    );
    Ok(())
}

fn handle_info(args: &InfoArgs, config: &Config) -> Result<()> {
    let (stats, errors) = convert::info(&args.input, config)?;
    print_errors(&errors);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{stats}");
    }
    Ok(())
}

fn handle_compare(left: &Path, right: &Path, config: &Config) -> Result<()> {
    let report = convert::compare(left, right, config)?;
    print_errors(&report.errors);
    println!("{report}");
    Ok(())
}
