use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dicom_deident::config::{ConfigBuilder, ExtractOptions, UidRoot};
use dicom_deident::{extract, metrics, tags, values, Deidentifier};
use env_logger::Builder;
use log::{Level, LevelFilter};

/// De-identify DICOM file trees while preserving the patient/study/series/
/// instance hierarchy
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Show more verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full de-identification pipeline over a directory
    Deident {
        /// Input directory with the original DICOM files
        #[arg(short, long, value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Output directory for the de-identified tree
        #[arg(short, long, value_name = "OUTPUT_DIR")]
        output: PathBuf,

        /// UID root used as prefix for generated UIDs (default: '9999')
        #[arg(short, long, env = "DCMDEIDENT_UID_ROOT")]
        uid_root: Option<String>,

        /// First value of the surrogate patient counter
        #[arg(long, default_value_t = 1)]
        start_patient: u64,

        /// First value of the surrogate study/accession counter
        #[arg(long, default_value_t = 1)]
        start_study: u64,

        /// Number of worker threads (0 = one per core)
        #[arg(short = 'w', long, default_value_t = 0)]
        max_workers: usize,

        /// Tags allowed to survive into the output, e.g. "Modality,Rows"
        /// (default: the built-in CT allow list)
        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        allow: Vec<String>,

        /// Write the original-to-surrogate audit table to this CSV file
        #[arg(short, long, value_name = "CSV_PATH")]
        table: Option<PathBuf>,
    },

    /// Extract a tag table from a directory and write it as CSV
    Extract {
        /// Input directory
        #[arg(short, long, value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Tags to extract, e.g. "PatientID,StudyInstanceUID"
        /// (default: the identifying header tags)
        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        tags: Vec<String>,

        /// Output CSV file ('-' or absent for stdout)
        #[arg(short, long, value_name = "CSV_PATH")]
        output: Option<PathBuf>,

        /// Also read pixel data instead of stopping at the header
        #[arg(long)]
        read_pixels: bool,
    },

    /// Dump every distinct element value found in a directory, sequences
    /// included
    DumpValues {
        /// Input directory
        #[arg(short, long, value_name = "INPUT_DIR")]
        input: PathBuf,

        /// Output text file, one value per line
        #[arg(short, long, default_value = "unique_values.txt")]
        output: PathBuf,
    },

    /// Summarize a batch (file/patient/study/series counts) into a CSV log
    Metrics {
        /// Input directory
        #[arg(short, long, value_name = "INPUT_DIR")]
        input: PathBuf,

        /// CSV log to append the summary row to
        #[arg(short, long, value_name = "CSV_PATH")]
        output: Option<PathBuf>,

        /// Print the summary as JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let log_level = if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    let mut builder = Builder::from_default_env();
    builder
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "Error",
                Level::Warn => "Warning",
                Level::Info => "Info",
                Level::Debug => "Debug",
                Level::Trace => "Trace",
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .filter(None, log_level);
    builder.init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Deident {
            input,
            output,
            uid_root,
            start_patient,
            start_study,
            max_workers,
            allow,
            table,
        } => {
            if !input.is_dir() {
                bail!("input path should be an existing directory");
            }

            let mut config_builder = ConfigBuilder::new()
                .start_patient(start_patient)
                .start_study(start_study)
                .max_workers(max_workers);

            if let Some(uid_root) = uid_root {
                match uid_root.parse::<UidRoot>() {
                    Ok(uid_root) => config_builder = config_builder.uid_root(uid_root),
                    Err(e) => bail!(e),
                }
            }
            if !allow.is_empty() {
                config_builder = config_builder.allow_list(allow);
            }

            let deidentifier = Deidentifier::new(config_builder.build());
            let outcome = deidentifier.run(&input, &output)?;

            if let Some(table_path) = table {
                let file = File::create(&table_path)
                    .with_context(|| format!("failed to create {}", table_path.display()))?;
                outcome.table.write_csv(file)?;
            }

            println!(
                "{} of {} records written to {}",
                outcome.written,
                outcome.table.len(),
                output.display()
            );
            println!("last patient: {}", outcome.last_patient);
            println!("last study: {}", outcome.last_study);
        }

        Command::Extract {
            input,
            tags: tag_names,
            output,
            read_pixels,
        } => {
            let tag_names = if tag_names.is_empty() {
                tags::PHI_TAGS.iter().map(|s| s.to_string()).collect()
            } else {
                tag_names
            };
            let options = ExtractOptions {
                stop_before_pixels: !read_pixels,
            };
            let table = extract::extract(&input, &tag_names, &options)?;

            match output {
                Some(path) if path != PathBuf::from("-") => {
                    let file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    table.write_csv(file)?;
                }
                _ => table.write_csv(io::stdout().lock())?,
            }
        }

        Command::DumpValues { input, output } => {
            values::dump_unique_values(&input, &output)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }

        Command::Metrics {
            input,
            output,
            json,
        } => {
            let summary = metrics::summarize(&input)?;
            if let Some(path) = output {
                metrics::append_csv(&summary, &path)
                    .with_context(|| format!("failed to append to {}", path.display()))?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} files, {} patients, {} studies, {} series",
                    summary.files, summary.patients, summary.studies, summary.series
                );
            }
        }
    }

    Ok(())
}
