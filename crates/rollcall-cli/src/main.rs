use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::{FaceProbe, Matcher, Verdict};
use rollcall_store::{samples, AttendanceLedger, AttendanceRecord, Config, GalleryStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the gallery from the sample directory
    Train,
    /// Classify the faces in a JSON file and mark recognized people present
    Recognize {
        /// Array of {"location": {...}, "embedding": [...]} objects
        faces: PathBuf,
        /// Classify only; do not touch the attendance ledger
        #[arg(long)]
        no_mark: bool,
    },
    /// Show today's attendance
    Today,
    /// Show attendance for a date (YYYY-MM-DD)
    Show {
        date: NaiveDate,
    },
    /// List every attendance record, newest first
    History,
    /// List identities in the sample directory
    Students,
    /// Show gallery and configuration summary
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    tracing::debug!(
        gallery = %config.gallery_path.display(),
        attendance = %config.attendance_dir.display(),
        samples = %config.samples_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Train => {
            let store = GalleryStore::open(&config.gallery_path)?;
            let samples = samples::scan_samples(&config.samples_dir)
                .with_context(|| format!("scanning {}", config.samples_dir.display()))?;
            let outcome = store.train(&config.engine.trainer(), samples)?;
            let trained = outcome.is_trained();
            let report = outcome.into_report();

            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "trained": trained,
                        "encoded": report.encoded,
                        "rejected": report.rejected,
                        "skipped_identities": report.skipped_identities,
                    })
                );
            } else {
                for (identity, count) in &report.encoded {
                    println!("  {identity}: {count} embedding(s)");
                }
                for identity in &report.skipped_identities {
                    println!("  {identity}: skipped (no usable embeddings)");
                }
                if trained {
                    println!(
                        "Saved gallery with {} identities to {}",
                        report.gallery.len(),
                        store.path().display()
                    );
                } else {
                    println!("No trainable identities in {}", config.samples_dir.display());
                }
            }
        }
        Commands::Recognize { faces, no_mark } => {
            let raw = std::fs::read(&faces)
                .with_context(|| format!("reading {}", faces.display()))?;
            let faces: Vec<FaceProbe> =
                serde_json::from_slice(&raw).context("parsing face list")?;

            let store = GalleryStore::open(&config.gallery_path)?;
            let gallery = store.snapshot();
            let matcher = config.engine.matcher();
            let results = matcher.classify_faces(&faces, &gallery, config.engine.threshold);

            let mut present = Vec::new();
            for (face, result) in faces.iter().zip(&results) {
                let b = face.location;
                let at = format!("[{}, {}, {}, {}]", b.top, b.right, b.bottom, b.left);
                match result {
                    Ok(m) => match &m.verdict {
                        Verdict::Recognized { identity, distance } => {
                            present.push(identity.clone());
                            if !cli.json {
                                println!(
                                    "{at} {identity} (distance {distance:.3}, confidence {:.1}%)",
                                    (1.0 - distance) * 100.0
                                );
                            }
                        }
                        Verdict::Unknown { distance } => {
                            if !cli.json {
                                println!("{at} unknown (best distance {distance:.3})");
                            }
                        }
                    },
                    Err(e) => {
                        if !cli.json {
                            println!("{at} rejected: {e}");
                        }
                    }
                }
            }

            let attendance = if no_mark || present.is_empty() {
                None
            } else {
                let ledger = AttendanceLedger::open(&config.attendance_dir)?
                    .with_retry(config.lock_retry);
                Some(ledger.mark_present(&present, Local::now().naive_local())?)
            };

            if cli.json {
                let results: Vec<serde_json::Value> = results
                    .iter()
                    .map(|r| match r {
                        Ok(m) => serde_json::json!(m),
                        Err(e) => serde_json::json!({ "error": e.to_string() }),
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({ "results": results, "attendance": attendance })
                );
            } else if let Some(record) = attendance {
                println!("Marked present for {}: {}", record.date, present.join(", "));
            }
        }
        Commands::Today => {
            let ledger = AttendanceLedger::open(&config.attendance_dir)?;
            print_record(&ledger.today()?, cli.json)?;
        }
        Commands::Show { date } => {
            let ledger = AttendanceLedger::open(&config.attendance_dir)?;
            print_record(&ledger.get(date)?, cli.json)?;
        }
        Commands::History => {
            let ledger = AttendanceLedger::open(&config.attendance_dir)?;
            let records = ledger.list_all()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No attendance recorded");
            } else {
                for record in &records {
                    println!("{}: {} present", record.date, record.len());
                }
            }
        }
        Commands::Students => {
            let roster = samples::list_identities(&config.samples_dir)?;
            if cli.json {
                println!("{}", serde_json::to_string(&roster)?);
            } else {
                for identity in roster {
                    println!("{identity}");
                }
            }
        }
        Commands::Status => {
            let store = GalleryStore::open(&config.gallery_path)?;
            let gallery = store.snapshot();
            let status = serde_json::json!({
                "gallery": store.path(),
                "identities": gallery.len(),
                "references": gallery.reference_count(),
                "threshold": config.engine.threshold,
                "vector_dim": config.engine.vector_dim,
                "metric": config.engine.metric,
                "attendance_dir": config.attendance_dir,
                "samples_dir": config.samples_dir,
            });
            if cli.json {
                println!("{status}");
            } else {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
        }
    }

    Ok(())
}

fn print_record(record: &AttendanceRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    println!("Attendance for {} ({} present)", record.date, record.len());
    for (identity, entry) in &record.records {
        println!("  {identity}: {:?} at {}", entry.status, entry.timestamp.format("%H:%M:%S"));
    }
    Ok(())
}
