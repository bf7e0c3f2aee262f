use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{EnrollOutcome, Engine, MarkOutcome};
use rollcall_store::{AttendanceLog, RecordStore, SessionTag};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition classroom attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from a batch of reference photos
    Enroll {
        /// Student identifier (PRN)
        #[arg(long)]
        id: String,
        /// Student display name
        #[arg(long)]
        name: String,
        /// Image files or directories of images
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Mark attendance from a classroom photo
    Mark {
        /// Classroom photo
        #[arg(long)]
        image: PathBuf,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// List enrolled students
    List,
    /// Print the attendance log of a session
    Report {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Show configuration and store status
    Status,
}

#[derive(Args)]
struct SessionArgs {
    #[arg(long)]
    subject: String,
    #[arg(long = "class")]
    class_no: String,
    #[arg(long)]
    department: String,
    #[arg(long)]
    year: String,
}

impl From<SessionArgs> for SessionTag {
    fn from(a: SessionArgs) -> Self {
        SessionTag::new(a.subject, a.class_no, a.department, a.year)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Enroll { id, name, images } => {
            let paths = collect_image_paths(&images)?;
            let frames = paths
                .iter()
                .map(|p| {
                    image::open(p)
                        .map(|img| img.to_rgb8())
                        .with_context(|| format!("cannot decode {}", p.display()))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut engine = Engine::load(config)?;
            match engine.enroll(&id, &name, &frames)? {
                EnrollOutcome::Enrolled { id, images_used, images_skipped } => println!(
                    "Enrolled {name} ({id}) from {images_used} image(s), {images_skipped} skipped"
                ),
                EnrollOutcome::NoUsableImages { images_skipped } => println!(
                    "No face found in any of {images_skipped} image(s); {id} not enrolled"
                ),
            }
            engine.shutdown();
        }
        Commands::Mark { image, session } => {
            let session = SessionTag::from(session);
            let mut engine = Engine::load(config)?;
            match engine.mark_attendance(&image, &session)? {
                MarkOutcome::Marked { log_path, matches, faces } => {
                    for m in &matches {
                        println!("Matched: {} (PRN: {})", m.name, m.id);
                    }
                    println!(
                        "{} of {faces} face(s) matched; attendance saved to {}",
                        matches.len(),
                        log_path.display()
                    );
                }
                MarkOutcome::NoMatches { faces } => {
                    println!("{faces} face(s) detected, no matches; attendance not marked")
                }
                MarkOutcome::NoFaces => println!("No faces detected in the image"),
                MarkOutcome::FileNotFound(path) => println!("File not found: {}", path.display()),
            }
            engine.shutdown();
        }
        Commands::List => {
            let store = RecordStore::open(&config.db_path)?;
            let people: Vec<_> = store
                .all()?
                .into_iter()
                .map(|p| serde_json::json!({ "id": p.id, "name": p.name, "dim": p.embedding.dim() }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&people)?);
        }
        Commands::Report { session } => {
            let session = SessionTag::from(session);
            let log = AttendanceLog::new(&config.attendance_dir);
            let rows = log.read(&session)?;
            if rows.is_empty() {
                println!("No attendance recorded for this session");
            }
            for r in rows {
                println!("{}\t{}\t{}", r.timestamp, r.id, r.name);
            }
        }
        Commands::Status => {
            let enrolled = RecordStore::open(&config.db_path)?.count()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "enrolled": enrolled,
                    "detector_model": config.detector_model_path(),
                    "embedder_model": config.embedder_model_path(),
                    "config": config,
                }))?
            );
        }
    }

    Ok(())
}

/// Expand directories into their image files (sorted by name); keep files as given.
fn collect_image_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("cannot read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            found.sort();
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_mark_command() {
        let cli = Cli::try_parse_from([
            "rollcall", "mark", "--image", "class.jpg", "--subject", "Maths",
            "--class", "10", "--department", "CS", "--year", "2024",
        ])
        .unwrap();
        let Commands::Mark { image, session } = cli.command else {
            panic!("expected mark");
        };
        assert_eq!(image, PathBuf::from("class.jpg"));
        assert_eq!(SessionTag::from(session), SessionTag::new("Maths", "10", "CS", "2024"));
    }

    #[test]
    fn collects_images_from_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["b.png", "a.JPG", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let extra = PathBuf::from("extra.jpg");
        let paths = collect_image_paths(&[dir.path().to_path_buf(), extra.clone()]).unwrap();
        assert_eq!(paths, vec![dir.path().join("a.JPG"), dir.path().join("b.png"), extra]);
    }
}
