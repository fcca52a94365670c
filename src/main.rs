use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use songform::analyzer::{TrackAnalysis, groove::DriftStatistics};
use songform::db::{Database, FingerprintStore};
use songform::fingerprint::{self, StructureFingerprint};
use songform::similarity;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "songform", version, about = "Song structure fingerprinting from onset data")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze onset files and store their structure fingerprints
    Analyze {
        /// Files or directories to analyze (defaults to config file onset_dirs)
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Analyze one onset file and print the report without storing it
    Inspect {
        file: PathBuf,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find stored songs with the most similar structure
    Similar {
        song_id: String,

        /// Number of results (defaults to config similarity.top_k)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Break down the structural distance between two stored songs
    Compare { a: String, b: String },

    /// Group stored songs by fingerprint vector
    Clusters {
        /// Euclidean distance threshold (defaults to config similarity.cluster_threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Show a stored fingerprint
    Show { song_id: String },

    /// Show fingerprint store statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = songform::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(songform::config::default_db_path);

    match cli.command {
        Commands::Analyze { paths, jobs } => {
            let roots = if !paths.is_empty() {
                paths
            } else if !config.onset_dirs.is_empty() {
                config.onset_dirs.clone()
            } else {
                anyhow::bail!(
                    "No onset files to analyze. Pass paths as arguments or set onset_dirs in config."
                );
            };

            let mut db = open_db(&db_path)?;
            let files = songform::scanner::discover(&roots);
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result =
                songform::analyzer::analyze_files(&mut db, &files, workers, &config.analysis)
                    .context("Analysis failed")?;
            println!(
                "Analysis complete: {} analyzed, {} failed",
                result.analyzed, result.failed
            );
        }

        Commands::Inspect { file, json } => {
            let track = songform::scanner::load(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let analysis = songform::analyzer::analyze_track(&track, &config.analysis)
                .with_context(|| format!("Analysis of {} failed", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                print_analysis(&analysis);
            }
        }

        Commands::Similar { song_id, limit } => {
            let db = open_db(&db_path)?;
            let query = require(&db, &song_id)?;
            let corpus = db.all().context("Failed to load fingerprints")?;
            let results = similarity::rank(
                &query,
                &corpus,
                limit.unwrap_or(config.similarity.top_k),
            );

            if results.is_empty() {
                println!("No other fingerprints stored.");
                return Ok(());
            }

            println!(
                "Songs structurally similar to \"{}\" ({}):",
                song_id,
                query.structure_string()
            );
            println!();
            println!("{:<30} {:>8} {:>7} {:>5}  {}", "Song", "Dist", "BPM", "Mtr", "Form");
            println!("{}", "-".repeat(70));
            for r in &results {
                let fp = corpus.iter().find(|f| f.song_id == r.song_id);
                println!(
                    "{:<30} {:>8.4} {:>7.1} {:>5}  {}",
                    truncate(&r.song_id, 30),
                    r.distance,
                    fp.map_or(0.0, |f| f.tempo),
                    fp.map_or("?", |f| f.meter.as_str()),
                    fp.map(|f| f.structure_string()).unwrap_or_default(),
                );
            }
        }

        Commands::Compare { a, b } => {
            let db = open_db(&db_path)?;
            let fa = require(&db, &a)?;
            let fb = require(&db, &b)?;
            print_comparison(&fa, &fb);
        }

        Commands::Clusters { threshold } => {
            let db = open_db(&db_path)?;
            let corpus = db.all().context("Failed to load fingerprints")?;
            if corpus.is_empty() {
                println!("No fingerprints stored. Run `songform analyze` first.");
                return Ok(());
            }

            let threshold = threshold.unwrap_or(config.similarity.cluster_threshold);
            let vectors: Vec<_> = corpus.iter().map(fingerprint::vectorize).collect();
            let clusters = fingerprint::cluster_fingerprints(&vectors, threshold);

            println!(
                "{} songs in {} clusters (threshold {:.2}):",
                corpus.len(),
                clusters.len(),
                threshold
            );
            for (i, members) in clusters.iter().enumerate() {
                println!();
                println!("Cluster {} ({} songs)", i + 1, members.len());
                for &m in members {
                    let fp = &corpus[m];
                    println!(
                        "  {:<30} {:>6.1} BPM  {:<8} {}",
                        truncate(&fp.song_id, 30),
                        fp.tempo,
                        fp.structure_string(),
                        fingerprint::infer_archetype(fp)
                    );
                }
            }
        }

        Commands::Show { song_id } => {
            let db = open_db(&db_path)?;
            let fp = require(&db, &song_id)?;
            print_fingerprint(&fp);
        }

        Commands::Stats => {
            let db = open_db(&db_path)?;
            let stats = db.stats().context("Failed to get stats")?;
            println!("Fingerprint Store Statistics");
            println!("============================");
            println!("Fingerprints:     {}", stats.fingerprints);
            println!("Total duration:   {:.1} hours", stats.total_duration_hours);
            if let Some(tempo) = stats.mean_tempo {
                println!("Mean tempo:       {:.1} BPM", tempo);
            }
            println!();

            for (title, rows) in [
                ("Archetypes:", &stats.archetypes),
                ("Meters:", &stats.meters),
                ("Common forms:", &stats.forms),
            ] {
                if rows.is_empty() {
                    continue;
                }
                println!("{}", title);
                for (value, count) in rows {
                    println!("  {:<20} {}", value, count);
                }
                println!();
            }
        }
    }

    Ok(())
}

fn open_db(path: &Path) -> Result<Database> {
    log::info!("Database: {}", path.display());
    Database::open(path).context("Failed to open database")
}

fn require(db: &Database, song_id: &str) -> Result<StructureFingerprint> {
    db.get(song_id)
        .context("Failed to load fingerprint")?
        .with_context(|| format!("No fingerprint stored for \"{}\"", song_id))
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn print_analysis(a: &TrackAnalysis) {
    println!("{} ({:.1}s, {} onsets)", a.track_id, a.duration, a.tempo.num_onsets);
    println!();
    println!(
        "Tempo:      {:.1} BPM perceived (estimate {:.1}, confidence {:.2})",
        a.tempo.perceived_bpm, a.tempo.estimated_bpm, a.tempo.perceived_confidence
    );
    println!(
        "Meter:      {} (confidence {:.2})",
        a.meter.time_signature, a.meter.confidence
    );
    println!(
        "Groove:     {:.1} ms mean, {:.1} ms std, swing {}",
        a.groove.mean_abs_deviation_ms,
        a.groove.std_deviation_ms,
        a.groove
            .swing_ratio
            .map_or("n/a".to_string(), |s| format!("{:.2}", s))
    );
    match a.tempo_drift.as_ref().map(|d| &d.statistics) {
        Some(DriftStatistics::Stable(s)) => println!(
            "Drift:      {:+.2} BPM mean, {:.2} max ({:?})",
            s.mean_deviation_bpm, s.max_deviation_bpm, s.bias
        ),
        Some(DriftStatistics::Insufficient { stable_windows, note }) => {
            println!("Drift:      {} ({} windows)", note, stable_windows)
        }
        None => println!("Drift:      no stable windows"),
    }
    println!();

    if !a.rhythm_hierarchy.layers.is_empty() {
        println!("Rhythm layers:");
        for layer in &a.rhythm_hierarchy.layers {
            println!(
                "  {:<18} {:>7.1} BPM  strength {:.2}",
                layer.level.as_str(),
                layer.bpm,
                layer.strength
            );
        }
        println!();
    }

    print_fingerprint(&a.fingerprint);
}

fn print_fingerprint(fp: &StructureFingerprint) {
    println!(
        "{}: {:.1} BPM {}, form {} ({})",
        fp.song_id,
        fp.tempo,
        fp.meter,
        fp.structure_string(),
        fingerprint::infer_archetype(fp)
    );
    println!(
        "Choruses: {} ({:.0}% of {:.1}s)",
        fp.chorus_count,
        fp.chorus_ratio * 100.0,
        fp.duration
    );
    println!();
    println!(
        "{:>3} {:>8} {:>8}  {:<12} {:>7} {:>7}",
        "Tok", "Start", "End", "Label", "Dens", "GrvStd"
    );
    println!("{}", "-".repeat(52));
    for (i, s) in fp.sections.iter().enumerate() {
        println!(
            "{:>3} {:>8.1} {:>8.1}  {:<12} {:>7.2} {:>7.1}",
            fp.structure.get(i).copied().unwrap_or('?'),
            s.section.start,
            s.section.end,
            s.label.as_str(),
            s.section.mean_density,
            s.section.mean_groove_std,
        );
    }
}

fn print_comparison(a: &StructureFingerprint, b: &StructureFingerprint) {
    let breakdown = similarity::similarity_breakdown(a, b);
    println!(
        "\"{}\" ({}) vs \"{}\" ({})",
        a.song_id,
        a.structure_string(),
        b.song_id,
        b.structure_string()
    );
    println!();
    println!("Topology:     {:.4}", breakdown.topology);
    println!("Energy arc:   {:.4}", breakdown.energy_arc);
    println!("Tempo/meter:  {:.4}", breakdown.tempo_meter);
    println!("Groove:       {:.4}", breakdown.groove);
    println!("Distance:     {:.4}", breakdown.total);
    println!();

    let per_label = similarity::compare_sections(&a.sections, &b.sections, a.duration, b.duration);
    if per_label.is_empty() {
        println!("No section labels in common.");
        return;
    }
    println!("Section distance by label:");
    for (label, dist) in &per_label {
        println!("  {:<12} {:.4}", label.as_str(), dist);
    }
    if let Some(overall) = similarity::weighted_overall_similarity(&per_label) {
        println!("  {:<12} {:.4}", "weighted", overall);
    }

    if let Some(chorus) =
        similarity::chorus_only_similarity(&a.sections, &b.sections, a.duration, b.duration)
    {
        println!();
        println!("Chorus distance: {:.4}", chorus);
        if let Some(gaps) =
            similarity::explain_chorus_similarity(&a.sections, &b.sections, a.duration, b.duration)
        {
            let reasons: Vec<String> = gaps
                .iter()
                .map(|(name, gap)| format!("{} ({:.2})", name, gap))
                .collect();
            println!("Biggest differences: {}", reasons.join(", "));
        }
    }
}
