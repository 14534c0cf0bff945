use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use picorg::broadcast::{ImportPhase, ImportProgressEvent};
use picorg::db::image_repo;
use picorg::{
    ClassificationStatus, Config, ImageFilter, JobSnapshot, JobStatus, Library, UNCATEGORIZED,
};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{info, warn};

use crate::cli::{CategoryCommands, Commands, ImagesArgs, ImportArgs, OutputArgs};

/// Exit status of an import stopped with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

pub fn dispatch(command: Commands, config: Config) -> anyhow::Result<ExitCode> {
    // Printing the configuration must not create a database.
    if let Commands::PrintConfig = command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let library = Library::open(config).context("Failed to open library")?;

    match command {
        Commands::Import(args) => import(&library, args),
        Commands::Duplicates(output) => duplicates(&library, output),
        Commands::Retry { include_pending } => {
            let summary = library.pipeline().retry_failed(include_pending)?;
            println!(
                "{} attempted, {} classified, {} failed",
                summary.attempted, summary.classified, summary.failed
            );
            Ok(exit_for_errors(summary.failed))
        }
        Commands::Prune { prefix } => {
            let summary = library.pipeline().prune_missing(prefix.as_deref())?;
            println!("{} checked, {} removed", summary.checked, summary.removed);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Images(args) => images(&library, args),
        Commands::Months(output) => months(&library, output),
        Commands::Remove { path } => {
            if library.pipeline().remove_image(&resolve(&path))? {
                println!("Removed {}", path.display());
            } else {
                println!("Not in library: {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Categories(command) => categories(&library, command),
        Commands::PrintConfig => Ok(ExitCode::SUCCESS),
    }
}

fn import(library: &Library, args: ImportArgs) -> anyhow::Result<ExitCode> {
    let mut options = library.config().import.clone();
    if args.no_recursive {
        options.recursive = false;
    }
    if args.no_classify {
        options.classify = false;
    }
    if args.rescan {
        options.skip_known = false;
    }
    if args.no_thumbnails {
        options.thumbnails = false;
    }
    if !args.extensions.is_empty() {
        options.extensions = args.extensions;
    }
    options.exclude.extend(args.exclude);

    // Subscribe before starting so no event is missed.
    let events = args.progress.then(|| library.progress().subscribe());

    let handle = library.importer().start(&args.root, options)?;
    info!("Import {} started", handle.id());

    let job = Arc::clone(handle.job());
    ctrlc::set_handler(move || {
        warn!("Interrupted, finishing files in flight...");
        job.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let printer = events.map(|rx| {
        let job_id = handle.id().to_string();
        thread::spawn(move || print_progress(rx, &job_id))
    });

    let snapshot = handle.wait();
    if let Some(printer) = printer {
        let _ = printer.join();
    }

    if args.output.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_import_summary(&snapshot);
    }

    Ok(match snapshot.status {
        JobStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
        JobStatus::Failed => ExitCode::FAILURE,
        _ => exit_for_errors(snapshot.progress.errors + snapshot.scan_errors.len()),
    })
}

fn print_progress(mut rx: Receiver<ImportProgressEvent>, job_id: &str) {
    loop {
        match rx.blocking_recv() {
            Ok(event) if event.job_id != job_id => {}
            Ok(event) => match (event.path.as_deref(), event.phase) {
                (None, ImportPhase::Finished) => break,
                (Some(path), ImportPhase::Imported) => {
                    let category = event.category.as_deref().unwrap_or("-");
                    eprintln!("  imported  {}  [{}]", path, category);
                    if let Some(error) = event.error {
                        eprintln!("            {}", error);
                    }
                }
                (Some(path), ImportPhase::Skipped) => eprintln!("  skipped   {}", path),
                (Some(path), ImportPhase::Failed) => eprintln!(
                    "  failed    {}  {}",
                    path,
                    event.error.as_deref().unwrap_or("")
                ),
                (None, phase) => eprintln!("{}: {}", phase, event.message),
                _ => {}
            },
            Err(RecvError::Lagged(missed)) => eprintln!("  ({} progress events dropped)", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_import_summary(snapshot: &JobSnapshot) {
    let p = snapshot.progress;
    println!("Import {} {}", snapshot.id, snapshot.status);
    println!("  root:      {}", snapshot.root.display());
    println!("  files:     {}", p.total);
    println!("  imported:  {}", p.imported);
    println!("  skipped:   {}", p.skipped);
    println!("  errors:    {}", p.errors);

    let failures = snapshot.failures();
    if !failures.is_empty() {
        println!("Failures:");
        for (path, reason) in failures {
            println!("  {}: {}", path.display(), reason);
        }
    }
    if !snapshot.scan_errors.is_empty() {
        println!("Scan errors:");
        for e in &snapshot.scan_errors {
            println!("  {} ({}): {}", e.path.display(), e.kind, e.reason);
        }
    }
    if let Some(error) = &snapshot.error {
        println!("Error: {}", error);
    }
}

fn duplicates(library: &Library, output: OutputArgs) -> anyhow::Result<ExitCode> {
    let groups = library.index().groups();

    if output.json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(ExitCode::SUCCESS);
    }

    for group in &groups {
        println!("{} ({} copies)", group.fingerprint.short(), group.len());
        for path in &group.paths {
            println!("  {}", path.display());
        }
    }
    let redundant: usize = groups.iter().map(|g| g.redundant_copies()).sum();
    println!(
        "{} duplicate group(s), {} redundant file(s)",
        groups.len(),
        redundant
    );
    Ok(ExitCode::SUCCESS)
}

fn images(library: &Library, args: ImagesArgs) -> anyhow::Result<ExitCode> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<ClassificationStatus>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let filter = ImageFilter {
        category: args.category,
        status,
        search: args.search,
        path_prefix: args.under.as_deref().map(resolve),
        has_fingerprint: None,
        taken_month: args.month,
    };

    let total = image_repo::count(library.database(), &filter)?;
    let page = library
        .store()
        .list_images(&filter, args.after.as_deref(), args.limit)?;

    if args.output.json {
        println!("{}", serde_json::to_string_pretty(&page.images)?);
    } else {
        for image in &page.images {
            println!(
                "{:<10} {:<20} {}",
                image.status.as_str(),
                image.category.as_deref().unwrap_or(UNCATEGORIZED),
                image.path.display()
            );
            if let Some(description) = &image.description {
                println!("{:<31} {}", "", description);
            }
            if let Some(taken_at) = image.capture.taken_at {
                let camera = image.capture.camera.as_deref().unwrap_or("unknown camera");
                println!("{:<31} {} with {}", "", taken_at.format("%Y-%m-%d %H:%M"), camera);
            }
        }
        println!("{} of {} matching image(s)", page.images.len(), total);
    }
    if let Some(cursor) = page.next_cursor {
        eprintln!("More: --after '{}'", cursor);
    }
    Ok(ExitCode::SUCCESS)
}

fn months(library: &Library, output: OutputArgs) -> anyhow::Result<ExitCode> {
    let months = library.store().month_counts()?;
    if output.json {
        println!("{}", serde_json::to_string_pretty(&months)?);
    } else {
        for month in &months {
            println!("{}  {:<16} {:>6}", month.month, month.label(), month.count);
        }
        if months.is_empty() {
            println!("No images with a capture date");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn categories(library: &Library, command: CategoryCommands) -> anyhow::Result<ExitCode> {
    let registry = library.categories();
    match command {
        CategoryCommands::List(output) => {
            let summaries = registry.list()?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for s in summaries {
                    let marker = if s.category.is_builtin { "*" } else { " " };
                    println!(
                        "{}{:<24} {:>6}  {}",
                        marker, s.category.name, s.image_count, s.category.description
                    );
                }
            }
        }
        CategoryCommands::Add { name, description } => {
            let category = registry.add(&name, &description)?;
            println!("Added '{}'", category.name);
        }
        CategoryCommands::Rename { old, new } => {
            let moved = registry.rename(&old, &new)?;
            println!("Renamed '{}' to '{}' ({} image(s))", old, new, moved);
        }
        CategoryCommands::Remove { name } => {
            let moved = registry.remove(&name)?;
            println!(
                "Removed '{}', {} image(s) moved to '{}'",
                name, moved, UNCATEGORIZED
            );
        }
        CategoryCommands::Assign { path, category } => {
            let category = registry.assign(&resolve(&path), &category)?;
            println!("{} -> {}", path.display(), category.name);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_for_errors(errors: usize) -> ExitCode {
    if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

/// Records are keyed by canonical absolute path.
fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
