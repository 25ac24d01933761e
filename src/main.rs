//! Main entry point for the rezip CLI application.
//!
//! Lists and extracts archives from the local filesystem or HTTP URLs, and
//! edits local archives in place.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::level_filters::LevelFilter;
use walkdir::WalkDir;

use rezip::cli::{Command, ExtractArgs, is_http_url};
use rezip::{
    Archive, ArchiveOptions, Cli, CompressionMethod, Entry, HttpRangeReader, LocalFile, ReadAt,
    ReadOnly,
};

/// Archive opened for listing or extraction, whatever the source.
type SourceArchive<'a> = Archive<ReadOnly<&'a dyn ReadAt>>;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (cli.is_very_quiet(), cli.log) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::WARN,
        (false, 1) => LevelFilter::INFO,
        (false, 2) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();

    match &cli.command {
        Command::List { file, verbose } => {
            with_source(file, &cli, |archive| list_files(archive, *verbose))
        }
        Command::Extract(args) => with_source(&args.file, &cli, |archive| {
            extract_files(archive, args, cli.is_quiet())
        }),
        Command::Add {
            archive,
            paths,
            store,
            zip64,
            level,
            junk_paths,
        } => {
            let options = ArchiveOptions::default()
                .with_zip64(*zip64)
                .with_compression_level(*level);
            let method = if *store {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflate
            };
            add_paths(archive, paths, options, method, *junk_paths, cli.is_quiet())
        }
        Command::Erase { archive, names } => erase_names(archive, names, cli.is_quiet()),
        Command::Compact { archive } => compact(archive, cli.is_quiet()),
    }
}

/// Open `location` read-only and hand the archive to `f`.
///
/// HTTP sources fetch only the ranges the operation touches; the transfer
/// total is reported afterwards.
fn with_source<F>(location: &str, cli: &Cli, f: F) -> Result<()>
where
    F: FnOnce(&SourceArchive<'_>) -> Result<()>,
{
    if is_http_url(location) {
        let reader = HttpRangeReader::new(location.to_string())
            .with_context(|| format!("cannot reach {location}"))?;
        let source: &dyn ReadAt = &reader;
        let archive = Archive::open_readonly(source)
            .with_context(|| format!("cannot read archive at {location}"))?;
        f(&archive)?;

        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {} in {} requests",
                format_size(reader.transferred_bytes()),
                reader.requests()
            );
        }
    } else {
        let file = LocalFile::open_read(Path::new(location))
            .with_context(|| format!("cannot open {location}"))?;
        let source: &dyn ReadAt = &file;
        let archive = Archive::open_readonly(source)
            .with_context(|| format!("cannot read archive {location}"))?;
        f(&archive)?;
    }
    Ok(())
}

fn list_files(archive: &SourceArchive<'_>, verbose: bool) -> Result<()> {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if !verbose {
            println!("{}", entry.name());
            continue;
        }

        let stamp = entry
            .time()
            .map(|time| DateTime::<Utc>::from(time).format("%Y-%m-%d  %H:%M").to_string())
            .unwrap_or_else(|| format!("{:>10}  {:>5}", "-", "-"));
        println!(
            "{:>10}  {:>10}  {}  {}  {}",
            entry.size(),
            entry.compressed_size(),
            ratio(entry.compressed_size(), entry.size()),
            stamp,
            entry.name()
        );

        if !entry.is_directory() {
            total_uncompressed += entry.size();
            total_compressed += entry.compressed_size();
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>17}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if let Some(comment) = archive.comment() {
            println!("{comment}");
        }
    }

    Ok(())
}

/// Percentage saved by compression.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

fn extract_files(archive: &SourceArchive<'_>, args: &ExtractArgs, quiet: bool) -> Result<()> {
    let selected: Vec<&Entry> = archive
        .entries()
        .filter(|e| !e.is_directory())
        .filter(|e| args.files.is_empty() || args.files.iter().any(|f| name_matches(f, e.name())))
        .filter(|e| {
            !args
                .exclude
                .iter()
                .any(|x| e.name().contains(x.as_str()) || glob_match(x, e.name()))
        })
        .collect();

    let show_filename = args.pipe && selected.len() > 1;
    for entry in selected {
        extract_file(archive, entry, args, quiet, show_filename)?;
    }
    Ok(())
}

/// Exact match on the full name or base name, glob match for patterns.
fn name_matches(pattern: &str, name: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, name);
    }
    let basename = name.rsplit('/').next().unwrap_or(name);
    name == pattern || basename == pattern
}

fn extract_file(
    archive: &SourceArchive<'_>,
    entry: &Entry,
    args: &ExtractArgs,
    quiet: bool,
    show_filename: bool,
) -> Result<()> {
    if args.pipe {
        let mut stdout = io::stdout().lock();
        if show_filename {
            writeln!(stdout, "--- {} ---", entry.name())?;
        }
        copy_checked(archive, entry, &mut stdout)?;
        return Ok(());
    }

    let Some(relative) = output_path(entry.name(), args.junk_paths) else {
        if !quiet {
            eprintln!("Skipping: {} (unsafe path)", entry.name());
        }
        return Ok(());
    };
    let target = match &args.extract_dir {
        Some(dir) => dir.join(relative),
        None => relative,
    };

    if target.exists() {
        if args.never_overwrite {
            if !quiet {
                eprintln!("Skipping: {} (file exists)", entry.name());
            }
            return Ok(());
        }
        if !args.overwrite {
            if !quiet {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.name());
            }
            return Ok(());
        }
    }

    if !quiet {
        println!("  extracting: {}", entry.name());
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let mut file = File::create(&target)
        .with_context(|| format!("cannot create {}", target.display()))?;
    copy_checked(archive, entry, &mut file)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

/// Stream an entry to `out`, verifying its CRC-32 once the data ends.
fn copy_checked<W: Write>(archive: &SourceArchive<'_>, entry: &Entry, out: &mut W) -> Result<()> {
    let mut reader = archive
        .open_entry(entry)
        .with_context(|| format!("cannot open {}", entry.name()))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("cannot read {}", entry.name()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }

    let actual = hasher.finalize();
    if actual != entry.crc32() {
        bail!(
            "CRC-32 mismatch for {}: expected {:#010x}, got {:#010x}",
            entry.name(),
            entry.crc32(),
            actual
        );
    }
    Ok(())
}

/// Relative output path for an entry name, or `None` if it would escape the target directory.
fn output_path(name: &str, junk_paths: bool) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    if junk_paths {
        path = PathBuf::from(path.file_name()?);
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

fn open_local(path: &Path, options: ArchiveOptions) -> Result<Archive<LocalFile>> {
    let store =
        LocalFile::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Archive::open_with(store, options)
        .with_context(|| format!("cannot read archive {}", path.display()))
}

fn add_paths(
    archive_path: &Path,
    paths: &[PathBuf],
    options: ArchiveOptions,
    method: CompressionMethod,
    junk_paths: bool,
    quiet: bool,
) -> Result<()> {
    let mut archive = open_local(archive_path, options)?;
    if options.zip64 {
        archive.enable_zip64();
    }
    let own_path = fs::canonicalize(archive_path).ok();

    for root in paths {
        // entries are named relative to the parent of what was given
        let base = match root.file_name() {
            Some(_) => root.parent().unwrap_or(Path::new("")),
            None => root.as_path(),
        };

        for item in WalkDir::new(root).sort_by_file_name() {
            let item = item.with_context(|| format!("cannot walk {}", root.display()))?;
            let path = item.path();
            if own_path.is_some() && fs::canonicalize(path).ok() == own_path {
                continue;
            }
            let relative = if junk_paths {
                path.file_name().map(Path::new).unwrap_or(path)
            } else {
                path.strip_prefix(base).unwrap_or(path)
            };
            let Some(mut name) = entry_name(relative) else {
                continue;
            };

            let metadata = item.metadata()?;
            if metadata.is_dir() {
                if junk_paths {
                    continue;
                }
                name.push('/');
            }
            if !quiet {
                println!("  adding: {name}");
            }

            let mut entry = archive.create_or_get_entry(&name);
            entry.set_time(metadata.modified().ok());
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                entry.set_unix_mode(metadata.permissions().mode());
            }

            if metadata.is_dir() {
                entry.set_method(CompressionMethod::Stored);
                entry.write_bytes(&[])?;
            } else {
                entry.set_method(method);
                entry
                    .write_file(path)
                    .with_context(|| format!("cannot add {}", path.display()))?;
            }
        }
    }

    archive
        .close()
        .with_context(|| format!("cannot finish {}", archive_path.display()))?;
    Ok(())
}

/// Archive name for a relative filesystem path: normal components joined by `/`.
fn entry_name(relative: &Path) -> Option<String> {
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn erase_names(archive_path: &Path, patterns: &[String], quiet: bool) -> Result<()> {
    let mut archive = open_local(archive_path, ArchiveOptions::default())?;
    let doomed: Vec<String> = archive
        .entries()
        .map(Entry::name)
        .filter(|name| patterns.iter().any(|p| name_matches(p, name)))
        .map(str::to_owned)
        .collect();

    if doomed.is_empty() {
        tracing::warn!(archive = %archive_path.display(), "no entries matched");
        return Ok(());
    }
    for name in &doomed {
        if !quiet {
            println!("  erasing: {name}");
        }
        archive.erase_entry(name);
    }

    archive
        .close()
        .with_context(|| format!("cannot finish {}", archive_path.display()))?;
    Ok(())
}

fn compact(archive_path: &Path, quiet: bool) -> Result<()> {
    let mut archive = open_local(archive_path, ArchiveOptions::default())?;
    let before = archive.store().size()?;
    archive
        .compact()
        .with_context(|| format!("compaction of {} failed; the archive may be damaged", archive_path.display()))?;
    let store = archive.close()?;

    if !quiet {
        let after = store.size()?;
        println!(
            "{}: {} -> {}",
            archive_path.display(),
            format_size(before),
            format_size(after)
        );
    }
    Ok(())
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (any run, including `/`) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    do_match(&pattern, &text)
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
