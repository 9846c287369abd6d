//! Scenio CLI - inspect scene cache container files.

use std::env;
use std::process::ExitCode;

use scenio::container::{EntryKind, IndexedFile, MissingBehaviour, OpenMode};
use scenio::Result;

fn print_help() {
    println!("scenio-cli {} ({})", env!("CARGO_PKG_VERSION"), env!("SCENIO_BUILD_DATE"));
    println!();
    println!("Usage: scenio-cli [flags] <command> <file>");
    println!();
    println!("Commands:");
    println!("  info <file>    Container summary (version, nodes, free pages)");
    println!("  tree <file>    Print the entry hierarchy");
    println!("  json <file>    Dump the entry hierarchy as JSON");
    println!();
    println!("Flags:");
    println!("  -v, --verbose  Enable debug logging");
    println!("  -q, --quiet    Errors only");
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let mut filter = "info";
    let mut filtered: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => filter = "debug",
            "-q" | "--quiet" => filter = "error",
            other => filtered.push(other),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if filtered.is_empty() {
        print_help();
        return ExitCode::SUCCESS;
    }

    let result = match (filtered[0], filtered.get(1)) {
        ("info", Some(file)) => cmd_info(file),
        ("tree", Some(file)) => cmd_tree(file),
        ("json", Some(file)) => cmd_json(file),
        ("help", _) | ("--help", _) | ("-h", _) => {
            print_help();
            Ok(())
        }
        _ => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_info(file: &str) -> Result<()> {
    let root = IndexedFile::open(file, OpenMode::Read)?;
    let stats = root.stats();
    println!("file:            {file}");
    println!("format version:  {}", stats.format_version);
    println!("nodes:           {}", stats.node_count);
    println!("free pages:      {}", stats.free_page_count);
    println!("interned names:  {}", stats.string_count);
    println!("data region end: {} bytes", stats.data_end);
    Ok(())
}

fn cmd_tree(file: &str) -> Result<()> {
    let root = IndexedFile::open(file, OpenMode::Read)?;
    println!("/");
    print_tree(&root, 1)?;
    Ok(())
}

fn print_tree(dir: &IndexedFile, depth: usize) -> Result<()> {
    for name in dir.entry_ids()? {
        let entry = dir.entry(&name)?;
        let indent = "  ".repeat(depth);
        match entry.kind() {
            EntryKind::Directory => {
                println!("{indent}{name}/");
                if let Some(child) = dir.subdirectory(&name, MissingBehaviour::Null)? {
                    print_tree(&child, depth + 1)?;
                }
            }
            EntryKind::File => {
                if entry.is_array() {
                    println!(
                        "{indent}{name}  [{} x{}]",
                        entry.data_kind(),
                        entry.array_length()
                    );
                } else {
                    println!("{indent}{name}  [{}]", entry.data_kind());
                }
            }
        }
    }
    Ok(())
}

fn cmd_json(file: &str) -> Result<()> {
    let root = IndexedFile::open(file, OpenMode::Read)?;
    let value = entry_json(&root, "/")?;
    println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    Ok(())
}

fn entry_json(dir: &IndexedFile, name: &str) -> Result<serde_json::Value> {
    let mut children = Vec::new();
    for child_name in dir.entry_ids()? {
        let entry = dir.entry(&child_name)?;
        match entry.kind() {
            EntryKind::Directory => {
                if let Some(child) = dir.subdirectory(&child_name, MissingBehaviour::Null)? {
                    children.push(entry_json(&child, &child_name)?);
                }
            }
            EntryKind::File => {
                children.push(serde_json::json!({
                    "name": child_name,
                    "kind": "file",
                    "dataKind": entry.data_kind().name(),
                    "arrayLength": entry.array_length(),
                }));
            }
        }
    }
    Ok(serde_json::json!({
        "name": name,
        "kind": "directory",
        "children": children,
    }))
}
