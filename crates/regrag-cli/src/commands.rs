//! Subcommand implementations: chunk import, query argument parsing and
//! graph-file validation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::{error, info};

use regrag_core::config::GRAPH_FILE_EXT;
use regrag_core::{DocumentChunk, Error};
use regrag_graph::persist;
use regrag_graph::GraphStats;

/// Read one JSON `DocumentChunk` per line. Blank lines are skipped.
pub fn read_chunks(path: &Path) -> anyhow::Result<Vec<DocumentChunk>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut chunks = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: DocumentChunk = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid chunk", path.display(), i + 1))?;
        chunks.push(chunk);
    }
    info!("Read {} chunks from {}", chunks.len(), path.display());
    Ok(chunks)
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryArgs {
    pub text: String,
    pub department: Option<String>,
    pub role: Option<String>,
    pub k: Option<usize>,
}

/// Parse `<text> [--department D] [--role R] [--k N]`.
pub fn parse_query_args(args: &[String]) -> anyhow::Result<QueryArgs> {
    let mut text: Option<String> = None;
    let mut department = None;
    let mut role = None;
    let mut k = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--department" | "-d" => {
                department = Some(iter.next().context("--department needs a value")?.clone());
            }
            "--role" | "-r" => {
                role = Some(iter.next().context("--role needs a value")?.clone());
            }
            "--k" | "-k" => {
                let raw = iter.next().context("--k needs a value")?;
                k = Some(raw.parse().with_context(|| format!("invalid --k value: {}", raw))?);
            }
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            _ if text.is_none() => text = Some(arg.clone()),
            _ => bail!("Unexpected argument: {}", arg),
        }
    }

    let text = text.filter(|t| !t.trim().is_empty()).context("missing query text")?;
    Ok(QueryArgs {
        text,
        department,
        role,
        k,
    })
}

/// Outcome of checking every graph file in a data directory.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub graphs: BTreeMap<String, GraphStats>,
    pub errors: Vec<String>,
    /// Any file failed its magic, version or checksum check.
    pub corrupt: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.corrupt && self.errors.is_empty()
    }
}

pub fn validate(graph_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    let entries = match std::fs::read_dir(graph_dir) {
        Ok(entries) => entries,
        Err(e) => {
            report
                .errors
                .push(format!("Cannot read {}: {}", graph_dir.display(), e));
            return report;
        }
    };
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(GRAPH_FILE_EXT))
        .collect();
    files.sort();

    for path in files {
        let department = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        match persist::load(&path).and_then(|f| f.into_graph()) {
            Ok((graph, _)) => {
                report.graphs.insert(department, graph.stats());
            }
            Err(e) => {
                error!("Graph file {} is invalid: {}", path.display(), e);
                if matches!(e, Error::Serialization(_)) {
                    report.corrupt = true;
                }
                report.errors.push(format!("{}: {}", department, e));
            }
        }
    }
    report
}

pub fn print_report(report: &ValidationReport) {
    println!("=== regrag graph validation ===");
    println!();
    if report.graphs.is_empty() {
        println!("No graph files found.");
    }
    for (department, stats) in &report.graphs {
        println!("{}:", department);
        println!("  Nodes:           {} ({} embedded)", stats.node_count, stats.embedded_nodes);
        println!(
            "  Edges:           {} (structural {}, metadata {}, semantic {})",
            stats.edge_count, stats.structural_edges, stats.metadata_edges, stats.semantic_edges
        );
        println!("  Communities:     {}", stats.communities);
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }

    println!();
    if report.is_valid() {
        println!("Status: OK");
    } else {
        println!("Status: INVALID");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_chunks_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(
            &path,
            "{\"content\": \"Học phí\", \"metadata\": {\"department\": \"finance\"}}\n\n{\"content\": \"Nội quy\"}\n",
        )
        .unwrap();
        let chunks = read_chunks(&path).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].department(), Some("finance"));
        assert!(chunks[1].metadata.is_empty());
    }

    #[test]
    fn test_read_chunks_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        std::fs::write(&path, "{\"content\": \"a\"}\nnot json\n").unwrap();
        let err = read_chunks(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(":2:"));
    }

    #[test]
    fn test_parse_query_args() {
        let parsed = parse_query_args(&args(&["học phí", "--department", "finance", "--k", "3"])).unwrap();
        assert_eq!(parsed.text, "học phí");
        assert_eq!(parsed.department.as_deref(), Some("finance"));
        assert_eq!(parsed.role, None);
        assert_eq!(parsed.k, Some(3));

        assert!(parse_query_args(&args(&["--role", "admin"])).is_err());
        assert!(parse_query_args(&args(&["q", "--k", "many"])).is_err());
        assert!(parse_query_args(&args(&["q", "--bogus"])).is_err());
        assert!(parse_query_args(&args(&["q", "--department"])).is_err());
    }

    #[test]
    fn test_validate_flags_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("finance.graph"), b"garbage").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();
        let report = validate(dir.path());
        assert!(report.corrupt);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert!(report.graphs.is_empty());
    }

    #[test]
    fn test_validate_empty_dir_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let report = validate(dir.path());
        assert!(report.is_valid());
        assert!(report.graphs.is_empty());
    }
}
