use anyhow::{bail, Context};
use colored::Colorize;
use persist_core::{IngestResult, Persister, PersisterConfig, RestoreReport};
use persist_store::ContentStore;
use persist_types::{Address, Summary};
use serde_json::{json, Value};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    let persister = Persister::builder()
        .config(config)
        .build()
        .context("failed to open the cache")?;
    let report = persister.restore().await?;

    let result = match cli.command {
        Command::Restore => cmd_restore(&report, cli.format),
        Command::Ingest(args) => cmd_ingest(&persister, args, cli.format).await,
        Command::Show(args) => cmd_show(&persister, args, cli.format),
        Command::Fsck => cmd_fsck(&persister, cli.format),
    };
    persister.close().await;
    result
}

/// Config file first, then `--cache-dir` on top. A cache directory is required.
fn resolve_config(cli: &Cli) -> anyhow::Result<PersisterConfig> {
    let mut config = match &cli.config {
        Some(path) => PersisterConfig::load(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => PersisterConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if config.cache_dir.is_none() {
        bail!("no cache directory: pass --cache-dir or set cache_dir in the config file");
    }
    Ok(config)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// restore
// ---------------------------------------------------------------------------

fn report_json(report: &RestoreReport) -> Value {
    json!({
        "restored": report.restored,
        "already_known": report.already_known,
        "malformed": report.malformed,
        "rejected": report
            .rejected
            .iter()
            .map(|(address, rejection)| json!({
                "address": address.to_hex(),
                "code": rejection.kind.code(),
                "kind": rejection.kind.to_string(),
                "reason": rejection.reason,
            }))
            .collect::<Vec<_>>(),
    })
}

fn cmd_restore(report: &RestoreReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&report_json(report));
    }
    println!(
        "{} Restored {} primitives",
        "✓".green().bold(),
        report.restored.to_string().bold()
    );
    if report.malformed > 0 {
        println!("  {} {} unreadable files", "!".yellow(), report.malformed);
    }
    for (address, rejection) in &report.rejected {
        println!(
            "  {} {} {}",
            "rejected:".red(),
            address.short_hex().yellow(),
            rejection
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

async fn cmd_ingest(persister: &Persister, args: IngestArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut outcomes = Vec::with_capacity(args.files.len());
    let mut refused = 0usize;
    for path in &args.files {
        let packed = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let outcome = persister.ingest(&packed, true).await?;
        if outcome.rejection().is_some() {
            refused += 1;
        }
        outcomes.push((path.display().to_string(), outcome));
    }
    persister.await_idle().await;

    if format == OutputFormat::Json {
        let entries: Vec<Value> = outcomes
            .iter()
            .map(|(path, outcome)| match outcome {
                IngestResult::NewlyStored(summary) => json!({
                    "file": path,
                    "status": "stored",
                    "address": summary.address().to_hex(),
                    "kind": summary.kind().to_string(),
                }),
                IngestResult::AlreadyKnown(address) => json!({
                    "file": path,
                    "status": "known",
                    "address": address.to_hex(),
                }),
                IngestResult::Rejected(rejection) => json!({
                    "file": path,
                    "status": "rejected",
                    "code": rejection.kind.code(),
                    "reason": rejection.reason,
                }),
            })
            .collect();
        print_json(&Value::Array(entries))?;
    } else {
        for (path, outcome) in &outcomes {
            match outcome {
                IngestResult::NewlyStored(summary) => println!(
                    "  {} {} {} ({})",
                    "stored:".green(),
                    path,
                    summary.address().short_hex().yellow(),
                    summary.kind().to_string().cyan()
                ),
                IngestResult::AlreadyKnown(address) => {
                    println!("  {} {} {}", "known:".dimmed(), path, address.short_hex().yellow())
                }
                IngestResult::Rejected(rejection) => {
                    println!("  {} {} {}", "rejected:".red(), path, rejection)
                }
            }
        }
    }

    if refused > 0 {
        bail!("{refused} of {} primitives rejected", outcomes.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn summary_json(summary: &Summary) -> Value {
    let hex = |a: Option<Address>| a.map(|a| a.to_hex());
    let mut value = json!({
        "address": summary.address().to_hex(),
        "kind": summary.kind().to_string(),
        "author": hex(summary.author()),
        "target": hex(summary.target()),
        "party": hex(summary.party()),
    });
    if let Summary::DynamicBinding { frame, history, .. } = summary {
        value["frame"] = json!(frame.to_hex());
        value["history"] = json!(history.iter().map(Address::to_hex).collect::<Vec<_>>());
    }
    value
}

fn cmd_show(persister: &Persister, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(summary) = persister.summarize(&args.address) else {
        bail!("{} is not in the cache", args.address);
    };
    let bindings = persister.bindings_of(&args.address);
    let debindings = persister.debindings_of(&args.address);

    if format == OutputFormat::Json {
        let mut value = summary_json(&summary);
        value["bindings"] = json!(bindings.iter().map(Address::to_hex).collect::<Vec<_>>());
        value["debindings"] = json!(debindings.iter().map(Address::to_hex).collect::<Vec<_>>());
        return print_json(&value);
    }

    println!(
        "{} {}",
        summary.kind().to_string().cyan().bold(),
        summary.address().to_hex().yellow()
    );
    if let Some(author) = summary.author() {
        println!("  Author: {}", author.short_hex());
    }
    if let Some(target) = summary.target() {
        println!("  Target: {}", target.short_hex());
    }
    if let Some(party) = summary.party() {
        println!("  Party: {}", party.short_hex());
    }
    if let Summary::DynamicBinding { frame, history, .. } = &summary {
        println!("  Frame: {} ({} earlier)", frame.short_hex(), history.len());
    }
    for binding in &bindings {
        println!("  {} {}", "bound by".green(), binding.short_hex());
    }
    for debinding in &debindings {
        println!("  {} {}", "debound by".red(), debinding.short_hex());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// fsck
// ---------------------------------------------------------------------------

fn cmd_fsck(persister: &Persister, format: OutputFormat) -> anyhow::Result<()> {
    let addresses = persister.store().addresses()?;
    let mut failures = Vec::new();
    for address in &addresses {
        if let Err(e) = persister.verify_cached(address) {
            failures.push((*address, e.to_string()));
        }
    }

    if format == OutputFormat::Json {
        print_json(&json!({
            "checked": addresses.len(),
            "failures": failures
                .iter()
                .map(|(address, reason)| json!({ "address": address.to_hex(), "reason": reason }))
                .collect::<Vec<_>>(),
        }))?;
    } else if failures.is_empty() {
        println!("{} {} objects, no issues.", "✓".green().bold(), addresses.len());
    } else {
        for (address, reason) in &failures {
            println!("  {} {} {}", "corrupt:".red(), address.short_hex().yellow(), reason);
        }
    }

    if !failures.is_empty() {
        bail!("{} of {} objects failed verification", failures.len(), addresses.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use persist_crypto::{Author, WirePrimitive};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("persister").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cache_dir_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("persister.toml");
        std::fs::write(&config_path, "cache_dir = \"/from/file\"\ndrain_on_shutdown = false\n").unwrap();

        let cli = parse(&["--config", config_path.to_str().unwrap(), "restore"]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.cache_dir.as_deref(), Some(std::path::Path::new("/from/file")));
        assert!(!config.drain_on_shutdown);

        let cli = parse(&[
            "--config",
            config_path.to_str().unwrap(),
            "--cache-dir",
            "/from/flag",
            "fsck",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.cache_dir.as_deref(), Some(std::path::Path::new("/from/flag")));
    }

    #[test]
    fn cache_dir_is_required() {
        assert!(resolve_config(&parse(&["restore"])).is_err());
    }

    #[test]
    fn show_parses_hex_addresses() {
        let address = Address::from_bytes(b"x");
        let cli = parse(&["show", &address.to_hex(), "--format", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Show(args) => assert_eq!(args.address, address),
            _ => panic!("expected show"),
        }
        assert!(Cli::try_parse_from(["persister", "show", "zz"]).is_err());
    }

    #[tokio::test]
    async fn ingest_then_show_and_fsck_over_a_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let alice = Author::generate();
        let file = dir.path().join("alice.bin");
        std::fs::write(&file, alice.declaration().pack().unwrap()).unwrap();
        let cache = dir.path().join("cache");

        let ingest = parse(&[
            "--cache-dir",
            cache.to_str().unwrap(),
            "ingest",
            file.to_str().unwrap(),
        ]);
        run_command(ingest).await.unwrap();

        let persister = Persister::open(PersisterConfig::with_cache_dir(&cache)).await.unwrap();
        let summary = persister.summarize(&alice.address()).unwrap();
        assert_eq!(summary_json(&summary)["kind"], json!(summary.kind().to_string()));
        assert!(cmd_fsck(&persister, OutputFormat::Json).is_ok());
        persister.close().await;
    }

    #[test]
    fn report_json_lists_rejections_with_codes() {
        let mut report = RestoreReport {
            restored: 2,
            ..RestoreReport::default()
        };
        report.rejected.push((
            Address::from_bytes(b"bad"),
            persist_types::Rejection::new(persist_types::ErrorKind::UnboundContainer, "no binding"),
        ));
        let value = report_json(&report);
        assert_eq!(value["restored"], json!(2));
        assert_eq!(
            value["rejected"][0]["code"],
            json!(persist_types::ErrorKind::UnboundContainer.code())
        );
    }
}
