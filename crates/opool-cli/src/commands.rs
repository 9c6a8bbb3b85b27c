use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;

use opool_core::{ObjectPool, PoolConfig, ReachabilityReport, TypeRegistry};
use opool_store::{JsonFileRecordStore, RecordStore};
use opool_types::{Puuid, Record, ROOT_KEY};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Command::Stats(_) => cmd_stats(&cli),
        Command::Show(args) => cmd_show(&cli, &config, args),
        Command::Check(args) => cmd_check(&cli, &config, args),
        Command::Collect(args) => cmd_collect(&cli, &config, args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PoolConfig> {
    let Some(path) = path else {
        return Ok(PoolConfig::named("opool"));
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    Ok(PoolConfig::from_toml_str(&text)?)
}

fn open_store(path: &Path) -> anyhow::Result<JsonFileRecordStore> {
    if !path.exists() {
        bail!("record file {} does not exist", path.display());
    }
    let mut store = JsonFileRecordStore::new(path);
    store
        .open()
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(store)
}

/// Open a pool for inspection. The open-time collection pass is always
/// skipped; only `collect` deletes records.
fn open_pool(cli: &Cli, config: &PoolConfig) -> anyhow::Result<ObjectPool> {
    let store = open_store(&cli.store)?;
    let config = PoolConfig {
        collect_on_open: false,
        ..config.clone()
    };
    let pool = ObjectPool::new(Box::new(store), TypeRegistry::with_builtins(), config)?;
    pool.open()?;
    Ok(pool)
}

// ---------------------------------------------------------------
// stats
// ---------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct StoreStats {
    total_keys: usize,
    root: Option<String>,
    by_type: BTreeMap<String, usize>,
    malformed: Vec<String>,
}

fn gather_stats(store: &dyn RecordStore) -> anyhow::Result<StoreStats> {
    let mut stats = StoreStats::default();
    for (key, value) in store.entries()? {
        stats.total_keys += 1;
        if key == ROOT_KEY {
            stats.root = Some(value);
            continue;
        }
        match Record::from_json(&value) {
            Ok(record) => *stats.by_type.entry(record.type_name).or_default() += 1,
            Err(_) => stats.malformed.push(key),
        }
    }
    Ok(stats)
}

fn cmd_stats(cli: &Cli) -> anyhow::Result<()> {
    let store = open_store(&cli.store)?;
    let stats = gather_stats(&store)?;

    if cli.format == OutputFormat::Json {
        let out = json!({
            "store": cli.store.display().to_string(),
            "total_keys": stats.total_keys,
            "root": stats.root,
            "by_type": stats.by_type,
            "malformed": stats.malformed,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Store: {}", cli.store.display().to_string().bold());
    println!("Keys:  {}", stats.total_keys.to_string().bold());
    match &stats.root {
        Some(root) => println!("Root:  {}", root.cyan()),
        None => println!("Root:  {}", "(none)".dimmed()),
    }
    for (type_name, count) in &stats.by_type {
        println!("  {:<24} {}", type_name, count);
    }
    for key in &stats.malformed {
        println!("  {} {}", "malformed:".red(), key);
    }
    Ok(())
}

// ---------------------------------------------------------------
// show
// ---------------------------------------------------------------

fn cmd_show(cli: &Cli, config: &PoolConfig, args: &ShowArgs) -> anyhow::Result<()> {
    let pool = open_pool(cli, config)?;
    let pid = if args.pid == ROOT_KEY {
        pool.root_pid()?.context("store has no root pointer")?
    } else {
        Puuid::parse(&args.pid)?
    };
    let record = pool
        .read_record(&pid)?
        .with_context(|| format!("no record for {pid}"))?;
    let refs = record.ref_pids();

    if cli.format == OutputFormat::Json {
        let out = json!({
            "record": record,
            "references": refs,
            "known_type": pool.registry().contains(&record.type_name),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", record.type_name.yellow().bold(), record.id.as_str().cyan());
    for (name, value) in &record.fields {
        println!("  {}: {}", name.bold(), value);
    }
    if !refs.is_empty() {
        println!("References:");
        for pid in &refs {
            println!("  {} {}", "→".blue(), pid);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------
// check / collect
// ---------------------------------------------------------------

fn print_report(report: &ReachabilityReport) {
    println!(
        "Keys: {}  reachable: {}  unreachable: {}  dangling: {}",
        report.total_keys.to_string().bold(),
        report.reachable.len().to_string().green(),
        report.unreachable.len().to_string().yellow(),
        report.dangling.len().to_string().red(),
    );
    for key in &report.unreachable {
        println!("  {} {}", "unreachable:".yellow(), key);
    }
    for pid in &report.dangling {
        println!("  {} {}", "dangling:".red(), pid);
    }
}

fn cmd_check(cli: &Cli, config: &PoolConfig, args: &CheckArgs) -> anyhow::Result<()> {
    let pool = open_pool(cli, config)?;
    let report = pool.reachability_report()?;

    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
        if report.is_clean() {
            println!("{} No issues.", "✓".green().bold());
        }
    }

    if args.strict && !report.is_clean() {
        bail!(
            "{} unreachable and {} dangling records",
            report.unreachable.len(),
            report.dangling.len()
        );
    }
    Ok(())
}

fn cmd_collect(cli: &Cli, config: &PoolConfig, args: &CollectArgs) -> anyhow::Result<()> {
    let pool = open_pool(cli, config)?;
    if pool.root_pid()?.is_none() {
        bail!("store has no root pointer; refusing to delete every record");
    }

    let report = pool.reachability_report()?;
    if args.dry_run {
        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report.unreachable)?);
        } else {
            print_report(&report);
        }
        return Ok(());
    }

    let remaining = pool.promise_collect()?;
    pool.close();

    if cli.format == OutputFormat::Json {
        let out = json!({
            "removed": report.unreachable,
            "remaining": remaining,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "{} Collected {} records, {} remaining.",
            "✓".green(),
            report.unreachable.len(),
            remaining
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use opool_store::InMemoryRecordStore;
    use opool_types::ref_marker;
    use std::path::PathBuf;

    fn record(pid: &Puuid, next: Option<&Puuid>) -> String {
        let mut record = Record::new(pid.clone(), "Array");
        let values = next.map(ref_marker).into_iter().collect();
        record.set("values", serde_json::Value::Array(values)).unwrap();
        record.to_json().unwrap()
    }

    /// root -> a, plus an orphan b.
    fn seeded_file(dir: &tempfile::TempDir) -> (PathBuf, Puuid, Puuid, Puuid) {
        let (root, a, b) = (Puuid::generate(), Puuid::generate(), Puuid::generate());
        let path = dir.path().join("pool.json");
        let mut store = JsonFileRecordStore::new(&path);
        store.open().unwrap();
        store.begin_transaction().unwrap();
        store.put(ROOT_KEY, root.as_str()).unwrap();
        store.put(root.as_str(), &record(&root, Some(&a))).unwrap();
        store.put(a.as_str(), &record(&a, None)).unwrap();
        store.put(b.as_str(), &record(&b, None)).unwrap();
        store.commit_transaction().unwrap();
        (path, root, a, b)
    }

    fn run(path: &Path, args: &[&str]) -> anyhow::Result<()> {
        let mut argv = vec!["opool", "--store", path.to_str().unwrap()];
        argv.extend_from_slice(args);
        run_command(Cli::parse_from(argv))
    }

    #[test]
    fn stats_count_types_and_malformed_records() {
        let pid = Puuid::generate();
        let mut store = InMemoryRecordStore::with_entries([
            (ROOT_KEY.to_string(), pid.to_string()),
            (pid.to_string(), record(&pid, None)),
            ("junk".to_string(), "{".to_string()),
        ]);
        store.open().unwrap();

        let stats = gather_stats(&store).unwrap();
        assert_eq!(stats.total_keys, 3);
        assert_eq!(stats.root.as_deref(), Some(pid.as_str()));
        assert_eq!(stats.by_type.get("Array"), Some(&1));
        assert_eq!(stats.malformed, vec!["junk".to_string()]);
    }

    #[test]
    fn strict_check_fails_on_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ..) = seeded_file(&dir);
        run(&path, &["check"]).unwrap();
        assert!(run(&path, &["check", "--strict"]).is_err());
    }

    #[test]
    fn collect_removes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let (path, root, a, b) = seeded_file(&dir);

        run(&path, &["collect", "--dry-run"]).unwrap();
        assert_eq!(open_store(&path).unwrap().count().unwrap(), 4);

        run(&path, &["collect", "--format", "json"]).unwrap();
        let store = open_store(&path).unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert!(store.has_key(root.as_str()).unwrap());
        assert!(store.has_key(a.as_str()).unwrap());
        assert!(!store.has_key(b.as_str()).unwrap());

        run(&path, &["check", "--strict"]).unwrap();
    }

    #[test]
    fn show_resolves_the_root_alias() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ..) = seeded_file(&dir);
        run(&path, &["show", "root"]).unwrap();
        run(&path, &["show", "root", "--format", "json"]).unwrap();
        let missing = Puuid::generate().to_string();
        assert!(run(&path, &["show", missing.as_str()]).is_err());
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&dir.path().join("absent.json"), &["stats"]).is_err());
    }

    #[test]
    fn config_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        fs::write(&path, "name = \"inspect\"\ncommit_delay_ms = 5\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.name, "inspect");
        assert_eq!(config.commit_delay_ms, 5);

        fs::write(&path, "name = \"\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
