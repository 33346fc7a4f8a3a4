//! CLI command implementations.

use crate::config::Config;
use crate::http::ReqwestTransport;
use anyhow::{bail, Context, Result};
use plumb_odb::pack::{resolve_pack, NoExternalBases};
use plumb_odb::{FsStorage, ObjectId, ObjectKind, Odb, Pack, PackIndex};
use plumb_protocol::{fetch as fetch_refs, FetchOptions, Negotiator, RemoteUrl};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What `cat-file` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatMode {
    /// Object kind.
    Kind,
    /// Payload size.
    Size,
    /// Payload bytes.
    Pretty,
}

fn open_odb(config: &Config) -> Result<Odb<FsStorage>> {
    Odb::open(FsStorage::new(&config.git_dir), config.odb_options())
        .with_context(|| format!("cannot open object database in {}", config.git_dir.display()))
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path).with_context(|| format!("cannot read {}", path.display())),
        None => {
            let mut data = Vec::new();
            std::io::stdin()
                .read_to_end(&mut data)
                .context("cannot read standard input")?;
            Ok(data)
        }
    }
}

fn transport() -> Result<ReqwestTransport> {
    ReqwestTransport::new(CONNECT_TIMEOUT).context("cannot create HTTP client")
}

/// Computes an object id, and stores the object with `write`.
pub fn hash_object(config: &Config, kind: &str, path: Option<&Path>, write: bool) -> Result<()> {
    let kind = ObjectKind::parse(kind)?;
    let data = read_input(path)?;
    let id = if write {
        open_odb(config)?.write(kind, &data)?
    } else {
        ObjectId::hash_object(kind, &data)
    };
    println!("{id}");
    Ok(())
}

/// Prints an object's kind, size or content. Accepts short ids.
pub fn cat_file(config: &Config, object: &str, mode: CatMode) -> Result<()> {
    let odb = open_odb(config)?;
    let id = odb.expand(object)?;
    let object = odb.read(&id)?;
    match mode {
        CatMode::Kind => println!("{}", object.kind),
        CatMode::Size => println!("{}", object.size()),
        CatMode::Pretty => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&object.data)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Checks a pack against its index and lists its objects.
pub fn verify_pack(path: &Path, verbose: bool) -> Result<()> {
    let pack_path = path.with_extension("pack");
    let idx_path = path.with_extension("idx");
    let data = std::fs::read(&pack_path)
        .with_context(|| format!("cannot read {}", pack_path.display()))?;
    let idx = std::fs::read(&idx_path)
        .with_context(|| format!("cannot read {}", idx_path.display()))?;

    let index = PackIndex::parse(&idx)?;
    let name = pack_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pack = Pack::new(name, data, index)?;
    pack.verify()?;

    if verbose {
        let unpacked = resolve_pack(pack.data(), &NoExternalBases)
            .context("pack has deltas against objects outside it")?;
        for (object, entry) in unpacked.objects.iter().zip(&unpacked.entries) {
            println!("{} {} {} {}", object.id, object.kind, object.size(), entry.offset);
        }
    }
    println!("{}: ok", pack_path.display());
    Ok(())
}

/// Stores a pack and its index in the object database.
pub fn index_pack(config: &Config, path: Option<&Path>) -> Result<()> {
    let data = read_input(path)?;
    let info = open_odb(config)?.index_pack(&data)?;
    println!("{} ({} objects)", info.name, info.ids.len());
    Ok(())
}

/// Explodes a pack into loose objects.
pub fn unpack_objects(config: &Config, path: Option<&Path>) -> Result<()> {
    let data = read_input(path)?;
    let ids = open_odb(config)?.unpack(&data)?;
    println!("unpacked {} objects", ids.len());
    Ok(())
}

/// Lists the refs a remote advertises.
pub fn ls_remote(config: &Config, url: &str) -> Result<()> {
    let remote = RemoteUrl::parse(url)?;
    let mut negotiator = Negotiator::new(transport()?, remote).with_agent(config.agent.clone());
    let ad = negotiator.discover()?;

    for (name, target) in &ad.symrefs {
        println!("ref: {target}\t{name}");
    }
    for (name, id) in &ad.refs {
        println!("{id}\t{name}");
    }
    Ok(())
}

/// Shallow-fetch settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Deepen {
    /// `--depth`
    pub depth: Option<u32>,
    /// `--shallow-since`, unix seconds.
    pub since: Option<i64>,
    /// `--shallow-exclude`
    pub not: Vec<String>,
}

/// Fetches refs matching `prefixes` (all refs when empty) into the object database.
pub fn fetch(config: &Config, url: &str, prefixes: &[String], deepen: Deepen) -> Result<()> {
    let odb = open_odb(config)?;
    let options = FetchOptions {
        depth: deepen.depth,
        deepen_since: deepen.since,
        deepen_not: deepen.not,
        ..config.fetch_options()
    };
    let outcome = fetch_refs(transport()?, url, &odb, &options, |name| {
        prefixes.is_empty() || prefixes.iter().any(|p| name.starts_with(p.as_str()))
    })
    .with_context(|| format!("fetch from {url} failed"))?;

    if outcome.refs.is_empty() {
        bail!("no matching refs at {url}");
    }
    for (name, id) in &outcome.refs {
        println!("{id}\t{name}");
    }
    match outcome.pack {
        Some(pack) => println!("received {} ({} objects)", pack.name, pack.ids.len()),
        None => println!("already up to date"),
    }
    Ok(())
}
