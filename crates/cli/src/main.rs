//! Line-oriented shell over the storage engine.
//!
//! ```text
//! siltkv [DIR] [FLUSH_THRESHOLD_BYTES]
//! ```
//!
//! Commands: `put <key> <value>`, `del <key>`, `get <key>`, `scan [from]`,
//! `compact`, `quit`. Keys and values are taken as UTF-8 from the command
//! line; the engine itself is byte-oriented.

use anyhow::{Context, Result};
use engine::LsmStore;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIR: &str = "data";
const DEFAULT_FLUSH_THRESHOLD: u64 = 1 << 20;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let dir = args.next().unwrap_or_else(|| DEFAULT_DIR.to_string());
    let flush_threshold = match args.next() {
        Some(raw) => raw
            .parse()
            .context("flush threshold must be a positive integer")?,
        None => DEFAULT_FLUSH_THRESHOLD,
    };

    std::fs::create_dir_all(&dir)?;
    let mut store = LsmStore::open(&dir, flush_threshold)?;

    let stdin = io::stdin();
    let mut out = io::stdout();
    prompt(&mut out)?;
    for line in stdin.lock().lines() {
        let line = line?;
        if !dispatch(&mut store, &mut out, &line)? {
            break;
        }
        prompt(&mut out)?;
    }

    store.close()?;
    Ok(())
}

fn prompt(out: &mut impl Write) -> io::Result<()> {
    write!(out, "> ")?;
    out.flush()
}

/// Runs one command; returns `false` when the shell should exit.
fn dispatch(store: &mut LsmStore, out: &mut impl Write, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("put") => match (parts.next(), parts.next()) {
            (Some(key), Some(value)) => {
                store.upsert(key.as_bytes().to_vec(), value.as_bytes().to_vec())?;
                writeln!(out, "ok")?;
            }
            _ => writeln!(out, "usage: put <key> <value>")?,
        },
        Some("del") => match parts.next() {
            Some(key) => {
                store.remove(key.as_bytes().to_vec())?;
                writeln!(out, "ok")?;
            }
            None => writeln!(out, "usage: del <key>")?,
        },
        Some("get") => match parts.next() {
            Some(key) => match store.iterator(key.as_bytes())?.next().transpose()? {
                Some(record) if record.key == key.as_bytes() => {
                    writeln!(out, "{}", String::from_utf8_lossy(&record.payload))?;
                }
                _ => writeln!(out, "(nil)")?,
            },
            None => writeln!(out, "usage: get <key>")?,
        },
        Some("scan") => {
            let from = parts.next().unwrap_or("");
            let mut count = 0usize;
            for record in store.iterator(from.as_bytes())? {
                let record = record?;
                writeln!(
                    out,
                    "{} = {}",
                    String::from_utf8_lossy(&record.key),
                    String::from_utf8_lossy(&record.payload)
                )?;
                count += 1;
            }
            writeln!(out, "({count} records)")?;
        }
        Some("compact") => {
            store.compact()?;
            writeln!(out, "ok")?;
        }
        Some("quit") | Some("exit") => return Ok(false),
        Some(other) => writeln!(
            out,
            "unknown command '{other}'; try put/del/get/scan/compact/quit"
        )?,
        None => {}
    }
    Ok(true)
}
