use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::info;

/// Maps every product and its peers to their links.
///
/// Products without a link are dropped, both as keys and as peers.
pub fn ids_to_links(
    map: &BTreeMap<i64, Vec<i64>>,
    links: &BTreeMap<i64, String>,
) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .filter_map(|(id, peers)| {
            let link = links.get(id)?;
            let peers = peers.iter().filter_map(|p| links.get(p).cloned()).collect();
            Some((link.clone(), peers))
        })
        .collect()
}

/// Writes `<dir>/<name>_<YYYYmmdd_HHMMSS>.txt` and returns its path
pub fn write_report(
    dir: &Path,
    name: &str,
    similar: &BTreeMap<String, Vec<String>>,
    dissimilar: &BTreeMap<String, Vec<String>>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{name}_{}.txt", Local::now().format("%Y%m%d_%H%M%S")));

    let mut text = String::new();
    write_section(&mut text, "most similar", similar);
    text.push('\n');
    write_section(&mut text, "least similar", dissimilar);

    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!("report saved to {}", path.display());
    Ok(path)
}

fn write_section(out: &mut String, title: &str, section: &BTreeMap<String, Vec<String>>) {
    let _ = writeln!(out, "# {title}");
    for (link, peers) in section {
        let _ = writeln!(out, "{link}");
        for peer in peers {
            let _ = writeln!(out, "    {peer}");
        }
    }
}
