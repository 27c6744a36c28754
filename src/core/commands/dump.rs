//! print the records in a store snapshot

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use crate::store::memory::{read_snapshot, Snapshot};

pub async fn main(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("snapshot {file:?} does not exist");
    }
    let snapshot = read_snapshot(file).await?;
    print!("{}", render(&snapshot));
    Ok(())
}

fn render(snapshot: &Snapshot) -> String {
    let now = Utc::now();
    let mut out = String::new();
    let mut expired = 0;
    for (key, entry) in snapshot {
        if entry.expires_at.is_some_and(|at| at <= now) {
            expired += 1;
            continue;
        }
        let expires = entry
            .expires_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        out.push_str(&format!("{key} (expires {expires})\n"));
        for (field, value) in &entry.fields {
            out.push_str(&format!("    {field} = {value:?}\n"));
        }
    }
    out.push_str(&format!(
        "{} records ({expired} expired)\n",
        snapshot.len() - expired
    ));
    out
}
