//! Symbol universe loader.
//!
//! The universe is a plain text file, one symbol per line. Blank lines and
//! `#` comments are skipped, everything else is uppercased and deduplicated
//! in first-seen order.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::acquisition::cleaner;

pub fn read_symbols_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read symbols file {:?}", path))?;

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Allow trailing comments after the symbol.
        let token = line.split('#').next().unwrap_or("").trim();
        if token.is_empty() {
            continue;
        }
        let symbol = cleaner::normalise_symbol(token);
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        warn!("Symbols file {:?} yielded no symbols", path);
    } else {
        info!("Loaded {} symbols from {:?}", symbols.len(), path);
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_symbols_skipping_comments_and_blanks() {
        let path = write_temp(
            "universe_basic.txt",
            "# watchlist\ntcs\n\nNMDC  # mining\nwipro\nTCS\n",
        );
        let symbols = read_symbols_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(symbols, vec!["TCS", "NMDC", "WIPRO"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("universe_missing_no_such_file.txt");
        assert!(read_symbols_file(&path).is_err());
    }

    #[test]
    fn comment_only_file_yields_nothing() {
        let path = write_temp("universe_comments.txt", "# a\n# b\n\n");
        let symbols = read_symbols_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(symbols.is_empty());
    }
}
