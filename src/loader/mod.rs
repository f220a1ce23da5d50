//! CSV loader for the reference tables (stocks and index sectors).
//!
//! `stocks.csv`: `symbol,name` · `sectors.csv`: `index_display_name`

use crate::models::{Sector, Stock};
use crate::scraper::cleaner::normalise_symbol;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

pub const STOCKS_FILE: &str = "stocks.csv";
pub const SECTORS_FILE: &str = "sectors.csv";

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Could not open {:?}", path))
}

pub fn load_stocks(path: &Path) -> Result<Vec<Stock>> {
    debug!("Loading stocks from {:?}", path);
    let mut stocks = Vec::new();

    for (i, result) in reader(path)?.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let symbol = normalise_symbol(record.get(0).unwrap_or(""));
        if symbol.is_empty() {
            warn!("Row {} in {:?}: empty symbol", i + 1, path);
            continue;
        }
        let name = record.get(1).unwrap_or("").to_string();
        stocks.push(Stock { symbol, name });
    }

    info!("{} stocks loaded from {:?}", stocks.len(), path);
    Ok(stocks)
}

pub fn load_sectors(path: &Path) -> Result<Vec<Sector>> {
    debug!("Loading sectors from {:?}", path);
    let mut sectors = Vec::new();

    for (i, result) in reader(path)?.records().enumerate() {
        match result {
            Ok(record) => match record.get(0).filter(|s| !s.is_empty()) {
                Some(name) => sectors.push(Sector { index_display_name: name.to_string() }),
                None => warn!("Row {} in {:?}: empty index name", i + 1, path),
            },
            Err(e) => warn!("Row {} in {:?}: {}", i + 1, path, e),
        }
    }

    info!("{} sectors loaded from {:?}", sectors.len(), path);
    Ok(sectors)
}

/// Both files from `dir`; a missing file yields an empty list.
pub fn load_reference(dir: &Path) -> Result<(Vec<Stock>, Vec<Sector>)> {
    let stocks_path = dir.join(STOCKS_FILE);
    let sectors_path = dir.join(SECTORS_FILE);

    let stocks = if stocks_path.exists() { load_stocks(&stocks_path)? } else { Vec::new() };
    let sectors = if sectors_path.exists() { load_sectors(&sectors_path)? } else { Vec::new() };
    Ok((stocks, sectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nepse_feed_loader_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn stocks_are_normalised_and_blank_rows_dropped() {
        let dir = scratch("stocks");
        std::fs::write(
            dir.join(STOCKS_FILE),
            "symbol,name\n nabil , Nabil Bank Limited\n,Nameless\nNICA,NIC Asia Bank\nUPPER\n",
        )
        .unwrap();

        let stocks = load_stocks(&dir.join(STOCKS_FILE)).unwrap();
        assert_eq!(
            stocks,
            vec![
                Stock { symbol: "NABIL".into(), name: "Nabil Bank Limited".into() },
                Stock { symbol: "NICA".into(), name: "NIC Asia Bank".into() },
                Stock { symbol: "UPPER".into(), name: String::new() },
            ]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_files_load_nothing() {
        let dir = scratch("empty");
        std::fs::write(dir.join(SECTORS_FILE), "index_display_name\nNEPSE Index\nBanking SubIndex\n").unwrap();

        let (stocks, sectors) = load_reference(&dir).unwrap();
        assert!(stocks.is_empty());
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[1].index_display_name, "Banking SubIndex");
        std::fs::remove_dir_all(&dir).ok();
    }
}
