// ===============================
// src/watchlist.rs
// ===============================
//
// Named symbol lists persisted as one JSON array. No schema versioning:
// whatever parses is used as-is, anything else falls back to the seeds.
//

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{normalize_symbol, Watchlist, WatchlistSettings};

#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("watchlist {0} not found")]
    NotFound(String),
    #[error("cannot delete the last watchlist")]
    LastWatchlist,
    #[error("invalid watchlist input: {0}")]
    Invalid(String),
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage format: {0}")]
    Format(#[from] serde_json::Error),
}

pub trait WatchlistStore: Send {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<Watchlist>>, WatchlistError>;
    fn save(&self, lists: &[Watchlist]) -> Result<(), WatchlistError>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore { path: PathBuf }

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

impl WatchlistStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<Watchlist>>, WatchlistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, lists: &[Watchlist]) -> Result<(), WatchlistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_vec_pretty(lists)?)?;
        Ok(())
    }
}

/// Process-local store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore { slot: Arc<Mutex<Option<Vec<Watchlist>>>> }

impl MemoryStore {
    #[cfg(test)]
    pub fn with(lists: Vec<Watchlist>) -> Self { Self { slot: Arc::new(Mutex::new(Some(lists))) } }

    pub fn snapshot(&self) -> Option<Vec<Watchlist>> {
        self.slot.lock().map(|g| g.clone()).unwrap_or_else(|p| p.into_inner().clone())
    }
}

impl WatchlistStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Watchlist>>, WatchlistError> { Ok(self.snapshot()) }

    fn save(&self, lists: &[Watchlist]) -> Result<(), WatchlistError> {
        let mut g = self.slot.lock().unwrap_or_else(|p| p.into_inner());
        *g = Some(lists.to_vec());
        Ok(())
    }
}

pub fn default_watchlists() -> Vec<Watchlist> {
    let list = |id: &str, name: &str, syms: &[&str]| Watchlist {
        id: id.into(),
        name: name.into(),
        symbols: syms.iter().map(|s| s.to_string()).collect(),
        settings: WatchlistSettings::default(),
    };
    vec![
        list("1", "Watchlist 1", &["RELIANCE", "TCS", "HDFCBANK", "INFY", "ICICIBANK"]),
        list("2", "Watchlist 2", &["SBIN", "ITC", "LT", "NIFTY", "BANKNIFTY"]),
    ]
}

pub struct WatchlistBook {
    lists: Vec<Watchlist>,
    store: Box<dyn WatchlistStore>,
}

impl WatchlistBook {
    pub fn load(store: Box<dyn WatchlistStore>) -> Self {
        let mut book = Self { lists: default_watchlists(), store };
        match book.store.load() {
            Ok(Some(lists)) if !lists.is_empty() => {
                info!(count = lists.len(), "watchlists: loaded");
                book.lists = lists;
            }
            Ok(_) => book.persist(),
            // keep the stored bytes until the user changes something
            Err(e) => warn!(error = %e, "watchlists: stored value unreadable, using defaults"),
        }
        book
    }

    pub fn lists(&self) -> &[Watchlist] { &self.lists }

    pub fn get(&self, id: &str) -> Option<&Watchlist> { self.lists.iter().find(|w| w.id == id) }

    fn get_mut(&mut self, id: &str) -> Result<&mut Watchlist, WatchlistError> {
        self.lists
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| WatchlistError::NotFound(id.to_string()))
    }

    // storage is best effort: the in-memory book stays authoritative
    fn persist(&self) {
        if let Err(e) = self.store.save(&self.lists) {
            warn!(error = %e, "watchlists: save failed");
        }
    }

    /// New empty list; id derived from `now_ms`.
    pub fn create(&mut self, name: &str, now_ms: i64) -> Result<Watchlist, WatchlistError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WatchlistError::Invalid("name is empty".into()));
        }
        let mut stamp = now_ms;
        while self.get(&stamp.to_string()).is_some() {
            stamp += 1;
        }
        let w = Watchlist {
            id: stamp.to_string(),
            name: name.to_string(),
            symbols: Vec::new(),
            settings: WatchlistSettings::default(),
        };
        self.lists.push(w.clone());
        self.persist();
        info!(id = %w.id, name = %w.name, "watchlist created");
        Ok(w)
    }

    pub fn delete(&mut self, id: &str) -> Result<(), WatchlistError> {
        let idx = self
            .lists
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| WatchlistError::NotFound(id.to_string()))?;
        if self.lists.len() == 1 {
            return Err(WatchlistError::LastWatchlist);
        }
        self.lists.remove(idx);
        self.persist();
        info!(id, "watchlist deleted");
        Ok(())
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<Watchlist, WatchlistError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WatchlistError::Invalid("name is empty".into()));
        }
        let w = self.get_mut(id)?;
        w.name = name.to_string();
        let out = w.clone();
        self.persist();
        Ok(out)
    }

    /// Returns false when the symbol was already present.
    pub fn add_symbol(&mut self, id: &str, symbol: &str) -> Result<bool, WatchlistError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(WatchlistError::Invalid("symbol is empty".into()));
        }
        let w = self.get_mut(id)?;
        if w.symbols.contains(&symbol) {
            return Ok(false);
        }
        w.symbols.push(symbol);
        self.persist();
        Ok(true)
    }

    pub fn remove_symbol(&mut self, id: &str, symbol: &str) -> Result<bool, WatchlistError> {
        let symbol = normalize_symbol(symbol);
        let w = self.get_mut(id)?;
        let before = w.symbols.len();
        w.symbols.retain(|s| *s != symbol);
        let removed = w.symbols.len() != before;
        if removed {
            self.persist();
        }
        Ok(removed)
    }

    pub fn set_columns(&mut self, id: &str, columns: Vec<String>) -> Result<(), WatchlistError> {
        self.get_mut(id)?.settings.columns = columns;
        debug!(id, "watchlist columns updated");
        self.persist();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> (WatchlistBook, MemoryStore) {
        let store = MemoryStore::default();
        (WatchlistBook::load(Box::new(store.clone())), store)
    }

    #[test]
    fn empty_storage_seeds_two_lists_and_saves_them() {
        let (b, store) = book();
        assert_eq!(b.lists().len(), 2);
        assert_eq!(store.snapshot().unwrap(), default_watchlists());

        let empty = MemoryStore::with(Vec::new());
        assert_eq!(WatchlistBook::load(Box::new(empty)).lists().len(), 2);
    }

    #[test]
    fn stored_lists_win_over_defaults() {
        let mine = vec![Watchlist {
            id: "x".into(),
            name: "Mine".into(),
            symbols: vec!["TCS".into()],
            settings: WatchlistSettings { columns: vec!["ltp".into()] },
        }];
        let b = WatchlistBook::load(Box::new(MemoryStore::with(mine.clone())));
        assert_eq!(b.lists(), &mine[..]);
    }

    #[test]
    fn never_deletes_last_list() {
        let (mut b, _) = book();
        b.delete("1").unwrap();
        assert!(matches!(b.delete("2"), Err(WatchlistError::LastWatchlist)));
        assert!(matches!(b.delete("nope"), Err(WatchlistError::NotFound(_))));
        assert_eq!(b.lists().len(), 1);
    }

    #[test]
    fn add_is_idempotent_and_persisted() {
        let (mut b, store) = book();
        let w = b.create("Swing", 1_700_000_000_000).unwrap();
        assert!(b.add_symbol(&w.id, "wipro").unwrap());
        assert!(!b.add_symbol(&w.id, "WIPRO ").unwrap());
        assert_eq!(b.get(&w.id).unwrap().symbols, vec!["WIPRO"]);

        assert!(b.remove_symbol(&w.id, "wipro").unwrap());
        assert!(!b.remove_symbol(&w.id, "wipro").unwrap());

        b.rename(&w.id, "Swing trades").unwrap();
        b.set_columns(&w.id, vec!["ltp".into()]).unwrap();
        let saved = store.snapshot().unwrap();
        let s = saved.iter().find(|x| x.id == w.id).unwrap();
        assert_eq!(s.name, "Swing trades");
        assert_eq!(s.settings.columns, vec!["ltp"]);
        assert!(s.symbols.is_empty());
    }

    #[test]
    fn create_ids_are_unique_for_same_millisecond() {
        let (mut b, _) = book();
        let a = b.create("a", 42).unwrap();
        let c = b.create("c", 42).unwrap();
        assert_ne!(a.id, c.id);
        assert!(matches!(b.create("  ", 43), Err(WatchlistError::Invalid(_))));
        assert!(matches!(b.rename("missing", "x"), Err(WatchlistError::NotFound(_))));
    }

    #[test]
    fn json_file_store_round_trips_and_survives_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("watchlists.json");

        let mut b = WatchlistBook::load(Box::new(JsonFileStore::new(&path)));
        b.add_symbol("1", "TATAMOTORS").unwrap();
        drop(b);

        let reloaded = WatchlistBook::load(Box::new(JsonFileStore::new(&path)));
        assert!(reloaded.get("1").unwrap().symbols.contains(&"TATAMOTORS".to_string()));

        std::fs::write(&path, "{not json").unwrap();
        let fallback = WatchlistBook::load(Box::new(JsonFileStore::new(&path)));
        assert_eq!(fallback.lists(), &default_watchlists()[..]);
    }

    #[test]
    fn unreadable_file_is_left_alone_until_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlists.json");
        let mine = r#"[{"id":"9","name":"Mine","symbols":["TCS"],"settings":{"columns":"ltp"}}]"#;
        std::fs::write(&path, mine).unwrap();

        let mut b = WatchlistBook::load(Box::new(JsonFileStore::new(&path)));
        assert_eq!(b.lists(), &default_watchlists()[..]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), mine);

        b.add_symbol("1", "WIPRO").unwrap();
        let saved: Vec<Watchlist> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(saved[0].symbols.contains(&"WIPRO".to_string()));
    }
}
