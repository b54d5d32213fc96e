//! Append-only metric series persisted as `<key>.series.txt` files.

use candle::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const SERIES_SUFFIX: &str = ".series.txt";

/// One epoch-indexed scalar sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Series {
    points: Vec<(usize, f64)>,
}

impl Series {
    pub fn points(&self) -> &[(usize, f64)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<(usize, f64)> {
        self.points.last().copied()
    }
}

/// Series keyed by `<metric>-<train|valid>`, mirrored to disk on every append.
#[derive(Debug)]
pub struct SeriesStore {
    dir: PathBuf,
    series: Vec<(String, Series)>,
}

impl SeriesStore {
    /// Open a store in `dir`, creating the directory when needed.
    ///
    /// Series files written by an earlier run are loaded so that a resumed run
    /// keeps appending to them.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(candle::Error::wrap)?;

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(candle::Error::wrap)? {
            let path = entry.map_err(candle::Error::wrap)?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(key) = name.strip_suffix(SERIES_SUFFIX) {
                files.push((key.to_string(), path.clone()));
            }
        }
        files.sort();

        let mut series = Vec::with_capacity(files.len());
        for (key, path) in files {
            let loaded = read_series(&path)?;
            tracing::debug!(key = %key, points = loaded.len(), "loaded series");
            series.push((key, loaded));
        }
        Ok(Self { dir, series })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{SERIES_SUFFIX}"))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Series> {
        self.series.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|(k, _)| k.as_str())
    }

    /// Append `(epoch, value)` under `key`. Repeated epochs are kept as-is.
    pub fn add(&mut self, key: &str, epoch: usize, value: f64) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(key))
            .map_err(candle::Error::wrap)?;
        writeln!(file, "{epoch} {value}").map_err(candle::Error::wrap)?;

        match self.series.iter_mut().find(|(k, _)| k == key) {
            Some((_, s)) => s.points.push((epoch, value)),
            None => self.series.push((
                key.to_string(),
                Series {
                    points: vec![(epoch, value)],
                },
            )),
        }
        Ok(())
    }
}

/// Parse a series file: one `<epoch> <value>` pair per line.
pub fn read_series(path: &Path) -> Result<Series> {
    let text = fs::read_to_string(path).map_err(candle::Error::wrap)?;
    let mut points = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let parsed = match (fields.next(), fields.next()) {
            (Some(e), Some(v)) => e.parse::<usize>().ok().zip(v.parse::<f64>().ok()),
            _ => None,
        };
        match parsed {
            Some(point) => points.push(point),
            None => candle::bail!("{}:{}: malformed series line `{line}`", path.display(), lineno + 1),
        }
    }
    Ok(Series { points })
}
