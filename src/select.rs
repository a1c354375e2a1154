use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::domain::{CandidateFile, DownloadMethod};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionResult {
    pub selected: Vec<CandidateFile>,
    pub total_bytes: u64,
    pub skipped: Vec<CandidateFile>,
}

impl SelectionResult {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Takes the longest prefix (after an optional seeded shuffle) whose known
/// sizes fit in `max_bytes`. Files of unknown size count as zero; the
/// downloader enforces the hard limit on the wire.
pub fn select_files(
    files: Vec<CandidateFile>,
    max_bytes: Option<u64>,
    method: DownloadMethod,
    seed: u64,
) -> SelectionResult {
    let mut files = files;
    if method == DownloadMethod::Random {
        let mut rng = StdRng::seed_from_u64(seed);
        files.shuffle(&mut rng);
    }

    let Some(limit) = max_bytes else {
        let total_bytes = files.iter().map(|file| file.size).sum();
        return SelectionResult {
            selected: files,
            total_bytes,
            skipped: Vec::new(),
        };
    };

    let mut total_bytes = 0u64;
    let mut cut = files.len();
    for (index, file) in files.iter().enumerate() {
        match total_bytes.checked_add(file.size) {
            Some(next) if next <= limit => total_bytes = next,
            _ => {
                cut = index;
                break;
            }
        }
    }
    let skipped = files.split_off(cut);
    SelectionResult {
        selected: files,
        total_bytes,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(name: &str, size: u64) -> CandidateFile {
        CandidateFile::from_metadata(name, format!("https://x/{name}"), size)
    }

    fn sample() -> Vec<CandidateFile> {
        vec![
            sized("a.shp", 40),
            sized("b.shp", 30),
            sized("c.shp", 50),
            sized("d.shp", 5),
            sized("e.shp", 0),
        ]
    }

    #[test]
    fn ordered_is_a_greedy_prefix() {
        let result = select_files(sample(), Some(80), DownloadMethod::Ordered, 0);
        let names: Vec<&str> = result.selected.iter().map(|f| f.name.as_str()).collect();
        // d.shp would still fit but the prefix stops at c.shp.
        assert_eq!(names, vec!["a.shp", "b.shp"]);
        assert_eq!(result.total_bytes, 70);
        assert_eq!(result.skipped.len(), 3);
        assert_eq!(
            result,
            select_files(sample(), Some(80), DownloadMethod::Ordered, 0)
        );
    }

    #[test]
    fn no_budget_selects_everything() {
        let result = select_files(sample(), None, DownloadMethod::Ordered, 0);
        assert_eq!(result.selected.len(), 5);
        assert_eq!(result.total_bytes, 125);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn budget_below_smallest_file_is_empty() {
        let result = select_files(sample(), Some(3), DownloadMethod::Ordered, 0);
        assert!(result.is_empty());
        assert_eq!(result.total_bytes, 0);
        assert_eq!(result.skipped.len(), 5);
    }

    #[test]
    fn unknown_sizes_are_budgeted_as_zero() {
        let files = vec![sized("x.nc", 0), sized("y.nc", 0)];
        let result = select_files(files, Some(0), DownloadMethod::Ordered, 0);
        assert_eq!(result.selected.len(), 2);
    }

    #[test]
    fn random_is_reproducible_per_seed() {
        let files: Vec<CandidateFile> = (0..20).map(|i| sized(&format!("f{i}.tif"), 10)).collect();
        for seed in [0u64, 1, 42, 9_999] {
            let first = select_files(files.clone(), Some(100), DownloadMethod::Random, seed);
            let second = select_files(files.clone(), Some(100), DownloadMethod::Random, seed);
            assert_eq!(first, second);
            assert!(first.total_bytes <= 100);
        }
        let ordered = select_files(files.clone(), Some(100), DownloadMethod::Ordered, 42);
        let random = select_files(files, Some(100), DownloadMethod::Random, 42);
        assert_ne!(ordered.selected, random.selected);
    }

    #[test]
    fn total_never_exceeds_budget() {
        let files: Vec<CandidateFile> = (1..=30).map(|i| sized(&format!("f{i}"), i * 7 % 23)).collect();
        for budget in [0u64, 1, 10, 50, 100, 1_000] {
            for method in [DownloadMethod::Ordered, DownloadMethod::Random] {
                let result = select_files(files.clone(), Some(budget), method, budget);
                let sum: u64 = result.selected.iter().map(|f| f.size).sum();
                assert_eq!(sum, result.total_bytes);
                assert!(result.total_bytes <= budget);
                assert_eq!(result.selected.len() + result.skipped.len(), files.len());
            }
        }
    }
}
