use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::CandidateFile;
use crate::error::GeoextentError;
use crate::http::{FileSource, RemoteStream};

const CHUNK_SIZE: usize = 64 * 1024;
const PROGRESS_EVERY: u64 = 1024 * 1024;

/// End-to-end time limit shared by every worker of a request.
#[derive(Debug)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
    cancelled: AtomicBool,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), GeoextentError> {
        let expired = self
            .limit
            .is_some_and(|limit| self.started.elapsed() >= limit);
        if expired {
            self.cancel();
        }
        if self.is_cancelled() {
            return Err(GeoextentError::Timeout(
                self.limit.map(|limit| limit.as_secs()).unwrap_or(0),
            ));
        }
        Ok(())
    }
}

/// Byte allowance shared by all transfers of one batch.
#[derive(Debug)]
struct ByteBudget {
    limit: Option<u64>,
    used: AtomicU64,
}

impl ByteBudget {
    fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
        }
    }

    fn remaining(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.saturating_sub(self.used.load(Ordering::SeqCst)))
    }

    fn try_consume(&self, bytes: u64) -> bool {
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::SeqCst);
            return true;
        };
        let before = self.used.fetch_add(bytes, Ordering::SeqCst);
        if before.saturating_add(bytes) > limit {
            self.used.fetch_sub(bytes, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub max_workers: usize,
    pub max_bytes: Option<u64>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadedFile {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub name: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub downloaded: Vec<DownloadedFile>,
    pub failed: Vec<FailedFile>,
}

impl BatchReport {
    pub fn total_bytes(&self) -> u64 {
        self.downloaded.iter().map(|file| file.bytes).sum()
    }
}

/// Streams `files` into `target_dir` with up to `max_workers` threads.
///
/// Per-file failures land in the report and never stop the siblings. Only
/// an expired deadline aborts the batch, as a single `Timeout`.
pub fn download_batch(
    source: &dyn FileSource,
    files: &[CandidateFile],
    target_dir: &Path,
    options: &DownloadOptions,
    deadline: &Deadline,
    sink: &dyn ProgressSink,
) -> Result<BatchReport, GeoextentError> {
    if files.is_empty() {
        return Ok(BatchReport::default());
    }
    deadline.check()?;
    fs::create_dir_all(target_dir).map_err(|err| {
        GeoextentError::Filesystem(format!("create {}: {err}", target_dir.display()))
    })?;

    let targets = assign_paths(files, target_dir);
    let budget = ByteBudget::new(options.max_bytes);
    let next = AtomicUsize::new(0);
    let workers = options.max_workers.clamp(1, files.len());

    let outcomes: Mutex<Vec<(usize, Result<u64, GeoextentError>)>> =
        Mutex::new(Vec::with_capacity(files.len()));

    let (next, budget, targets, shared) = (&next, &budget, &targets, &outcomes);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(move || {
                while !deadline.is_cancelled() {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(file) = files.get(index) else {
                        break;
                    };
                    let outcome = fetch_one(source, file, &targets[index], budget, deadline, sink);
                    if matches!(outcome, Err(GeoextentError::Timeout(_))) {
                        deadline.cancel();
                    }
                    shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, outcome));
                }
            }));
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("download worker panicked");
            }
        }
    });

    if deadline.is_cancelled() {
        return Err(deadline.check().err().unwrap_or(GeoextentError::Timeout(0)));
    }

    let mut outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
    let finished: HashSet<usize> = outcomes.iter().map(|(index, _)| *index).collect();
    for index in (0..files.len()).filter(|index| !finished.contains(index)) {
        let _ = fs::remove_file(part_path(&targets[index]));
        outcomes.push((
            index,
            Err(GeoextentError::Filesystem(
                "download worker stopped before finishing".to_string(),
            )),
        ));
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut report = BatchReport::default();
    for (index, outcome) in outcomes {
        let file = &files[index];
        match outcome {
            Ok(bytes) => {
                info!(file = %file.name, bytes, "downloaded");
                report.downloaded.push(DownloadedFile {
                    name: file.name.clone(),
                    url: file.url.clone(),
                    path: targets[index].clone(),
                    bytes,
                });
            }
            Err(err) => {
                warn!(file = %file.name, error = %err, "download failed");
                report.failed.push(FailedFile {
                    name: file.name.clone(),
                    url: file.url.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(report)
}

/// Streams one body to `path`, refusing to keep more than `max_bytes`.
pub fn download_single(
    stream: RemoteStream,
    path: &Path,
    max_bytes: Option<u64>,
) -> Result<u64, GeoextentError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let budget = ByteBudget::new(max_bytes);
    stream_to_file(&name, stream, path, &budget, &Deadline::unlimited(), &NoProgress)
}

fn fetch_one(
    source: &dyn FileSource,
    file: &CandidateFile,
    path: &Path,
    budget: &ByteBudget,
    deadline: &Deadline,
    sink: &dyn ProgressSink,
) -> Result<u64, GeoextentError> {
    deadline.check()?;
    let stream = source.open(&file.url)?;
    stream_to_file(&file.name, stream, path, budget, deadline, sink)
}

fn stream_to_file(
    name: &str,
    stream: RemoteStream,
    path: &Path,
    budget: &ByteBudget,
    deadline: &Deadline,
    sink: &dyn ProgressSink,
) -> Result<u64, GeoextentError> {
    if let (Some(length), Some(remaining)) = (stream.content_length, budget.remaining()) {
        if length > remaining {
            return Err(GeoextentError::SizeExceeded {
                name: name.to_string(),
                limit: budget.limit.unwrap_or(0),
            });
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| GeoextentError::Filesystem(format!("create {}: {err}", parent.display())))?;
    }

    let part = part_path(path);
    let mut written = 0u64;
    let result = copy_chunks(name, stream.reader, &part, budget, deadline, sink, &mut written)
        .and_then(|()| {
            fs::rename(&part, path).map_err(|err| {
                GeoextentError::Filesystem(format!("rename {}: {err}", part.display()))
            })
        });
    match result {
        Ok(()) => Ok(written),
        Err(err) => {
            let _ = fs::remove_file(&part);
            budget.release(written);
            Err(err)
        }
    }
}

fn copy_chunks(
    name: &str,
    mut reader: Box<dyn Read + Send>,
    part: &Path,
    budget: &ByteBudget,
    deadline: &Deadline,
    sink: &dyn ProgressSink,
    written: &mut u64,
) -> Result<(), GeoextentError> {
    let mut out = fs::File::create(part)
        .map_err(|err| GeoextentError::Filesystem(format!("create {}: {err}", part.display())))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut next_report = PROGRESS_EVERY;
    loop {
        deadline.check()?;
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(GeoextentError::Upstream(format!("{name}: {err}"))),
        };
        if !budget.try_consume(read as u64) {
            return Err(GeoextentError::SizeExceeded {
                name: name.to_string(),
                limit: budget.limit.unwrap_or(0),
            });
        }
        *written += read as u64;
        out.write_all(&buf[..read])
            .map_err(|err| GeoextentError::Filesystem(format!("write {}: {err}", part.display())))?;
        if *written >= next_report {
            sink.event(ProgressEvent {
                message: format!("download {name}: {} bytes", *written),
                elapsed: Some(deadline.elapsed()),
            });
            next_report = *written + PROGRESS_EVERY;
        }
    }
    out.flush()
        .map_err(|err| GeoextentError::Filesystem(format!("flush {}: {err}", part.display())))?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Maps every candidate to a distinct single-component file name.
fn assign_paths(files: &[CandidateFile], target_dir: &Path) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    files
        .iter()
        .map(|file| {
            let base = sanitize_file_name(&file.name);
            let mut candidate = base.clone();
            let mut counter = 1;
            while !taken.insert(candidate.clone()) {
                candidate = match base.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{counter}.{ext}"),
                    _ => format!("{base}_{counter}"),
                };
                counter += 1;
            }
            target_dir.join(candidate)
        })
        .collect()
}

pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .map(|ch| {
            if ch.is_control() || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*') {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return "file".to_string();
    }
    cleaned
}

struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    struct MemorySource {
        bodies: HashMap<String, (Vec<u8>, bool)>,
    }

    impl MemorySource {
        fn new(entries: Vec<(&str, Vec<u8>, bool)>) -> Self {
            Self {
                bodies: entries
                    .into_iter()
                    .map(|(url, body, announce)| (url.to_string(), (body, announce)))
                    .collect(),
            }
        }
    }

    impl FileSource for MemorySource {
        fn open(&self, url: &str) -> Result<RemoteStream, GeoextentError> {
            let (body, announce) = self
                .bodies
                .get(url)
                .ok_or_else(|| GeoextentError::NotFound(url.to_string()))?;
            Ok(RemoteStream {
                content_length: announce.then_some(body.len() as u64),
                reader: Box::new(Cursor::new(body.clone())),
            })
        }
    }

    fn file(name: &str) -> CandidateFile {
        CandidateFile::from_metadata(name, format!("mem://{name}"), 0)
    }

    fn stream(body: &[u8], announce: bool) -> RemoteStream {
        RemoteStream {
            content_length: announce.then_some(body.len() as u64),
            reader: Box::new(Cursor::new(body.to_vec())),
        }
    }

    #[test]
    fn single_over_limit_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let body = vec![7u8; 200_000];

        let err = download_single(stream(&body, false), &path, Some(100_000)).unwrap_err();
        assert_matches!(err, GeoextentError::SizeExceeded { limit: 100_000, .. });
        assert!(!path.exists());
        assert!(!part_path(&path).exists());

        let err = download_single(stream(&body, true), &path, Some(100_000)).unwrap_err();
        assert_matches!(err, GeoextentError::SizeExceeded { .. });
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn single_within_limit_writes_whole_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ok.bin");
        let body = vec![1u8; 150_000];
        let written = download_single(stream(&body, false), &path, Some(150_000)).unwrap();
        assert_eq!(written, 150_000);
        assert_eq!(fs::read(&path).unwrap(), body);
    }

    #[test]
    fn failed_file_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(vec![
            ("mem://a.shp", b"aaaa".to_vec(), true),
            ("mem://c.shp", b"cccccc".to_vec(), false),
        ]);
        let files = vec![file("a.shp"), file("b.shp"), file("c.shp")];
        let options = DownloadOptions {
            max_workers: 2,
            max_bytes: None,
        };
        let report = download_batch(
            &source,
            &files,
            dir.path(),
            &options,
            &Deadline::unlimited(),
            &NoProgress,
        )
        .unwrap();
        let names: Vec<&str> = report.downloaded.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.shp", "c.shp"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "b.shp");
        assert_eq!(report.total_bytes(), 10);
        assert!(!dir.path().join("b.shp").exists());
    }

    struct PanickingSource(MemorySource);

    impl FileSource for PanickingSource {
        fn open(&self, url: &str) -> Result<RemoteStream, GeoextentError> {
            if url.ends_with("boom.shp") {
                panic!("source crashed on {url}");
            }
            self.0.open(url)
        }
    }

    #[test]
    fn panicked_transfer_is_reported_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let source = PanickingSource(MemorySource::new(vec![
            ("mem://a.shp", b"aaaa".to_vec(), true),
            ("mem://c.shp", b"cc".to_vec(), true),
        ]));
        let files = vec![file("a.shp"), file("boom.shp"), file("c.shp")];
        let options = DownloadOptions {
            max_workers: 2,
            max_bytes: None,
        };
        let report = download_batch(
            &source,
            &files,
            dir.path(),
            &options,
            &Deadline::unlimited(),
            &NoProgress,
        )
        .unwrap();
        let names: Vec<&str> = report.downloaded.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.shp", "c.shp"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "boom.shp");
        assert!(!dir.path().join("boom.shp").exists());
    }

    #[test]
    fn batch_budget_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(vec![
            ("mem://one.nc", vec![0u8; 600], false),
            ("mem://two.nc", vec![0u8; 600], false),
        ]);
        let files = vec![file("one.nc"), file("two.nc")];
        let options = DownloadOptions {
            max_workers: 1,
            max_bytes: Some(1_000),
        };
        let report = download_batch(
            &source,
            &files,
            dir.path(),
            &options,
            &Deadline::unlimited(),
            &NoProgress,
        )
        .unwrap();
        assert_eq!(report.downloaded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.total_bytes() <= 1_000);
    }

    #[test]
    fn expired_deadline_surfaces_one_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemorySource::new(vec![("mem://a.tif", b"x".to_vec(), true)]);
        let deadline = Deadline::new(Some(Duration::ZERO));
        let result = download_batch(
            &source,
            &[file("a.tif")],
            dir.path(),
            &DownloadOptions::default(),
            &deadline,
            &NoProgress,
        );
        assert_matches!(result, Err(GeoextentError::Timeout(0)));
    }

    #[test]
    fn names_are_sanitized_and_unique() {
        let files = vec![
            file("../../etc/passwd"),
            file("data.zip"),
            file("sub/data.zip"),
            file(".."),
        ];
        let paths = assign_paths(&files, Path::new("/out"));
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["passwd", "data.zip", "data_1.zip", "file"]);
        assert!(paths.iter().all(|p| p.parent() == Some(Path::new("/out"))));
    }
}
