//! archive — backup directory layout.
//!
//! <dir>/manifest.json      — ArchiveManifest (pretty JSON, tmp + rename)
//! <dir>/<stream>.jsonl     — one event stream per plan step
//! <dir>/<stream>.jsonl.gz  — same, gzip'ed (cfg.compress_streams)
//!
//! crc32 (crc32fast) is taken over the bytes as stored on disk and checked
//! before a stream is handed to the reader.

use anyhow::{anyhow, Context, Result};
use crc32fast::Hasher as Crc32;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::check_ident;
use crate::store::Scope;
use crate::stream::{StreamReader, StreamWriter};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub name: String,
    pub file: String,
    pub records: u64,
    pub bytes: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: u32,
    pub session_id: String,
    pub scope: Scope,
    /// Context of the backed-up root (course or module context).
    pub context_id: i64,
    /// Course context (same as context_id for course scope).
    pub course_context_id: i64,
    pub created_unix_ms: u64,
    pub compressed: bool,
    pub streams: Vec<StreamEntry>,
    pub record_errors: usize,
    /// family -> plugin names that contributed structure
    #[serde(default)]
    pub plugins: BTreeMap<String, Vec<String>>,
}

impl ArchiveManifest {
    pub fn new(session_id: &str, scope: Scope, context_id: i64, course_context_id: i64) -> Self {
        Self {
            version: ARCHIVE_FORMAT_VERSION,
            session_id: session_id.to_string(),
            scope,
            context_id,
            course_context_id,
            created_unix_ms: now_unix_ms(),
            compressed: false,
            streams: Vec::new(),
            record_errors: 0,
            plugins: BTreeMap::new(),
        }
    }

    pub fn stream(&self, name: &str) -> Option<&StreamEntry> {
        self.streams.iter().find(|s| s.name == name)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write side that hashes and counts what reaches the file.
pub struct CrcWriter<W: Write> {
    inner: W,
    hasher: Crc32,
    bytes: u64,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            bytes: 0,
        }
    }

    fn finish(mut self) -> io::Result<(u32, u64)> {
        self.inner.flush()?;
        Ok((self.hasher.finalize(), self.bytes))
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type FileSink = CrcWriter<BufWriter<File>>;

/// Output of one stream file (plain or gzip).
pub enum StreamOut {
    Plain(FileSink),
    Gzip(GzEncoder<FileSink>),
}

impl Write for StreamOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamOut::Plain(w) => w.write(buf),
            StreamOut::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamOut::Plain(w) => w.flush(),
            StreamOut::Gzip(w) => w.flush(),
        }
    }
}

impl StreamOut {
    fn finish(self) -> io::Result<(u32, u64)> {
        let sink = match self {
            StreamOut::Plain(w) => w,
            StreamOut::Gzip(gz) => gz.finish()?,
        };
        sink.finish()
    }
}

pub struct ArchiveWriter {
    dir: PathBuf,
    compress: bool,
    manifest: ArchiveManifest,
}

impl ArchiveWriter {
    /// Create (or reuse) `dir`; an existing manifest there is overwritten on finish.
    pub fn create(dir: &Path, manifest: ArchiveManifest, compress: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create backup dir {}", dir.display()))?;
        let mut manifest = manifest;
        manifest.compressed = compress;
        Ok(Self {
            dir: dir.to_path_buf(),
            compress,
            manifest,
        })
    }

    pub fn manifest_mut(&mut self) -> &mut ArchiveManifest {
        &mut self.manifest
    }

    fn file_name(&self, name: &str) -> String {
        if self.compress {
            format!("{name}.jsonl.gz")
        } else {
            format!("{name}.jsonl")
        }
    }

    /// Open `<name>.jsonl[.gz]` for writing.
    pub fn open_stream(&self, name: &str) -> Result<StreamWriter<StreamOut>> {
        check_ident(name).map_err(|e| anyhow!("stream name: {e}"))?;
        let path = self.dir.join(self.file_name(name));
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let sink = CrcWriter::new(BufWriter::new(f));
        let out = if self.compress {
            StreamOut::Gzip(GzEncoder::new(sink, Compression::default()))
        } else {
            StreamOut::Plain(sink)
        };
        Ok(StreamWriter::new(out))
    }

    /// Close a stream and record it in the manifest.
    pub fn finish_stream(&mut self, name: &str, w: StreamWriter<StreamOut>) -> Result<StreamEntry> {
        let records = w.records();
        let out = w.finish().with_context(|| format!("finish stream {name}"))?;
        let (crc32, bytes) = out.finish().with_context(|| format!("flush stream {name}"))?;
        let entry = StreamEntry {
            name: name.to_string(),
            file: self.file_name(name),
            records,
            bytes,
            crc32,
        };
        debug!(
            "archive: stream {} -> {} record(s), {} byte(s), crc32={:08x}",
            name, records, bytes, crc32
        );
        self.manifest.streams.retain(|s| s.name != name);
        self.manifest.streams.push(entry.clone());
        Ok(entry)
    }

    /// Write manifest.json (tmp + rename) and return it.
    pub fn finish(self) -> Result<ArchiveManifest> {
        let path = self.dir.join(MANIFEST_FILE);
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .with_context(|| format!("open tmp manifest {}", tmp.display()))?;
            f.write_all(json.as_bytes())?;
            f.flush()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(self.manifest)
    }
}

pub struct ArchiveReader {
    dir: PathBuf,
    manifest: ArchiveManifest,
}

impl ArchiveReader {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let buf = fs::read_to_string(&path)
            .with_context(|| format!("read manifest {}", path.display()))?;
        let manifest: ArchiveManifest =
            serde_json::from_str(&buf).context("parse manifest json")?;
        if manifest.version != ARCHIVE_FORMAT_VERSION {
            return Err(anyhow!(
                "unsupported archive version {} (expected {})",
                manifest.version,
                ARCHIVE_FORMAT_VERSION
            ));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Verify and open a stream. None if the archive has no such stream.
    pub fn open_stream(&self, name: &str) -> Result<Option<StreamReader<Box<dyn BufRead>>>> {
        let Some(entry) = self.manifest.stream(name) else {
            return Ok(None);
        };
        check_ident(&entry.name).map_err(|e| anyhow!("stream name: {e}"))?;
        let path = self.dir.join(&entry.file);

        let (crc, bytes) = checksum_file(&path)?;
        if crc != entry.crc32 || bytes != entry.bytes {
            return Err(anyhow!(
                "stream {}: checksum mismatch (crc32 {:08x} != {:08x}, {} vs {} byte(s))",
                name,
                crc,
                entry.crc32,
                bytes,
                entry.bytes
            ));
        }

        let f = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let input: Box<dyn BufRead> = if entry.file.ends_with(".gz") {
            Box::new(BufReader::new(GzDecoder::new(f)))
        } else {
            Box::new(BufReader::new(f))
        };
        Ok(Some(StreamReader::new(input)))
    }
}

fn checksum_file(path: &Path) -> Result<(u32, u64)> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Crc32::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize(), total))
}
