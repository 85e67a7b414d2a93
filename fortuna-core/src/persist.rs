// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Persistent state: item collection, text codec and stores
//!
//! # File format
//!
//! ```text
//! FRTNPOOL<TAB>1<TAB><sha256 hex of body><TAB><item count>\n
//! <namespace><TAB><key><TAB><Base64|Hex|Utf8Text><TAB><value>\n
//! ...
//! ```
//!
//! The checksum covers every byte after the header line. It is verified only
//! when the body holds at least one item; an empty body is always valid.

use crate::{Error, Result};
use base64::Engine;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Eight-character file magic
pub const MAGIC: &str = "FRTNPOOL";

/// Current format version
pub const VERSION: u32 = 1;

/// Default field separator
pub const DEFAULT_SEPARATOR: char = '\t';

/// How an item's bytes are written to the text file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueEncoding {
    Base64,
    Hex,
    Utf8Text,
}

impl ValueEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueEncoding::Base64 => "Base64",
            ValueEncoding::Hex => "Hex",
            ValueEncoding::Utf8Text => "Utf8Text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Base64" => Some(ValueEncoding::Base64),
            "Hex" => Some(ValueEncoding::Hex),
            "Utf8Text" => Some(ValueEncoding::Utf8Text),
            _ => None,
        }
    }

    fn encode(self, value: &[u8]) -> Result<String> {
        match self {
            ValueEncoding::Base64 => Ok(base64::engine::general_purpose::STANDARD.encode(value)),
            ValueEncoding::Hex => Ok(hex::encode(value)),
            ValueEncoding::Utf8Text => {
                let text = std::str::from_utf8(value)
                    .map_err(|e| Error::InvalidData(format!("Utf8Text value is not UTF-8: {}", e)))?;
                if text.contains(['\n', '\r']) {
                    return Err(Error::InvalidData(
                        "Utf8Text value cannot contain line breaks".to_string(),
                    ));
                }
                Ok(text.to_string())
            }
        }
    }

    fn decode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            ValueEncoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| Error::InvalidData(format!("Invalid base64: {}", e))),
            ValueEncoding::Hex => {
                hex::decode(text).map_err(|e| Error::InvalidData(format!("Invalid hex: {}", e)))
            }
            ValueEncoding::Utf8Text => Ok(text.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for ValueEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a checkpoint was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentEventType {
    /// Written after a successful reseed
    Reseed,
    /// Written by the periodic timer
    Periodic,
    /// Written while the generator stops
    Stopping,
    /// Requested explicitly by the host
    Manual,
}

impl fmt::Display for PersistentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PersistentEventType::Reseed => "reseed",
            PersistentEventType::Periodic => "periodic",
            PersistentEventType::Stopping => "stopping",
            PersistentEventType::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// One stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentItem {
    pub encoding: ValueEncoding,
    pub value: Vec<u8>,
}

/// Namespace -> key -> item map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentItemCollection {
    items: BTreeMap<String, BTreeMap<String, PersistentItem>>,
}

impl PersistentItemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an item
    pub fn set(
        &mut self,
        namespace: &str,
        key: &str,
        encoding: ValueEncoding,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        validate_name("namespace", namespace)?;
        validate_name("key", key)?;
        let value = value.into();
        if encoding == ValueEncoding::Utf8Text {
            encoding.encode(&value)?;
        }
        self.items
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), PersistentItem { encoding, value });
        Ok(())
    }

    pub fn set_text(&mut self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.set(namespace, key, ValueEncoding::Utf8Text, value.as_bytes())
    }

    pub fn set_u64(&mut self, namespace: &str, key: &str, value: u64) -> Result<()> {
        self.set_text(namespace, key, &value.to_string())
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&PersistentItem> {
        self.items.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn get_text(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        match self.get(namespace, key) {
            None => Ok(None),
            Some(item) => String::from_utf8(item.value.clone())
                .map(Some)
                .map_err(|_| Error::InvalidData(format!("{}/{} is not UTF-8 text", namespace, key))),
        }
    }

    pub fn get_u64(&self, namespace: &str, key: &str) -> Result<Option<u64>> {
        match self.get_text(namespace, key)? {
            None => Ok(None),
            Some(text) => text.trim().parse::<u64>().map(Some).map_err(|_| {
                Error::InvalidData(format!("{}/{} is not an unsigned integer", namespace, key))
            }),
        }
    }

    /// All items in one namespace
    pub fn namespace(&self, namespace: &str) -> Option<&BTreeMap<String, PersistentItem>> {
        self.items.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Iterate `(namespace, key, item)` triples in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &PersistentItem)> {
        self.items.iter().flat_map(|(ns, keys)| {
            keys.iter()
                .map(move |(key, item)| (ns.as_str(), key.as_str(), item))
        })
    }

    /// Total number of items
    pub fn len(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidData(format!("Empty {}", kind)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '\u{0}'..='\u{1f}' | '\u{80}'..='\u{9f}'))
    {
        return Err(Error::InvalidData(format!(
            "{} {:?} contains control character U+{:04X}",
            kind, name, c as u32
        )));
    }
    Ok(())
}

/// Encoder/decoder for the line-oriented state format
#[derive(Debug, Clone, Copy)]
pub struct StateCodec {
    separator: char,
}

impl Default for StateCodec {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
        }
    }
}

impl StateCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a non-default separator. It must not occur in any encoded field.
    pub fn with_separator(separator: char) -> Result<Self> {
        if separator.is_alphanumeric() || matches!(separator, '+' | '/' | '=' | '\n' | '\r') {
            return Err(Error::Config(format!(
                "Separator {:?} collides with encoded values",
                separator
            )));
        }
        Ok(Self { separator })
    }

    /// Serialize a collection: header line followed by one line per item
    pub fn encode(&self, items: &PersistentItemCollection) -> Result<Vec<u8>> {
        let sep = self.separator;
        let mut body = String::new();
        for (namespace, key, item) in items.iter() {
            if namespace.contains(sep) || key.contains(sep) {
                return Err(Error::InvalidData(format!(
                    "{}/{} contains the field separator",
                    namespace, key
                )));
            }
            let value = item.encoding.encode(&item.value)?;
            body.push_str(&format!(
                "{}{sep}{}{sep}{}{sep}{}\n",
                namespace, key, item.encoding, value
            ));
        }

        let checksum = hex::encode(Sha256::digest(body.as_bytes()));
        let mut out = format!(
            "{}{sep}{}{sep}{}{sep}{}\n",
            MAGIC,
            VERSION,
            checksum,
            items.len()
        )
        .into_bytes();
        out.extend_from_slice(body.as_bytes());
        Ok(out)
    }

    /// Parse and verify a serialized collection
    pub fn decode(&self, data: &[u8]) -> Result<PersistentItemCollection> {
        if data.is_empty() {
            return Ok(PersistentItemCollection::new());
        }

        let header_end = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::InvalidData("Missing header line terminator".to_string()))?;
        let header = std::str::from_utf8(&data[..header_end])
            .map_err(|_| Error::InvalidData("Header is not UTF-8".to_string()))?;
        let expected_checksum = self.parse_header(header)?;

        let body = &data[header_end + 1..];
        let text = std::str::from_utf8(body)
            .map_err(|_| Error::InvalidData("Body is not UTF-8".to_string()))?;

        let mut items = PersistentItemCollection::new();
        let mut read = 0usize;
        let mut lines = text.split('\n').peekable();
        let mut line_number = 1usize;
        while let Some(line) = lines.next() {
            line_number += 1;
            if line.is_empty() && lines.peek().is_none() {
                break;
            }
            let mut fields = line.splitn(4, self.separator);
            let (namespace, key, encoding, value) =
                match (fields.next(), fields.next(), fields.next(), fields.next()) {
                    (Some(n), Some(k), Some(e), Some(v)) => (n, k, e, v),
                    _ => {
                        return Err(Error::InvalidData(format!(
                            "Line {} does not have 4 fields",
                            line_number
                        )))
                    }
                };
            let encoding = ValueEncoding::parse(encoding).ok_or_else(|| {
                Error::InvalidData(format!(
                    "Line {} has unknown value encoding {:?}",
                    line_number, encoding
                ))
            })?;
            let value = encoding.decode(value)?;
            items.set(namespace, key, encoding, value)?;
            read += 1;
        }

        if read > 0 {
            let actual = Sha256::digest(body);
            if !expected_checksum.is_empty() && actual.as_slice() == expected_checksum.as_slice() {
                debug!(items = read, "State checksum verified");
            } else {
                return Err(Error::InvalidData(
                    "State checksum does not match body".to_string(),
                ));
            }
        }

        Ok(items)
    }

    /// Returns the decoded checksum bytes
    fn parse_header(&self, header: &str) -> Result<Vec<u8>> {
        let fields: Vec<&str> = header.split(self.separator).collect();
        if fields.len() != 4 {
            return Err(Error::InvalidData(format!(
                "Header has {} fields, expected 4",
                fields.len()
            )));
        }
        if fields[0] != MAGIC {
            return Err(Error::InvalidData(format!("Bad magic {:?}", fields[0])));
        }
        let version: u32 = fields[1]
            .parse()
            .map_err(|_| Error::InvalidData(format!("Bad version {:?}", fields[1])))?;
        if version == 0 || version > VERSION {
            return Err(Error::InvalidData(format!("Unsupported version {}", version)));
        }
        fields[3]
            .parse::<usize>()
            .map_err(|_| Error::InvalidData(format!("Bad item count {:?}", fields[3])))?;

        let checksum = fields[2];
        match checksum.len() {
            64 => hex::decode(checksum)
                .map_err(|_| Error::InvalidData("Checksum is not valid hex".to_string())),
            44 => base64::engine::general_purpose::STANDARD
                .decode(checksum)
                .map_err(|_| Error::InvalidData("Checksum is not valid base64".to_string())),
            n => Err(Error::InvalidData(format!("Checksum has length {}", n))),
        }
    }
}

/// Source of a previously written checkpoint
pub trait PersistentStateReader: Send + Sync {
    fn read(&self) -> BoxFuture<'_, Result<PersistentItemCollection>>;
}

/// Destination for checkpoints
pub trait PersistentStateWriter: Send + Sync {
    fn write<'a>(
        &'a self,
        items: &'a PersistentItemCollection,
        event: PersistentEventType,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Checkpoint file with crash-safe rotation through `.tmp` and `.old` siblings
///
/// Clones share one lock, so reads and writes through any clone never
/// interleave with a rotation in progress.
#[derive(Debug, Clone)]
pub struct TextFileStateStore {
    path: PathBuf,
    codec: StateCodec,
    io_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TextFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_codec(path, StateCodec::new())
    }

    pub fn with_codec(path: impl Into<PathBuf>, codec: StateCodec) -> Self {
        Self {
            path: path.into(),
            codec,
            io_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn read_file(&self) -> Result<PersistentItemCollection> {
        let _guard = self.io_lock.lock().await;
        let old = self.sibling(".old");
        let path = if tokio::fs::try_exists(&self.path).await? {
            self.path.clone()
        } else if tokio::fs::try_exists(&old).await? {
            // Crash between the two renames: the previous version is still intact
            warn!(path = %old.display(), "Primary state file missing, reading previous version");
            old
        } else {
            debug!(path = %self.path.display(), "No state file, starting fresh");
            return Ok(PersistentItemCollection::new());
        };

        let data = tokio::fs::read(&path).await?;
        let items = self.codec.decode(&data)?;
        info!(path = %path.display(), items = items.len(), "Loaded persistent state");
        Ok(items)
    }

    async fn write_file(&self, items: &PersistentItemCollection) -> Result<()> {
        let data = self.codec.encode(items)?;
        let _guard = self.io_lock.lock().await;
        let tmp = self.sibling(".tmp");
        let old = self.sibling(".old");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        remove_if_exists(&old).await?;
        if tokio::fs::try_exists(&self.path).await? {
            tokio::fs::rename(&self.path, &old).await?;
        }
        tokio::fs::rename(&tmp, &self.path).await?;
        remove_if_exists(&old).await?;
        Ok(())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl PersistentStateReader for TextFileStateStore {
    fn read(&self) -> BoxFuture<'_, Result<PersistentItemCollection>> {
        Box::pin(self.read_file())
    }
}

impl PersistentStateWriter for TextFileStateStore {
    fn write<'a>(
        &'a self,
        items: &'a PersistentItemCollection,
        event: PersistentEventType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.write_file(items).await?;
            debug!(path = %self.path.display(), %event, items = items.len(), "Wrote persistent state");
            Ok(())
        })
    }
}

/// In-memory store holding the last encoded checkpoint
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    codec: StateCodec,
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    data: Vec<u8>,
    events: Vec<PersistentEventType>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously encoded bytes
    pub fn with_data(data: Vec<u8>) -> Self {
        let store = Self::default();
        store.inner.lock().data = data;
        store
    }

    /// Encoded bytes of the last checkpoint
    pub fn data(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Event tags of every checkpoint written, oldest first
    pub fn events(&self) -> Vec<PersistentEventType> {
        self.inner.lock().events.clone()
    }

    pub fn last_event(&self) -> Option<PersistentEventType> {
        self.inner.lock().events.last().copied()
    }
}

impl PersistentStateReader for MemoryStateStore {
    fn read(&self) -> BoxFuture<'_, Result<PersistentItemCollection>> {
        let data = self.data();
        Box::pin(async move { self.codec.decode(&data) })
    }
}

impl PersistentStateWriter for MemoryStateStore {
    fn write<'a>(
        &'a self,
        items: &'a PersistentItemCollection,
        event: PersistentEventType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let data = self.codec.encode(items)?;
            let mut inner = self.inner.lock();
            inner.data = data;
            inner.events.push(event);
            Ok(())
        })
    }
}
