//! Streaming record parsing over chunked input.
//!
//! The input never sits in memory as a whole: a [`ChunkSource`] yields
//! decoded text chunks of bounded size, and [`DelimitedParser`] scans them
//! with a two-state machine that carries its partial field, partial row,
//! quote flag, and CR state across chunk boundaries. Splitting an input at
//! any byte offset yields the same record sequence as parsing it whole.
//!
//! [`RecordStream`] layers the header contract on top: the first emitted row
//! names the columns, later rows become [`Record`]s padded or truncated to
//! the header width. [`RowSource`] abstracts the transport so pre-tokenized
//! rows (spreadsheet sheets) feed the same downstream pipeline.

use std::{
    collections::VecDeque,
    fs::File,
    io::{self, Read},
    mem,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Decoder, Encoding};

use crate::{
    data::{Header, Record},
    io_utils,
};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Cooperative cancellation handle, polled once per chunk by the stream and
/// at a row cadence by the run driver. Cancelling is not an error.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Incremental source of decoded text chunks.
pub trait ChunkSource {
    /// Total input size in bytes, when the transport knows it.
    fn len_hint(&self) -> Option<u64> {
        None
    }

    /// Next chunk of decoded text; `None` at end of input. Retrieval errors
    /// are terminal for the run.
    fn next_chunk(&mut self) -> Result<Option<String>>;
}

/// Chunked reader over any `Read`, decoding incrementally so a chunk
/// boundary may fall inside a multi-byte sequence.
pub struct ReadChunkSource<R: Read> {
    inner: R,
    decoder: Decoder,
    encoding: &'static Encoding,
    buf: Vec<u8>,
    len_hint: Option<u64>,
    eof: bool,
}

impl ReadChunkSource<Box<dyn Read>> {
    /// Opens `path` for chunked reading; `-` reads standard input.
    pub fn open(path: &Path, encoding: &'static Encoding, chunk_size: usize) -> Result<Self> {
        if io_utils::is_dash(path) {
            return Ok(Self::new(Box::new(io::stdin()), encoding, chunk_size));
        }
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        let len = file.metadata().ok().map(|m| m.len());
        let mut source = Self::new(Box::new(file) as Box<dyn Read>, encoding, chunk_size);
        source.len_hint = len;
        Ok(source)
    }
}

impl<R: Read> ReadChunkSource<R> {
    pub fn new(inner: R, encoding: &'static Encoding, chunk_size: usize) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            encoding,
            buf: vec![0u8; chunk_size.max(16)],
            len_hint: None,
            eof: false,
        }
    }
}

impl<R: Read> ChunkSource for ReadChunkSource<R> {
    fn len_hint(&self) -> Option<u64> {
        self.len_hint
    }

    fn next_chunk(&mut self) -> Result<Option<String>> {
        if self.eof {
            return Ok(None);
        }
        let read = self
            .inner
            .read(&mut self.buf)
            .context("Reading input chunk")?;
        let last = read == 0;
        let capacity = self
            .decoder
            .max_utf8_buffer_length(read)
            .unwrap_or(read * 3 + 16);
        let mut out = String::with_capacity(capacity);
        let (_, _, had_errors) = self
            .decoder
            .decode_to_string(&self.buf[..read], &mut out, last);
        if had_errors {
            return Err(anyhow!(
                "Failed to decode input with encoding {}",
                self.encoding.name()
            ));
        }
        if last {
            self.eof = true;
            if out.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(out))
    }
}

/// In-memory chunk source used by tests and the split-idempotence property.
pub struct StringChunkSource {
    chunks: VecDeque<String>,
}

impl StringChunkSource {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

impl ChunkSource for StringChunkSource {
    fn next_chunk(&mut self) -> Result<Option<String>> {
        Ok(self.chunks.pop_front())
    }
}

/// Quote-aware field/row tokenizer with state carried across chunks.
///
/// Unquoted fields are trimmed; quoted fields keep separators, line breaks,
/// and doubled-quote escapes verbatim. CRLF collapses to a single row break
/// even when the pair straddles a chunk boundary. Completely blank rows are
/// dropped. Malformed quoting never errors; stray quotes degrade to literal
/// best-effort inclusion.
pub struct DelimitedParser {
    delimiter: char,
    field: String,
    row: Vec<String>,
    field_quoted: bool,
    in_quotes: bool,
    // Buffer length when the last quoted section closed; everything beyond
    // it is unquoted tail text and may be trimmed.
    quoted_end: usize,
    // A quote was seen inside a quoted section; the next character decides
    // between an escaped quote and the end of the section.
    pending_quote: bool,
    // A CR ended a row; a following LF belongs to the same terminator.
    pending_lf_swallow: bool,
}

impl DelimitedParser {
    pub fn new(delimiter: char) -> Self {
        Self {
            delimiter,
            field: String::new(),
            row: Vec::new(),
            field_quoted: false,
            in_quotes: false,
            quoted_end: 0,
            pending_quote: false,
            pending_lf_swallow: false,
        }
    }

    /// Scans one chunk, appending every row it completes to `rows`.
    pub fn push_chunk(&mut self, chunk: &str, rows: &mut Vec<Vec<String>>) {
        for ch in chunk.chars() {
            if self.pending_lf_swallow {
                self.pending_lf_swallow = false;
                if ch == '\n' {
                    continue;
                }
            }
            if self.in_quotes {
                if self.pending_quote {
                    self.pending_quote = false;
                    if ch == '"' {
                        self.field.push('"');
                        continue;
                    }
                    // The quoted section ended; fall through in normal state.
                    self.in_quotes = false;
                    self.quoted_end = self.field.len();
                } else if ch == '"' {
                    self.pending_quote = true;
                    continue;
                } else {
                    self.field.push(ch);
                    continue;
                }
            }
            if ch == self.delimiter {
                self.end_field();
            } else if ch == '\r' {
                self.end_row(rows);
                self.pending_lf_swallow = true;
            } else if ch == '\n' {
                self.end_row(rows);
            } else if ch == '"' {
                // Whitespace padding before an opening quote stays outside
                // the field value.
                if !self.field_quoted && self.field.chars().all(char::is_whitespace) {
                    self.field.clear();
                }
                self.in_quotes = true;
                self.field_quoted = true;
            } else {
                self.field.push(ch);
            }
        }
    }

    /// Flushes the final row, if any, as though terminated by a newline.
    pub fn finish(&mut self) -> Option<Vec<String>> {
        if self.in_quotes {
            // An unterminated quote keeps its content verbatim.
            self.quoted_end = self.field.len();
        }
        self.in_quotes = false;
        self.pending_quote = false;
        self.pending_lf_swallow = false;
        if self.field.is_empty() && !self.field_quoted && self.row.is_empty() {
            return None;
        }
        let mut rows = Vec::with_capacity(1);
        self.end_row(&mut rows);
        rows.pop()
    }

    fn end_field(&mut self) {
        let mut raw = mem::take(&mut self.field);
        let value = if self.field_quoted {
            // The quoted core stays verbatim; only the unquoted tail after
            // the last closing quote loses trailing whitespace.
            let keep = self.quoted_end + raw[self.quoted_end..].trim_end().len();
            raw.truncate(keep);
            raw
        } else {
            let trimmed = raw.trim();
            if trimmed.len() == raw.len() {
                raw
            } else {
                trimmed.to_string()
            }
        };
        self.row.push(value);
        self.field_quoted = false;
        self.quoted_end = 0;
    }

    fn end_row(&mut self, rows: &mut Vec<Vec<String>>) {
        self.end_field();
        let row = mem::take(&mut self.row);
        // A single empty field is a blank line, not a data row.
        if row.len() == 1 && row[0].is_empty() {
            return;
        }
        rows.push(row);
    }
}

/// Transport-agnostic feed of header-keyed records.
pub trait RowSource {
    /// The column header, available before (or upon) reading the first
    /// record. `None` when the input holds no rows at all.
    fn header(&mut self) -> Result<Option<Arc<Header>>>;

    fn next_record(&mut self) -> Result<Option<Record>>;
}

/// Drives a [`ChunkSource`] through the parser and emits [`Record`]s.
pub struct RecordStream<S: ChunkSource> {
    source: S,
    parser: DelimitedParser,
    header: Option<Arc<Header>>,
    pending: VecDeque<Vec<String>>,
    cancel: Option<CancelFlag>,
    exhausted: bool,
}

impl<S: ChunkSource> RecordStream<S> {
    pub fn new(source: S, delimiter: char) -> Self {
        Self {
            source,
            parser: DelimitedParser::new(delimiter),
            header: None,
            pending: VecDeque::new(),
            cancel: None,
            exhausted: false,
        }
    }

    /// Stops pulling chunks once `cancel` trips; the stream then reports end
    /// of input and the caller distinguishes cancellation via the flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn len_hint(&self) -> Option<u64> {
        self.source.len_hint()
    }

    fn fill(&mut self) -> Result<()> {
        let mut rows = Vec::new();
        while self.pending.is_empty() && !self.exhausted {
            if let Some(cancel) = &self.cancel
                && cancel.is_cancelled()
            {
                self.exhausted = true;
                break;
            }
            match self.source.next_chunk()? {
                Some(chunk) => {
                    self.parser.push_chunk(&chunk, &mut rows);
                    self.pending.extend(rows.drain(..));
                }
                None => {
                    self.exhausted = true;
                    if let Some(row) = self.parser.finish() {
                        self.pending.push_back(row);
                    }
                }
            }
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>> {
        if self.pending.is_empty() {
            self.fill()?;
        }
        Ok(self.pending.pop_front())
    }
}

impl<S: ChunkSource> RowSource for RecordStream<S> {
    fn header(&mut self) -> Result<Option<Arc<Header>>> {
        if self.header.is_none()
            && let Some(names) = self.next_row()?
        {
            self.header = Some(Arc::new(Header::new(names)));
        }
        Ok(self.header.clone())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(header) = self.header()? else {
            return Ok(None);
        };
        Ok(self.next_row()?.map(|fields| Record::new(header, fields)))
    }
}

/// Row-array transport for sources tokenized elsewhere (spreadsheet sheets).
pub struct PretokenizedRows {
    header: Option<Arc<Header>>,
    rows: std::vec::IntoIter<Vec<String>>,
}

impl PretokenizedRows {
    /// `rows` includes the header row first, mirroring the delimited layout.
    pub fn new(mut rows: Vec<Vec<String>>) -> Self {
        let header = if rows.is_empty() {
            None
        } else {
            Some(Arc::new(Header::new(rows.remove(0))))
        };
        Self {
            header,
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for PretokenizedRows {
    fn header(&mut self) -> Result<Option<Arc<Header>>> {
        Ok(self.header.clone())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(header) = self.header.clone() else {
            return Ok(None);
        };
        Ok(self
            .rows
            .next()
            .map(|fields| Record::new(header, fields)))
    }
}
