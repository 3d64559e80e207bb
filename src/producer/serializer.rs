use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Packs many records into one blob and unpacks it again.
///
/// Records go in one at a time. A blob comes out once the serializer decides
/// the batch is big enough; `flush` forces out whatever is pending. `read`
/// must return exactly the records that were written into a blob.
pub trait BatchSerializer: Send {
    fn write(&mut self, record: &[u8]) -> io::Result<Option<Bytes>>;

    fn flush(&mut self) -> io::Result<Option<Bytes>>;

    fn read(&self, blob: &[u8]) -> io::Result<Vec<Vec<u8>>>;
}

/// Records joined by a delimiter, emitted before a blob would exceed
/// `target_size` bytes
#[derive(Debug, Clone)]
pub struct DelimitedSerializer {
    target_size: usize,
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
}

impl DelimitedSerializer {
    pub fn new(target_size: usize, delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            target_size,
            delimiter: delimiter.into(),
            buffer: Vec::with_capacity(target_size),
        }
    }

    fn next_size(&self, record: &[u8]) -> usize {
        self.buffer.len() + record.len() + self.delimiter.len()
    }
}

impl BatchSerializer for DelimitedSerializer {
    fn write(&mut self, record: &[u8]) -> io::Result<Option<Bytes>> {
        let ready = if self.next_size(record) > self.target_size {
            self.flush()?
        } else {
            None
        };
        self.buffer.extend_from_slice(record);
        self.buffer.extend_from_slice(&self.delimiter);
        Ok(ready)
    }

    fn flush(&mut self) -> io::Result<Option<Bytes>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let blob = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.target_size));
        Ok(Some(Bytes::from(blob)))
    }

    fn read(&self, blob: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        Ok(split_delimited(blob, &self.delimiter))
    }
}

/// Gzipped delimited records. The stream is sync-flushed after every record
/// so the compressed size so far is known when deciding to emit a blob.
pub struct GzipDelimitedSerializer {
    target_size: usize,
    delimiter: Vec<u8>,
    encoder: GzEncoder<Vec<u8>>,
    records_in_batch: usize,
}

impl GzipDelimitedSerializer {
    /// Room left for the gzip footer, written only when a blob is finished
    const FOOTER_SIZE: usize = 8;

    pub fn new(target_size: usize, delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            target_size,
            delimiter: delimiter.into(),
            encoder: Self::new_encoder(target_size),
            records_in_batch: 0,
        }
    }

    fn new_encoder(target_size: usize) -> GzEncoder<Vec<u8>> {
        GzEncoder::new(Vec::with_capacity(target_size), Compression::default())
    }

    fn next_size(&self, record: &[u8]) -> usize {
        self.encoder.get_ref().len() + record.len() + self.delimiter.len() + Self::FOOTER_SIZE
    }
}

impl BatchSerializer for GzipDelimitedSerializer {
    fn write(&mut self, record: &[u8]) -> io::Result<Option<Bytes>> {
        let ready = if self.next_size(record) > self.target_size {
            self.flush()?
        } else {
            None
        };
        self.encoder.write_all(record)?;
        self.encoder.write_all(&self.delimiter)?;
        self.encoder.flush()?;
        self.records_in_batch += 1;
        Ok(ready)
    }

    fn flush(&mut self) -> io::Result<Option<Bytes>> {
        if self.records_in_batch == 0 {
            return Ok(None);
        }
        let encoder = std::mem::replace(&mut self.encoder, Self::new_encoder(self.target_size));
        self.records_in_batch = 0;
        Ok(Some(Bytes::from(encoder.finish()?)))
    }

    fn read(&self, blob: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        let mut decoded = Vec::new();
        GzDecoder::new(blob).read_to_end(&mut decoded)?;
        Ok(split_delimited(&decoded, &self.delimiter))
    }
}

/// Splits on every occurrence of `delimiter`, dropping trailing empty pieces
fn split_delimited(data: &[u8], delimiter: &[u8]) -> Vec<Vec<u8>> {
    if delimiter.is_empty() {
        return if data.is_empty() { Vec::new() } else { vec![data.to_vec()] };
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + delimiter.len() <= data.len() {
        if &data[i..i + delimiter.len()] == delimiter {
            pieces.push(data[start..i].to_vec());
            i += delimiter.len();
            start = i;
        } else {
            i += 1;
        }
    }
    pieces.push(data[start..].to_vec());

    while pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
    pieces
}
