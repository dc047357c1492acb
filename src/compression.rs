//! Zlib-stream decompression.
//!
//! With transport compression enabled, every binary frame is part of one
//! shared zlib context for the lifetime of the connection. A logical message
//! is complete when a frame ends with the zlib SYNC_FLUSH suffix
//! (0x00 0x00 0xFF 0xFF); frames without it are buffered.

use flate2::{Decompress, FlushDecompress, Status};

/// Zlib suffix marking the end of a complete message.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const OUTPUT_CHUNK: usize = 32 * 1024;

/// Shared-context zlib-stream decompressor.
///
/// Both buffers are reused across messages; `reset` must be called between
/// connections because the inflate dictionary spans the whole stream.
pub struct ZlibDecompressor {
    /// Compressed frames accumulated until the suffix arrives.
    buffer: Vec<u8>,
    /// Reused inflate output buffer.
    output: Vec<u8>,
    /// Inflate state shared by every message on the connection.
    inflate: Decompress,
}

impl ZlibDecompressor {
    /// Create a new zlib-stream decompressor.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8 * 1024),
            output: Vec::with_capacity(OUTPUT_CHUNK),
            inflate: Decompress::new(true),
        }
    }

    /// Push one binary frame.
    ///
    /// Returns the decompressed message once a frame completes it, or
    /// `None` while more frames are needed. The returned slice is only
    /// valid until the next call.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<&[u8]>, std::io::Error> {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() < ZLIB_SUFFIX.len()
            || self.buffer[self.buffer.len() - ZLIB_SUFFIX.len()..] != ZLIB_SUFFIX
        {
            return Ok(None);
        }

        self.inflate_buffered()?;
        self.buffer.clear();
        Ok(Some(&self.output))
    }

    fn inflate_buffered(&mut self) -> Result<(), std::io::Error> {
        self.output.clear();
        let mut consumed = 0usize;

        loop {
            if self.output.len() == self.output.capacity() {
                self.output.reserve(OUTPUT_CHUNK);
            }
            let filled = self.output.len();
            self.output.resize(self.output.capacity(), 0);

            let in_before = self.inflate.total_in();
            let out_before = self.inflate.total_out();

            let status = self
                .inflate
                .decompress(
                    &self.buffer[consumed..],
                    &mut self.output[filled..],
                    FlushDecompress::Sync,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            consumed += (self.inflate.total_in() - in_before) as usize;
            let written = (self.inflate.total_out() - out_before) as usize;
            self.output.truncate(filled + written);

            if consumed >= self.buffer.len() {
                break;
            }
            match status {
                Status::Ok | Status::BufError => continue,
                Status::StreamEnd => break,
            }
        }

        Ok(())
    }

    /// Drop buffered data and restart the inflate context for a fresh
    /// connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.output.clear();
        self.inflate.reset(true);
    }
}

impl Default for ZlibDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::{Compress, Compression, FlushCompress};
    use std::io::Write;

    fn sync_flushed(messages: &[&str]) -> Vec<Vec<u8>> {
        // One shared deflate context, one SYNC_FLUSH per message, matching
        // what the server produces.
        let mut deflate = Compress::new(Compression::default(), true);
        let mut frames = Vec::new();

        for msg in messages {
            let mut out = Vec::with_capacity(msg.len() + 64);
            deflate
                .compress_vec(msg.as_bytes(), &mut out, FlushCompress::Sync)
                .unwrap();
            frames.push(out);
        }
        frames
    }

    #[test]
    fn test_single_message() {
        let original = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let frames = sync_flushed(&[original]);

        let mut d = ZlibDecompressor::new();
        let out = d.push(&frames[0]).unwrap().expect("complete message");
        assert_eq!(out, original.as_bytes());
    }

    #[test]
    fn test_shared_context_across_messages() {
        let msg1 = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let msg2 = r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc"}}"#;
        let frames = sync_flushed(&[msg1, msg2]);

        let mut d = ZlibDecompressor::new();
        assert_eq!(d.push(&frames[0]).unwrap().unwrap(), msg1.as_bytes());
        assert_eq!(d.push(&frames[1]).unwrap().unwrap(), msg2.as_bytes());
    }

    #[test]
    fn test_split_message_buffers_until_suffix() {
        let original = r#"{"op":11}"#;
        let frames = sync_flushed(&[original]);
        let frame = &frames[0];
        let (head, tail) = frame.split_at(frame.len() / 2);

        let mut d = ZlibDecompressor::new();
        assert!(d.push(head).unwrap().is_none());
        assert_eq!(d.push(tail).unwrap().unwrap(), original.as_bytes());
    }

    #[test]
    fn test_corrupt_stream_is_error() {
        // A one-shot zlib blob has no SYNC_FLUSH framing; garbage with the
        // suffix appended must fail cleanly.
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"data").unwrap();
        let mut blob = encoder.finish().unwrap();
        blob.reverse();
        blob.extend_from_slice(&ZLIB_SUFFIX);

        let mut d = ZlibDecompressor::new();
        assert!(d.push(&blob).is_err());
    }
}
