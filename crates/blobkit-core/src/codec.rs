//! Streaming compression applied on write and undone on read.
//!
//! Both directions are push-based: chunks pulled from the source are fed to a
//! synchronous `flate2`/`zstd` coder writing into an in-memory buffer, and the
//! buffer is drained to the async side after every chunk. Metering hooks see
//! every chunk as it crosses the boundary.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression as GzLevel;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use zstd::stream::raw::{Decoder as ZstdDecoder, InBuffer, Operation, OutBuffer};

use crate::error::StoreError;
use crate::metering::{MeteredReader, MeteredWriter, MeteringHooks};

/// Size of the chunks copied through the codecs.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Boxed byte stream produced by backends and returned to callers.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// Codec applied to object contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(StoreError::invalid_usage(format!(
                "unknown compression type {other:?}, expected one of none, gzip, zstd"
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.as_str().to_string()
    }
}

enum BlockEncoder {
    Identity,
    Gzip(GzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

impl BlockEncoder {
    fn new(codec: Compression) -> io::Result<Self> {
        Ok(match codec {
            Compression::None => Self::Identity,
            Compression::Gzip => Self::Gzip(GzEncoder::new(Vec::new(), GzLevel::default())),
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(
                Vec::new(),
                zstd::DEFAULT_COMPRESSION_LEVEL,
            )?),
        })
    }

    /// Feed one chunk, returning whatever encoded output is ready.
    fn push<'a>(&mut self, chunk: &'a [u8]) -> io::Result<Cow<'a, [u8]>> {
        match self {
            Self::Identity => Ok(Cow::Borrowed(chunk)),
            Self::Gzip(enc) => {
                enc.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(enc.get_mut())))
            }
            Self::Zstd(enc) => {
                enc.write_all(chunk)?;
                Ok(Cow::Owned(std::mem::take(enc.get_mut())))
            }
        }
    }

    /// Flush internal state and emit the trailer (footer, checksum).
    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Gzip(enc) => enc.finish(),
            Self::Zstd(enc) => enc.finish(),
        }
    }
}

enum BlockDecoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
    Zstd(ZstdFrames),
}

impl BlockDecoder {
    fn new(codec: Compression) -> io::Result<Self> {
        Ok(match codec {
            Compression::None => Self::Identity,
            Compression::Gzip => Self::Gzip(GzDecoder::new(Vec::new())),
            Compression::Zstd => Self::Zstd(ZstdFrames::new()?),
        })
    }

    fn push(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(chunk.to_vec()),
            Self::Gzip(dec) => {
                dec.write_all(chunk)?;
                Ok(std::mem::take(dec.get_mut()))
            }
            Self::Zstd(dec) => dec.push(chunk),
        }
    }

    /// Called at end of input; fails when the stream stopped mid-frame.
    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Gzip(dec) => dec.finish(),
            Self::Zstd(dec) => dec.finish(),
        }
    }
}

/// Zstd decoding driven through the raw streaming API so the end of the
/// last frame can be observed.
struct ZstdFrames {
    decoder: ZstdDecoder<'static>,
    out: Box<[u8]>,
    /// Last hint returned by the decoder; zero once a frame is complete.
    hint: usize,
}

impl ZstdFrames {
    fn new() -> io::Result<Self> {
        Ok(Self {
            decoder: ZstdDecoder::new()?,
            out: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            hint: 1,
        })
    }

    fn push(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        let mut input = InBuffer::around(chunk);
        let mut decoded = Vec::new();
        loop {
            let mut output = OutBuffer::around(&mut self.out[..]);
            self.hint = self.decoder.run(&mut input, &mut output)?;
            let produced = output.pos();
            decoded.extend_from_slice(&self.out[..produced]);
            if input.pos() == chunk.len() && produced < self.out.len() {
                return Ok(decoded);
            }
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        if self.hint != 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zstd stream ended in the middle of a frame",
            ));
        }
        Ok(Vec::new())
    }
}

/// Copy `source` through `codec` into `destination`.
///
/// The encoder is finalized (trailer written) and `destination` flushed
/// before returning; closing or committing the destination is left to the
/// caller. Returns the number of uncompressed bytes consumed.
pub async fn encode(
    source: &mut (dyn AsyncRead + Send + Unpin),
    destination: &mut (dyn AsyncWrite + Send + Unpin),
    codec: Compression,
    hooks: &MeteringHooks,
) -> io::Result<u64> {
    let mut metered;
    let dest: &mut (dyn AsyncWrite + Send + Unpin) = match &hooks.compressed_write {
        Some(hook) => {
            metered = MeteredWriter::new(destination, Arc::clone(hook));
            &mut metered
        }
        None => destination,
    };

    let mut encoder = BlockEncoder::new(codec)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(hook) = &hooks.uncompressed_write {
            hook(n);
        }
        total += n as u64;

        let out = encoder.push(&buf[..n])?;
        if !out.is_empty() {
            dest.write_all(&out).await?;
        }
    }

    let trailer = encoder.finish()?;
    if !trailer.is_empty() {
        dest.write_all(&trailer).await?;
    }
    dest.flush().await?;
    Ok(total)
}

/// Wrap a backend stream in the decoder for `codec`.
///
/// Nothing is read here: corrupt or mismatched data is reported by the
/// first `poll_read` that reaches it.
pub fn decode(source: ObjectBody, codec: Compression, hooks: &MeteringHooks) -> ObjectBody {
    let source: ObjectBody = match &hooks.compressed_read {
        Some(hook) => Box::new(MeteredReader::new(source, Arc::clone(hook))),
        None => source,
    };

    let decoded: ObjectBody = match codec {
        Compression::None => source,
        codec => Box::new(DecodeReader::new(source, codec)),
    };

    match &hooks.uncompressed_read {
        Some(hook) => Box::new(MeteredReader::new(decoded, Arc::clone(hook))),
        None => decoded,
    }
}

/// Async reader decoding a compressed stream on the fly.
pub struct DecodeReader<R> {
    source: R,
    codec: Compression,
    decoder: Option<BlockDecoder>,
    pending: Vec<u8>,
    pos: usize,
    scratch: Box<[u8]>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DecodeReader<R> {
    pub fn new(source: R, codec: Compression) -> Self {
        Self {
            source,
            codec,
            decoder: None,
            pending: Vec::new(),
            pos: 0,
            scratch: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            finished: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DecodeReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos < this.pending.len() {
                let n = buf.remaining().min(this.pending.len() - this.pos);
                buf.put_slice(&this.pending[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            if this.finished {
                return Poll::Ready(Ok(()));
            }

            if this.decoder.is_none() {
                this.decoder = Some(BlockDecoder::new(this.codec)?);
            }

            let mut read_buf = ReadBuf::new(&mut this.scratch);
            ready!(Pin::new(&mut this.source).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled().len();

            this.pos = 0;
            if filled == 0 {
                this.finished = true;
                this.pending = match this.decoder.take() {
                    Some(decoder) => decoder.finish()?,
                    None => Vec::new(),
                };
            } else if let Some(decoder) = this.decoder.as_mut() {
                this.pending = decoder.push(&this.scratch[..filled])?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(usize) + Send + Sync + 'static) {
        let total = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&total);
        (total, move |n| {
            inner.fetch_add(n, Ordering::SeqCst);
        })
    }

    async fn encode_bytes(data: &[u8], codec: Compression, hooks: &MeteringHooks) -> Vec<u8> {
        let mut source = data;
        let mut out = Vec::new();
        encode(&mut source, &mut out, codec, hooks).await.unwrap();
        out
    }

    async fn decode_bytes(data: Vec<u8>, codec: Compression, hooks: &MeteringHooks) -> io::Result<Vec<u8>> {
        let mut reader = decode(Box::new(std::io::Cursor::new(data)), codec, hooks);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 7) as u8 + b'a'
            })
            .collect()
    }

    #[tokio::test]
    async fn every_codec_restores_original_bytes() {
        let hooks = MeteringHooks::new();
        let payloads = [Vec::new(), b"x".to_vec(), pseudo_random(3 * CHUNK_SIZE + 17)];
        for codec in [Compression::None, Compression::Gzip, Compression::Zstd] {
            for payload in &payloads {
                let encoded = encode_bytes(payload, codec, &hooks).await;
                let decoded = decode_bytes(encoded, codec, &hooks).await.unwrap();
                assert_eq!(&decoded, payload, "codec {codec}");
            }
        }
    }

    #[tokio::test]
    async fn write_hooks_report_both_sides_of_gzip() {
        let (compressed, on_compressed) = counter();
        let (uncompressed, on_uncompressed) = counter();
        let hooks = MeteringHooks::new()
            .on_compressed_write(on_compressed)
            .on_uncompressed_write(on_uncompressed);

        let out = encode_bytes(&[b'1'; 1024], Compression::Gzip, &hooks).await;

        assert_eq!(uncompressed.load(Ordering::SeqCst), 1024);
        assert_eq!(compressed.load(Ordering::SeqCst), out.len());
        assert!(out.len() < 1024);
    }

    #[tokio::test]
    async fn write_hooks_match_for_plain_copy() {
        let (compressed, on_compressed) = counter();
        let (uncompressed, on_uncompressed) = counter();
        let hooks = MeteringHooks::new()
            .on_compressed_write(on_compressed)
            .on_uncompressed_write(on_uncompressed);

        encode_bytes(&[b'1'; 1024], Compression::None, &hooks).await;

        assert_eq!(uncompressed.load(Ordering::SeqCst), 1024);
        assert_eq!(compressed.load(Ordering::SeqCst), 1024);
    }

    #[tokio::test]
    async fn read_hooks_report_both_sides_of_zstd() {
        let plain = MeteringHooks::new();
        let encoded = encode_bytes(&[b'1'; 1024], Compression::Zstd, &plain).await;
        let encoded_len = encoded.len();

        let (compressed, on_compressed) = counter();
        let (uncompressed, on_uncompressed) = counter();
        let hooks = MeteringHooks::new()
            .on_compressed_read(on_compressed)
            .on_uncompressed_read(on_uncompressed);

        let decoded = decode_bytes(encoded, Compression::Zstd, &hooks).await.unwrap();

        assert_eq!(decoded.len(), 1024);
        assert_eq!(compressed.load(Ordering::SeqCst), encoded_len);
        assert_eq!(uncompressed.load(Ordering::SeqCst), 1024);
        assert!(encoded_len < 1024);
    }

    #[tokio::test]
    async fn corrupt_stream_fails_on_read_not_on_open() {
        for codec in [Compression::Gzip, Compression::Zstd] {
            let mut reader = decode(
                Box::new(std::io::Cursor::new(b"definitely not compressed".to_vec())),
                codec,
                &MeteringHooks::new(),
            );
            let mut out = Vec::new();
            assert!(reader.read_to_end(&mut out).await.is_err(), "codec {codec}");
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let hooks = MeteringHooks::new();
        let payload = pseudo_random(200_000);
        for codec in [Compression::Gzip, Compression::Zstd] {
            let mut encoded = encode_bytes(&payload, codec, &hooks).await;
            encoded.truncate(encoded.len() / 2);
            assert!(decode_bytes(encoded, codec, &hooks).await.is_err(), "codec {codec}");
        }

        let err = decode_bytes(Vec::new(), Compression::Zstd, &hooks).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn concatenated_zstd_frames_decode_in_sequence() {
        let hooks = MeteringHooks::new();
        let mut encoded = encode_bytes(b"first ", Compression::Zstd, &hooks).await;
        encoded.extend(encode_bytes(b"second", Compression::Zstd, &hooks).await);
        let decoded = decode_bytes(encoded, Compression::Zstd, &hooks).await.unwrap();
        assert_eq!(decoded, b"first second");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn arbitrary_bytes_survive_every_codec(
            payload in prop::collection::vec(any::<u8>(), 0..3 * CHUNK_SIZE),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let hooks = MeteringHooks::new();
            for codec in [Compression::None, Compression::Gzip, Compression::Zstd] {
                let decoded = runtime.block_on(async {
                    let encoded = encode_bytes(&payload, codec, &hooks).await;
                    decode_bytes(encoded, codec, &hooks).await.unwrap()
                });
                prop_assert_eq!(&decoded, &payload, "codec {}", codec);
            }
        }
    }

    #[test]
    fn parses_codec_names() {
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("gz".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("ZSTD".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!(matches!(
            "lz4".parse::<Compression>(),
            Err(StoreError::InvalidUsage(_))
        ));
    }
}
