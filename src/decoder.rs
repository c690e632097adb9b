//! Transport decoder: raw websocket frame → [`Envelope`].
//!
//! Text frames carry envelope JSON directly. Binary frames are gzip streams of
//! the same JSON. The gzip backend is chosen once at startup and hidden behind
//! [`Decompressor`], so nothing downstream knows which one is active.

use std::fmt;
use std::io::{self, Read, Write};

use crate::protocol::{parse_envelope, Envelope, EnvelopeError};

/// One inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    const PREVIEW_CHARS: usize = 120;
    const PREVIEW_BYTES: usize = 16;

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short printable rendering for log lines.
    pub fn preview(&self) -> String {
        match self {
            Frame::Text(text) => {
                let head: String = text.chars().take(Self::PREVIEW_CHARS).collect();
                if head.len() < text.len() {
                    format!("text[{}] {head}...", text.len())
                } else {
                    format!("text[{}] {head}", text.len())
                }
            }
            Frame::Binary(bytes) => {
                let head: Vec<String> = bytes
                    .iter()
                    .take(Self::PREVIEW_BYTES)
                    .map(|b| format!("{b:02x}"))
                    .collect();
                let ellipsis = if bytes.len() > Self::PREVIEW_BYTES {
                    " .."
                } else {
                    ""
                };
                format!("binary[{}] {}{ellipsis}", bytes.len(), head.join(" "))
            }
        }
    }
}

/// Which step of decoding rejected a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Decompress,
    Utf8,
    Json,
    Payload,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::Decompress => "decompress",
            DecodeStage::Utf8 => "utf-8",
            DecodeStage::Json => "json",
            DecodeStage::Payload => "payload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message ({stage}): {reason}")]
    Malformed {
        stage: DecodeStage,
        reason: String,
        raw: Frame,
    },
    #[error("no gzip decompressor available for a {}-byte binary frame", .raw.len())]
    DecompressionUnavailable { raw: Frame },
}

impl DecodeError {
    /// The frame that failed to decode, kept for diagnostics.
    pub fn raw(&self) -> &Frame {
        match self {
            DecodeError::Malformed { raw, .. } | DecodeError::DecompressionUnavailable { raw } => {
                raw
            }
        }
    }
}

/// Turns a gzip byte stream into the bytes it encodes.
pub trait Decompressor: Send + Sync {
    fn name(&self) -> &'static str;
    fn decompress(&self, compressed: &[u8]) -> io::Result<Vec<u8>>;
}

/// Incremental inflater fed in fixed-size chunks.
pub struct StreamingGzip {
    chunk_size: usize,
}

impl StreamingGzip {
    const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

    pub fn new() -> Self {
        Self::with_chunk_size(Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for StreamingGzip {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for StreamingGzip {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn decompress(&self, compressed: &[u8]) -> io::Result<Vec<u8>> {
        let mut inflater = flate2::write::GzDecoder::new(Vec::new());
        for chunk in compressed.chunks(self.chunk_size) {
            inflater.write_all(chunk)?;
        }
        inflater.finish()
    }
}

/// Whole-buffer inflater.
pub struct BufferedGzip;

impl Decompressor for BufferedGzip {
    fn name(&self) -> &'static str {
        "buffered"
    }

    fn decompress(&self, compressed: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(compressed.len().saturating_mul(4));
        flate2::read::GzDecoder::new(compressed).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Startup selection of the gzip backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DecompressionBackend {
    #[default]
    Streaming,
    Buffered,
    /// No decompressor at all; binary frames are rejected.
    Disabled,
}

impl DecompressionBackend {
    pub fn build(self) -> Option<Box<dyn Decompressor>> {
        match self {
            DecompressionBackend::Streaming => Some(Box::new(StreamingGzip::new())),
            DecompressionBackend::Buffered => Some(Box::new(BufferedGzip)),
            DecompressionBackend::Disabled => None,
        }
    }
}

enum Failure {
    Unavailable,
    Malformed { stage: DecodeStage, reason: String },
}

impl Failure {
    fn at(stage: DecodeStage, err: impl fmt::Display) -> Self {
        Failure::Malformed {
            stage,
            reason: err.to_string(),
        }
    }
}

pub struct TransportDecoder {
    decompressor: Option<Box<dyn Decompressor>>,
}

impl TransportDecoder {
    pub fn new(backend: DecompressionBackend) -> Self {
        Self {
            decompressor: backend.build(),
        }
    }

    pub fn with_decompressor(decompressor: Option<Box<dyn Decompressor>>) -> Self {
        Self { decompressor }
    }

    /// Name of the active gzip backend, if any.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.decompressor.as_ref().map(|d| d.name())
    }

    /// Decode one frame. On failure the frame is handed back inside the error.
    pub fn decode(&self, frame: Frame) -> Result<Envelope, DecodeError> {
        match self.try_decode(&frame) {
            Ok(envelope) => Ok(envelope),
            Err(Failure::Unavailable) => Err(DecodeError::DecompressionUnavailable { raw: frame }),
            Err(Failure::Malformed { stage, reason }) => Err(DecodeError::Malformed {
                stage,
                reason,
                raw: frame,
            }),
        }
    }

    /// Normalize a frame to envelope JSON text.
    pub fn frame_text(&self, frame: &Frame) -> Result<String, DecodeError> {
        self.text_of(frame).map_err(|failure| match failure {
            Failure::Unavailable => DecodeError::DecompressionUnavailable { raw: frame.clone() },
            Failure::Malformed { stage, reason } => DecodeError::Malformed {
                stage,
                reason,
                raw: frame.clone(),
            },
        })
    }

    fn try_decode(&self, frame: &Frame) -> Result<Envelope, Failure> {
        let envelope = match frame {
            Frame::Text(text) => parse_envelope(text),
            Frame::Binary(_) => parse_envelope(&self.text_of(frame)?),
        };
        envelope.map_err(|err| match err {
            EnvelopeError::Json(e) => Failure::at(DecodeStage::Json, e),
            payload @ EnvelopeError::Payload { .. } => Failure::at(DecodeStage::Payload, payload),
        })
    }

    fn text_of(&self, frame: &Frame) -> Result<String, Failure> {
        match frame {
            Frame::Text(text) => Ok(text.clone()),
            Frame::Binary(bytes) => {
                let decompressor = self.decompressor.as_ref().ok_or(Failure::Unavailable)?;
                let inflated = decompressor
                    .decompress(bytes)
                    .map_err(|e| Failure::at(DecodeStage::Decompress, e))?;
                String::from_utf8(inflated).map_err(|e| Failure::at(DecodeStage::Utf8, e))
            }
        }
    }
}

impl Default for TransportDecoder {
    fn default() -> Self {
        Self::new(DecompressionBackend::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use proptest::prelude::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    const START: &str = r#"{"type":"full_sync_start","payload":{"total_servers":2}}"#;

    #[test]
    fn text_frame_is_parsed_directly() {
        let decoder = TransportDecoder::default();
        let env = decoder.decode(Frame::Text(START.to_string())).unwrap();
        assert_eq!(env, Envelope::FullSyncStart { total_servers: 2 });
    }

    #[test]
    fn binary_frame_is_gunzipped_by_every_backend() {
        let compressed = gzip(START.as_bytes());
        for backend in [DecompressionBackend::Streaming, DecompressionBackend::Buffered] {
            let decoder = TransportDecoder::new(backend);
            let env = decoder.decode(Frame::Binary(compressed.clone())).unwrap();
            assert_eq!(env, Envelope::FullSyncStart { total_servers: 2 }, "{backend:?}");
        }
    }

    #[test]
    fn streaming_backend_handles_tiny_chunks() {
        let big = format!(
            r#"{{"type":"server_update","payload":{{"server_id":"a","server_data":{{"name":"{}"}}}}}}"#,
            "x".repeat(50_000)
        );
        let compressed = gzip(big.as_bytes());
        let decoder =
            TransportDecoder::with_decompressor(Some(Box::new(StreamingGzip::with_chunk_size(7))));
        let env = decoder.decode(Frame::Binary(compressed)).unwrap();
        assert!(matches!(env, Envelope::ServerUpdate { ref server_data, .. } if server_data.name.len() == 50_000));
    }

    #[test]
    fn disabled_backend_reports_unavailable() {
        let decoder = TransportDecoder::new(DecompressionBackend::Disabled);
        assert_eq!(decoder.backend_name(), None);
        let frame = Frame::Binary(gzip(START.as_bytes()));
        let err = decoder.decode(frame.clone()).unwrap_err();
        assert!(matches!(err, DecodeError::DecompressionUnavailable { .. }));
        assert_eq!(err.raw(), &frame);

        // Text frames still work without a decompressor.
        assert!(decoder.decode(Frame::Text(START.to_string())).is_ok());
    }

    #[test]
    fn non_gzip_binary_is_malformed() {
        let decoder = TransportDecoder::default();
        let frame = Frame::Binary(b"definitely not gzip".to_vec());
        let err = decoder.decode(frame.clone()).unwrap_err();
        match err {
            DecodeError::Malformed { stage, raw, .. } => {
                assert_eq!(stage, DecodeStage::Decompress);
                assert_eq!(raw, frame);
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_after_inflate_is_malformed() {
        let decoder = TransportDecoder::new(DecompressionBackend::Buffered);
        let err = decoder
            .decode(Frame::Binary(gzip(&[0xff, 0xfe, 0xfd])))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                stage: DecodeStage::Utf8,
                ..
            }
        ));
    }

    #[test]
    fn invalid_json_is_malformed_for_both_framings() {
        let decoder = TransportDecoder::default();
        let err = decoder.decode(Frame::Text("{oops".to_string())).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                stage: DecodeStage::Json,
                ..
            }
        ));

        let err = decoder
            .decode(Frame::Binary(gzip(b"{oops")))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                stage: DecodeStage::Json,
                ..
            }
        ));
    }

    #[test]
    fn bad_payload_is_reported_as_payload_stage() {
        let decoder = TransportDecoder::default();
        let err = decoder
            .decode(Frame::Text(
                r#"{"type":"server_update","payload":{"server_id":1}}"#.to_string(),
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                stage: DecodeStage::Payload,
                ..
            }
        ));
    }

    #[test]
    fn frame_text_inflates_binary() {
        let decoder = TransportDecoder::default();
        let text = decoder
            .frame_text(&Frame::Binary(gzip(START.as_bytes())))
            .unwrap();
        assert_eq!(text, START);
    }

    #[test]
    fn preview_is_bounded() {
        let text = Frame::Text("y".repeat(500));
        let preview = text.preview();
        assert!(preview.starts_with("text[500] "));
        assert!(preview.ends_with("..."));
        assert!(preview.len() < 200);

        let bin = Frame::Binary(vec![0x1f, 0x8b, 0x08]);
        assert_eq!(bin.preview(), "binary[3] 1f 8b 08");
    }

    proptest! {
        #[test]
        fn decode_never_panics_on_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let decoder = TransportDecoder::default();
            let _ = decoder.decode(Frame::Binary(data));
        }

        #[test]
        fn decode_never_panics_on_arbitrary_text(text in ".{0,256}") {
            let decoder = TransportDecoder::default();
            let _ = decoder.decode(Frame::Text(text));
        }
    }
}
