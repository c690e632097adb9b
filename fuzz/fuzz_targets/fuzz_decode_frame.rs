#![no_main]
use fleetview::decoder::{DecompressionBackend, Frame, TransportDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as both a gzip frame and, when valid UTF-8, a text frame
    for backend in [DecompressionBackend::Streaming, DecompressionBackend::Buffered] {
        let decoder = TransportDecoder::new(backend);
        if let Err(err) = decoder.decode(Frame::Binary(data.to_vec())) {
            let _ = err.raw();
        }
    }
    if let Ok(text) = std::str::from_utf8(data) {
        let decoder = TransportDecoder::new(DecompressionBackend::Disabled);
        let _ = decoder.decode(Frame::Text(text.to_string()));
    }
});
