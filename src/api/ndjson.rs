// Line reassembly for newline-delimited JSON bodies

/// Buffers raw body bytes and hands out complete, non-blank lines.
///
/// Network chunks split lines (and multi-byte characters) anywhere, so bytes
/// are held until a `\n` arrives. Lines stay raw bytes; UTF-8 validity is
/// left to the JSON decoder. Whatever is left when the body ends is returned
/// by [`LineDecoder::finish`].
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let trimmed = line.trim_ascii();
            if !trimmed.is_empty() {
                return Some(trimmed.to_vec());
            }
        }
        None
    }

    /// Take the unterminated tail, if it holds anything besides whitespace.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        let trimmed = rest.trim_ascii();
        (!trimmed.is_empty()).then(|| trimmed.to_vec())
    }
}
