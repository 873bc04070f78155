//! Terminal output decoding
//!
//! Shell output arrives in arbitrary chunks, so a multi-byte UTF-8 character
//! can straddle two reads. [`OutputDecoder`] holds back an incomplete trailing
//! sequence until the rest of it arrives; genuinely invalid bytes still
//! decode to U+FFFD.

use crate::message::{Envelope, MessageType};

/// Stateful bytes-to-`output` decoder for one stream
#[derive(Debug, Default)]
pub struct OutputDecoder {
    partial: Vec<u8>,
}

impl OutputDecoder {
    /// Create a decoder with nothing buffered
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk
    ///
    /// Returns `None` when the chunk only extends a held-back sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> Option<Envelope> {
        self.partial.extend_from_slice(bytes);

        let complete = self.partial.len() - incomplete_tail(&self.partial);
        if complete == 0 {
            return None;
        }

        let text = String::from_utf8_lossy(&self.partial[..complete]).into_owned();
        self.partial.drain(..complete);
        Some(Envelope::new(MessageType::Output, text))
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}

/// Length of a truncated (not invalid) UTF-8 sequence at the end of `bytes`
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(len) => rest = &rest[e.valid_up_to() + len..],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_character_is_joined() {
        let mut decoder = OutputDecoder::new();
        let euro = "€".as_bytes();

        let first = decoder.decode(&[b'a', euro[0]]).unwrap();
        assert_eq!(first.data, "a");
        assert_eq!(decoder.pending(), &euro[..1]);

        assert!(decoder.decode(&euro[1..2]).is_none());

        let last = decoder.decode(&[euro[2], b'b']).unwrap();
        assert_eq!(last.msg_type, MessageType::Output);
        assert_eq!(last.data, "€b");
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = OutputDecoder::new();

        let env = decoder.decode(&[b'o', b'k', 0xff]).unwrap();
        assert_eq!(env.data, "ok\u{fffd}");
        assert!(decoder.pending().is_empty());

        // An invalid byte before a truncated tail does not hide the tail
        let env = decoder.decode(&[0xff, b'!', 0xe2, 0x82]).unwrap();
        assert_eq!(env.data, "\u{fffd}!");
        assert_eq!(decoder.pending(), &[0xe2, 0x82]);
    }
}
