//! Splits a concatenated MJPEG byte stream into whole JPEG images.

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xff, 0xd8];
const EOI: [u8; 2] = [0xff, 0xd9];

#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: BytesMut,
    limit: usize,
}

impl MjpegSplitter {
    /// `limit` caps the bytes held while waiting for an end marker.
    pub fn new(limit: usize) -> Self {
        Self { buf: BytesMut::new(), limit }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // keep a trailing 0xff, it may begin a marker
                let keep = usize::from(self.buf.last() == Some(&0xff));
                let n = self.buf.len() - keep;
                let _ = self.buf.split_to(n);
                break;
            };
            if start > 0 {
                let _ = self.buf.split_to(start);
            }
            match find(&self.buf, &EOI, SOI.len()) {
                Some(end) => out.push(self.buf.split_to(end + EOI.len()).freeze()),
                None => {
                    if self.limit > 0 && self.buf.len() > self.limit {
                        self.buf.clear();
                    }
                    break;
                }
            }
        }
        out
    }
}

fn find(hay: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    hay.get(from..)?.windows(2).position(|w| w == needle).map(|p| p + from)
}
