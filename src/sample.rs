//! Strategic sampling of large payloads for the analysis prompt.
//!
//! The analysis agent never sees a full payload. Small payloads (≤ 5 KiB)
//! are passed whole; larger ones are reduced to four windows — a head, three
//! interior slices at the quartile offsets, and a tail — so the agent can
//! see the overall shape, the repeating record structure, and any trailing
//! summary fields without the prompt growing with the payload.
//!
//! Samples are raw substring slices of the serialized payload. They are not
//! required to be syntactically valid JSON; their only consumer is the
//! analysis prompt.

use serde::Serialize;

/// Payloads at or below this serialized size are sampled whole.
pub const FULL_SAMPLE_THRESHOLD: usize = 5120;
/// Size of the head slice for strategic sampling.
const HEAD_LEN: usize = 1024;
/// Size of each interior slice.
const MIDDLE_LEN: usize = 512;
/// Size of the tail slice.
const TAIL_LEN: usize = 500;

/// How a payload was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStrategy {
    /// The entire payload fit in the prompt budget.
    Full,
    /// Head + quartile slices + tail.
    Strategic,
}

/// A sampled view of a serialized payload.
#[derive(Debug, Clone, Serialize)]
pub struct SamplePack {
    pub first: String,
    pub middle: Vec<String>,
    pub last: String,
    pub strategy: SampleStrategy,
}

/// Slice `len` bytes starting at `start`, clamped to char boundaries.
///
/// Byte offsets that land inside a multi-byte character are walked back
/// to the previous boundary, so slicing never panics on UTF-8 payloads.
fn slice_at(s: &str, start: usize, len: usize) -> &str {
    let mut begin = start.min(s.len());
    while begin > 0 && !s.is_char_boundary(begin) {
        begin -= 1;
    }
    let mut end = (start + len).min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[begin..end.max(begin)]
}

/// Sample a serialized payload.
///
/// Payloads of at most [`FULL_SAMPLE_THRESHOLD`] bytes are returned whole
/// with `strategy = full`. Larger payloads yield the first 1024 bytes,
/// 512-byte slices at the 25/50/75% offsets, and the last 500 bytes, with
/// `strategy = strategic`.
pub fn sample_payload(serialized: &str) -> SamplePack {
    let len = serialized.len();

    if len <= FULL_SAMPLE_THRESHOLD {
        return SamplePack {
            first: serialized.to_string(),
            middle: Vec::new(),
            last: String::new(),
            strategy: SampleStrategy::Full,
        };
    }

    let middle = [len / 4, len / 2, len * 3 / 4]
        .iter()
        .map(|&offset| slice_at(serialized, offset, MIDDLE_LEN).to_string())
        .collect();

    SamplePack {
        first: slice_at(serialized, 0, HEAD_LEN).to_string(),
        middle,
        last: slice_at(serialized, len - TAIL_LEN, TAIL_LEN).to_string(),
        strategy: SampleStrategy::Strategic,
    }
}
