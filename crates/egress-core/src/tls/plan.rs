//! Fragment boundary selection and record synthesis

use super::record::RecordHeader;
use crate::range::Range;
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Range as Span;

/// Partition `[start, end)` into consecutive chunks with sizes drawn from `size`
///
/// A sampled size of zero still advances by one byte.
pub fn split_general(start: usize, end: usize, size: &Range, out: &mut Vec<Span<usize>>) {
    let mut offset = start;
    while offset < end {
        let len = size.sample_usize().clamp(1, end - offset);
        out.push(offset..offset + len);
        offset += len;
    }
}

/// Choose fragment boundaries for a ClientHello body of `body_len` bytes
///
/// With a host-name span of at least two bytes, one cut lands strictly
/// inside it and the bytes around it are chunked independently.
pub fn plan_fragments(body_len: usize, size: &Range, sni: Option<Span<usize>>) -> Vec<Span<usize>> {
    let mut chunks = Vec::new();

    match sni.filter(|s| s.end <= body_len && s.len() >= 2) {
        Some(sni) => {
            let cut = sample_cut(&sni);
            split_general(0, sni.start, size, &mut chunks);
            chunks.push(sni.start..cut);
            chunks.push(cut..sni.end);
            split_general(sni.end, body_len, size, &mut chunks);
        }
        None => split_general(0, body_len, size, &mut chunks),
    }

    chunks
}

/// Cut point in `[start + 1, end - 1]`
fn sample_cut(sni: &Span<usize>) -> usize {
    let lo = (sni.start + 1) as u64;
    let hi = (sni.end - 1) as u64;
    Range::new(lo, hi)
        .map(|r| r.sample() as usize)
        .unwrap_or(sni.start + 1)
}

/// Wrap each chunk of `body` in its own record header
pub fn encode_records(header: RecordHeader, body: &[u8], chunks: &[Span<usize>]) -> Vec<Bytes> {
    chunks
        .iter()
        .map(|chunk| {
            let payload = &body[chunk.clone()];
            let len = u16::try_from(payload.len()).unwrap_or(u16::MAX);
            let mut record = BytesMut::with_capacity(super::record::RECORD_HEADER_LEN + payload.len());
            record.put_slice(&header.with_length(len).encode());
            record.put_slice(payload);
            record.freeze()
        })
        .collect()
}
