//! Binary framing for aggregated samples.
//!
//! Every record is self-delimited: a little-endian `u32` body length followed
//! by the three length-prefixed id chunks, the timestamp, the value, and the
//! storage policy. A frame handed to the sink is a concatenation of whole
//! records in emission order; the engine never splits a record across frames.

pub mod pool;

use std::time::Duration;

use thiserror::Error;

use crate::metric::{ChunkedSample, StoragePolicy};
use pool::BufferedEncoder;

/// Longest id chunk (prefix, data, or suffix) a record may carry.
pub const MAX_CHUNK_LEN: usize = u16::MAX as usize;

/// Bytes of the leading length word.
const LEN_WORD: usize = 4;

/// Fixed trailer: time (i64), value (f64), policy resolution + retention (i64 each).
const FIXED_BODY: usize = 8 + 8 + 8 + 8;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("id prefix of {0} bytes exceeds the {MAX_CHUNK_LEN}-byte chunk limit")]
    PrefixTooLong(usize),
    #[error("id of {0} bytes exceeds the {MAX_CHUNK_LEN}-byte chunk limit")]
    IdTooLong(usize),
    #[error("id suffix of {0} bytes exceeds the {MAX_CHUNK_LEN}-byte chunk limit")]
    SuffixTooLong(usize),
    #[error("encoder poisoned by an earlier record failure")]
    EncoderPoisoned,
    #[error("truncated record at offset {0}")]
    TruncatedRecord(usize),
}

/// Serializes aggregated samples into its current [`BufferedEncoder`].
///
/// A failed encode leaves the encoder in a sticky error state: subsequent
/// records are rejected until [`reset`](AggregatedEncoder::reset) (same
/// buffer) or [`reset_with`](AggregatedEncoder::reset_with) (fresh buffer)
/// clears it. The caller owns truncating the buffer back to its pre-call
/// length on failure; a rejected record never writes bytes, so truncating to
/// the before-length restores the exact prior contents.
pub struct AggregatedEncoder {
    buffer: BufferedEncoder,
    poisoned: bool,
}

impl AggregatedEncoder {
    pub fn new(buffer: BufferedEncoder) -> Self {
        Self {
            buffer,
            poisoned: false,
        }
    }

    /// Appends one whole record. On success the buffer length advances by
    /// exactly the record size; callers compute record sizes by differencing
    /// [`len`](AggregatedEncoder::len) around the call.
    pub fn encode_record(&mut self, sample: &ChunkedSample<'_>) -> Result<(), CodecError> {
        if self.poisoned {
            return Err(CodecError::EncoderPoisoned);
        }
        if sample.id.prefix.len() > MAX_CHUNK_LEN {
            self.poisoned = true;
            return Err(CodecError::PrefixTooLong(sample.id.prefix.len()));
        }
        if sample.id.data.len() > MAX_CHUNK_LEN {
            self.poisoned = true;
            return Err(CodecError::IdTooLong(sample.id.data.len()));
        }
        if sample.id.suffix.len() > MAX_CHUNK_LEN {
            self.poisoned = true;
            return Err(CodecError::SuffixTooLong(sample.id.suffix.len()));
        }

        let body_len = 2 + sample.id.prefix.len()
            + 2 + sample.id.data.len()
            + 2 + sample.id.suffix.len()
            + FIXED_BODY;

        self.buffer.write(&(body_len as u32).to_le_bytes());
        write_chunk(&mut self.buffer, sample.id.prefix);
        write_chunk(&mut self.buffer, sample.id.data);
        write_chunk(&mut self.buffer, sample.id.suffix);
        self.buffer.write(&sample.time_ns.to_le_bytes());
        self.buffer.write(&sample.value.to_le_bytes());
        self.buffer.write(&duration_nanos(sample.policy.resolution).to_le_bytes());
        self.buffer.write(&duration_nanos(sample.policy.retention).to_le_bytes());
        Ok(())
    }

    /// Appends bytes that are already whole framed records. Used to carry the
    /// tail record into a fresh buffer when a frame is split at the size
    /// threshold.
    pub fn write_framed(&mut self, framed: &[u8]) {
        self.buffer.write(framed);
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
    }

    /// Clears the sticky error while keeping the current buffer. Paired with
    /// a truncate back to the pre-record length this drops exactly the failed
    /// record.
    pub fn reset(&mut self) {
        self.poisoned = false;
    }

    /// Starts encoding into `fresh`, returning the detached previous buffer.
    /// Clears the sticky error state.
    pub fn reset_with(&mut self, fresh: BufferedEncoder) -> BufferedEncoder {
        self.poisoned = false;
        std::mem::replace(&mut self.buffer, fresh)
    }
}

fn write_chunk(buffer: &mut BufferedEncoder, chunk: &[u8]) {
    buffer.write(&(chunk.len() as u16).to_le_bytes());
    buffer.write(chunk);
}

fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// A decoded record with owned id chunks. Decoding exists for the sink side
/// of tests and tooling; the engine itself only ever encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRecord {
    pub prefix: Vec<u8>,
    pub id: Vec<u8>,
    pub suffix: Vec<u8>,
    pub time_ns: i64,
    pub value: f64,
    pub policy: StoragePolicy,
}

/// Decodes a frame into whole records, rejecting any partial trailing bytes.
pub fn decode_records(frame: &[u8]) -> Result<Vec<OwnedRecord>, CodecError> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < frame.len() {
        let record_start = offset;
        let body_len = read_u32(frame, &mut offset).ok_or(CodecError::TruncatedRecord(record_start))? as usize;
        if frame.len() - offset < body_len {
            return Err(CodecError::TruncatedRecord(record_start));
        }
        let body_end = offset + body_len;

        let prefix = read_chunk(frame, &mut offset, body_end)
            .ok_or(CodecError::TruncatedRecord(record_start))?;
        let id = read_chunk(frame, &mut offset, body_end)
            .ok_or(CodecError::TruncatedRecord(record_start))?;
        let suffix = read_chunk(frame, &mut offset, body_end)
            .ok_or(CodecError::TruncatedRecord(record_start))?;

        if body_end - offset != FIXED_BODY {
            return Err(CodecError::TruncatedRecord(record_start));
        }
        let time_ns = i64::from_le_bytes(frame[offset..offset + 8].try_into().unwrap());
        let value = f64::from_le_bytes(frame[offset + 8..offset + 16].try_into().unwrap());
        let resolution_ns = i64::from_le_bytes(frame[offset + 16..offset + 24].try_into().unwrap());
        let retention_ns = i64::from_le_bytes(frame[offset + 24..offset + 32].try_into().unwrap());
        offset = body_end;

        records.push(OwnedRecord {
            prefix: prefix.to_vec(),
            id: id.to_vec(),
            suffix: suffix.to_vec(),
            time_ns,
            value,
            policy: StoragePolicy::new(
                Duration::from_nanos(resolution_ns.max(0) as u64),
                Duration::from_nanos(retention_ns.max(0) as u64),
            ),
        });
    }

    Ok(records)
}

fn read_u32(frame: &[u8], offset: &mut usize) -> Option<u32> {
    if frame.len() - *offset < LEN_WORD {
        return None;
    }
    let v = u32::from_le_bytes(frame[*offset..*offset + LEN_WORD].try_into().unwrap());
    *offset += LEN_WORD;
    Some(v)
}

fn read_chunk<'a>(frame: &'a [u8], offset: &mut usize, body_end: usize) -> Option<&'a [u8]> {
    if body_end - *offset < 2 {
        return None;
    }
    let len = u16::from_le_bytes(frame[*offset..*offset + 2].try_into().unwrap()) as usize;
    *offset += 2;
    if body_end - *offset < len {
        return None;
    }
    let chunk = &frame[*offset..*offset + len];
    *offset += len;
    Some(chunk)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::metric::ChunkedId;

    fn sample<'a>(prefix: &'a [u8], id: &'a [u8], suffix: &'a [u8], value: f64) -> ChunkedSample<'a> {
        ChunkedSample {
            id: ChunkedId {
                prefix,
                data: id,
                suffix,
            },
            time_ns: 1_600_000_000_000_000_000,
            value,
            policy: StoragePolicy::new(Duration::from_secs(10), Duration::from_secs(3600)),
        }
    }

    #[test]
    fn test_encode_then_decode_single() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        enc.encode_record(&sample(b"stats.", b"requests", b".count", 42.5))
            .expect("encode");

        let records = decode_records(enc.bytes()).expect("decode");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prefix, b"stats.");
        assert_eq!(records[0].id, b"requests");
        assert_eq!(records[0].suffix, b".count");
        assert_eq!(records[0].value, 42.5);
        assert_eq!(records[0].policy.resolution, Duration::from_secs(10));
    }

    #[test]
    fn test_encode_advances_by_exact_record_size() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        let before = enc.len();
        enc.encode_record(&sample(b"p", b"id", b"s", 1.0)).expect("encode");
        let record_size = enc.len() - before;
        // LEN_WORD + three (u16 + chunk) headers + fixed trailer.
        assert_eq!(record_size, 4 + (2 + 1) + (2 + 2) + (2 + 1) + 32);
    }

    #[test]
    fn test_oversize_id_fails_without_writing() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        enc.encode_record(&sample(b"", b"keep", b"", 1.0)).expect("encode");
        let before = enc.len();

        let huge = vec![b'x'; MAX_CHUNK_LEN + 1];
        let err = enc
            .encode_record(&sample(b"", &huge, b"", 2.0))
            .expect_err("oversize id must fail");
        assert!(matches!(err, CodecError::IdTooLong(_)));
        assert_eq!(enc.len(), before, "failed record must not write bytes");

        // Error is sticky until reset.
        let err = enc
            .encode_record(&sample(b"", b"ok", b"", 3.0))
            .expect_err("poisoned encoder must reject");
        assert!(matches!(err, CodecError::EncoderPoisoned));

        enc.reset();
        enc.encode_record(&sample(b"", b"ok", b"", 3.0)).expect("encode after reset");
        let records = decode_records(enc.bytes()).expect("decode");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_reset_with_detaches_buffer() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        enc.encode_record(&sample(b"", b"a", b"", 1.0)).expect("encode");
        let full = enc.reset_with(BufferedEncoder::new());
        assert!(!full.is_empty());
        assert!(enc.is_empty());

        enc.encode_record(&sample(b"", b"b", b"", 2.0)).expect("encode");
        assert_eq!(decode_records(enc.bytes()).expect("decode").len(), 1);
    }

    #[test]
    fn test_write_framed_carries_whole_records() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        enc.encode_record(&sample(b"", b"a", b"", 1.0)).expect("encode");
        let split_at = enc.len();
        enc.encode_record(&sample(b"", b"b", b"", 2.0)).expect("encode");

        let mut carried = AggregatedEncoder::new(BufferedEncoder::new());
        carried.write_framed(&enc.bytes()[split_at..]);
        enc.truncate(split_at);

        let head = decode_records(enc.bytes()).expect("decode head");
        let tail = decode_records(carried.bytes()).expect("decode tail");
        assert_eq!(head.len(), 1);
        assert_eq!(tail.len(), 1);
        assert_eq!(head[0].id, b"a");
        assert_eq!(tail[0].id, b"b");
    }

    #[test]
    fn test_decode_rejects_partial_trailing_record() {
        let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
        enc.encode_record(&sample(b"", b"a", b"", 1.0)).expect("encode");
        enc.encode_record(&sample(b"", b"b", b"", 2.0)).expect("encode");

        let frame = enc.bytes();
        let cut = &frame[..frame.len() - 5];
        assert!(matches!(
            decode_records(cut),
            Err(CodecError::TruncatedRecord(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_records(
            records in prop::collection::vec(
                (
                    prop::collection::vec(any::<u8>(), 0..32),
                    prop::collection::vec(any::<u8>(), 0..64),
                    prop::collection::vec(any::<u8>(), 0..16),
                    any::<i64>(),
                    prop::num::f64::NORMAL,
                    1u64..1_000_000,
                ),
                0..16,
            )
        ) {
            let mut enc = AggregatedEncoder::new(BufferedEncoder::new());
            for (prefix, id, suffix, time_ns, value, res_secs) in &records {
                let s = ChunkedSample {
                    id: ChunkedId { prefix, data: id, suffix },
                    time_ns: *time_ns,
                    value: *value,
                    policy: StoragePolicy::new(
                        Duration::from_secs(*res_secs),
                        Duration::from_secs(res_secs * 6),
                    ),
                };
                enc.encode_record(&s).expect("encode");
            }

            let decoded = decode_records(enc.bytes()).expect("decode");
            prop_assert_eq!(decoded.len(), records.len());
            for (got, (prefix, id, suffix, time_ns, value, _)) in decoded.iter().zip(&records) {
                prop_assert_eq!(&got.prefix, prefix);
                prop_assert_eq!(&got.id, id);
                prop_assert_eq!(&got.suffix, suffix);
                prop_assert_eq!(got.time_ns, *time_ns);
                prop_assert_eq!(got.value, *value);
            }
        }
    }
}
