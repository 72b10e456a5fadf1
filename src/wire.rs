//! §6 wire decode: the pure, allocation-only decoder for inbound snap
//! messages. Kept free of registry/engine state so it can be unit-tested
//! against raw byte buffers without spinning up an engine.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{EngineError, Result};

/// Opcode carried by a snap message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A realm's seq, topology, or snap lists advanced.
    Update,
    /// A realm was created.
    Create,
    /// A realm is being torn down; suppresses cap_snap queueing.
    Destroy,
    /// Part of a realm is becoming a new child realm, migrating inodes.
    Split,
}

impl Opcode {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Opcode::Update),
            1 => Ok(Opcode::Create),
            2 => Ok(Opcode::Destroy),
            3 => Ok(Opcode::Split),
            other => Err(EngineError::Malformed(format!("unknown opcode {}", other))),
        }
    }
}

/// One per-realm record within a trace, deepest realm first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// The realm's stable identifier.
    pub ino: u64,
    /// The realm's parent ino as of this record (0 means no parent).
    pub parent: u64,
    /// Server-assigned logical version.
    pub seq: u64,
    /// Server-assigned (logical) creation timestamp.
    pub created: u64,
    /// The point at which the current parent became this realm's parent.
    pub parent_since: u64,
    /// Snapshots created directly on this realm.
    pub snaps: Vec<u64>,
    /// Snapshots inherited from previous parents.
    pub prior_parent_snaps: Vec<u64>,
}

/// A fully decoded snap message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapMessage {
    /// The message's opcode.
    pub op: Opcode,
    /// The new child realm being formed by a `Split` message; unused
    /// otherwise.
    pub split: u64,
    /// Inode ids being split out into the new realm (`Split` only).
    pub split_inos: Vec<u64>,
    /// Child realm ids being reparented onto the new realm (`Split` only).
    pub split_realms: Vec<u64>,
    /// The leaf-to-root sequence of affected realm records.
    pub trace: Vec<TraceRecord>,
}

/// Decode a complete snap message from `buf`.
///
/// `max_trace_records` bounds the number of trace records accepted, guarding
/// against a corrupt or hostile `trace_len` driving unbounded allocation
/// (the header's lengths are otherwise untrusted input).
pub fn decode_snap_message(buf: &[u8], max_trace_records: usize) -> Result<SnapMessage> {
    let mut cursor = Cursor::new(buf);

    let op = Opcode::from_u32(read_u32(&mut cursor)?)?;
    let split = read_u64(&mut cursor)?;
    let num_split_inos = read_u32(&mut cursor)? as usize;
    let num_split_realms = read_u32(&mut cursor)? as usize;
    let trace_len = read_u32(&mut cursor)? as usize;

    let split_inos = read_u64_array(&mut cursor, num_split_inos)?;
    let split_realms = read_u64_array(&mut cursor, num_split_realms)?;

    let trace_start = cursor.position() as usize;
    let trace_end = trace_start
        .checked_add(trace_len)
        .ok_or_else(|| EngineError::Malformed("trace_len overflows message bounds".into()))?;
    if trace_end > buf.len() {
        return Err(EngineError::Malformed(
            "trace_len extends past end of message".into(),
        ));
    }

    let trace = decode_trace(&buf[trace_start..trace_end], max_trace_records)?;

    Ok(SnapMessage {
        op,
        split,
        split_inos,
        split_realms,
        trace,
    })
}

/// Decode a trace: a leaf-to-root sequence of realm records filling exactly
/// `trace_bytes`. The root is whichever record's end coincides with the
/// slice's end boundary.
fn decode_trace(trace_bytes: &[u8], max_trace_records: usize) -> Result<Vec<TraceRecord>> {
    let mut cursor = Cursor::new(trace_bytes);
    let mut records = Vec::new();

    while (cursor.position() as usize) < trace_bytes.len() {
        if records.len() >= max_trace_records {
            return Err(EngineError::OutOfMemory(format!(
                "trace exceeds max_trace_records ({})",
                max_trace_records
            )));
        }

        let ino = read_u64(&mut cursor)?;
        let parent = read_u64(&mut cursor)?;
        let seq = read_u64(&mut cursor)?;
        let created = read_u64(&mut cursor)?;
        let parent_since = read_u64(&mut cursor)?;
        let num_snaps = read_u32(&mut cursor)? as usize;
        let num_prior_parent_snaps = read_u32(&mut cursor)? as usize;

        let snaps = read_u64_array(&mut cursor, num_snaps)?;
        let prior_parent_snaps = read_u64_array(&mut cursor, num_prior_parent_snaps)?;

        records.push(TraceRecord {
            ino,
            parent,
            seq,
            created,
            parent_since,
            snaps,
            prior_parent_snaps,
        });
    }

    Ok(records)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| EngineError::Malformed("unexpected end of message reading u32".into()))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| EngineError::Malformed("unexpected end of message reading u64".into()))
}

fn read_u64_array(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<u64>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_u64(cursor)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn encode_record(
        buf: &mut Vec<u8>,
        ino: u64,
        parent: u64,
        seq: u64,
        created: u64,
        parent_since: u64,
        snaps: &[u64],
        prior: &[u64],
    ) {
        push_u64(buf, ino);
        push_u64(buf, parent);
        push_u64(buf, seq);
        push_u64(buf, created);
        push_u64(buf, parent_since);
        push_u32(buf, snaps.len() as u32);
        push_u32(buf, prior.len() as u32);
        for s in snaps {
            push_u64(buf, *s);
        }
        for p in prior {
            push_u64(buf, *p);
        }
    }

    fn encode_message(op: u32, split: u64, split_inos: &[u64], split_realms: &[u64], trace: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, op);
        push_u64(&mut buf, split);
        push_u32(&mut buf, split_inos.len() as u32);
        push_u32(&mut buf, split_realms.len() as u32);
        push_u32(&mut buf, trace.len() as u32);
        for i in split_inos {
            push_u64(&mut buf, *i);
        }
        for r in split_realms {
            push_u64(&mut buf, *r);
        }
        buf.extend_from_slice(trace);
        buf
    }

    #[test]
    fn decodes_single_record_update() {
        let mut trace = Vec::new();
        encode_record(&mut trace, 1, 0, 6, 100, 0, &[20, 10], &[]);
        let msg = encode_message(0, 0, &[], &[], &trace);

        let decoded = decode_snap_message(&msg, 64).unwrap();
        assert_eq!(decoded.op, Opcode::Update);
        assert_eq!(decoded.trace.len(), 1);
        assert_eq!(decoded.trace[0].ino, 1);
        assert_eq!(decoded.trace[0].seq, 6);
        assert_eq!(decoded.trace[0].snaps, vec![20, 10]);
    }

    #[test]
    fn decodes_multi_record_trace_deepest_first() {
        let mut trace = Vec::new();
        encode_record(&mut trace, 2, 1, 3, 50, 15, &[], &[]);
        encode_record(&mut trace, 1, 0, 7, 10, 0, &[30, 20, 10], &[]);
        let msg = encode_message(0, 0, &[], &[], &trace);

        let decoded = decode_snap_message(&msg, 64).unwrap();
        assert_eq!(decoded.trace.len(), 2);
        assert_eq!(decoded.trace[0].ino, 2);
        assert_eq!(decoded.trace[1].ino, 1);
    }

    #[test]
    fn decodes_split_message_fields() {
        let mut trace = Vec::new();
        encode_record(&mut trace, 5, 0, 1, 100, 0, &[], &[]);
        let msg = encode_message(3, 5, &[11, 12], &[21], &trace);

        let decoded = decode_snap_message(&msg, 64).unwrap();
        assert_eq!(decoded.op, Opcode::Split);
        assert_eq!(decoded.split, 5);
        assert_eq!(decoded.split_inos, vec![11, 12]);
        assert_eq!(decoded.split_realms, vec![21]);
    }

    #[test]
    fn rejects_truncated_message() {
        let buf = vec![0u8; 4];
        let err = decode_snap_message(&buf, 64).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }

    #[test]
    fn rejects_trace_len_past_end() {
        let msg = encode_message(0, 0, &[], &[], &[]);
        let mut msg = msg;
        let hdr_end = 4 + 8 + 4 + 4;
        msg[hdr_end - 4..hdr_end].copy_from_slice(&999u32.to_le_bytes());
        let err = decode_snap_message(&msg, 64).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }

    #[test]
    fn rejects_trace_exceeding_max_records() {
        let mut trace = Vec::new();
        encode_record(&mut trace, 1, 0, 1, 1, 0, &[], &[]);
        encode_record(&mut trace, 2, 1, 1, 1, 0, &[], &[]);
        let msg = encode_message(0, 0, &[], &[], &trace);
        let err = decode_snap_message(&msg, 1).unwrap_err();
        assert!(matches!(err, EngineError::OutOfMemory(_)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let msg = encode_message(99, 0, &[], &[], &[]);
        let err = decode_snap_message(&msg, 64).unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
    }
}
