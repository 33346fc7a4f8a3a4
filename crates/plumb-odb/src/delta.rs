//! Git delta format: decoding, application and a simple encoder.
//!
//! A delta is `base_size varint`, `target_size varint`, then instructions:
//! - `1xxxxxxx`: copy from base; low 4 bits select offset bytes, next 3 bits
//!   select size bytes (size 0 means 0x10000)
//! - `0nnnnnnn`: insert the next `n` (1..=127) literal bytes
//! - `00000000`: reserved, rejected

use crate::{OdbError, Result};
use std::collections::HashMap;
use tracing::trace;

/// Largest literal run a single insert instruction can carry.
const MAX_INSERT: usize = 0x7f;
/// Largest copy a single instruction emits (the encoder never uses the 24-bit form).
const MAX_COPY: usize = 0x10000;
/// Block size used to find matches when generating deltas.
const BLOCK: usize = 16;

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaInstruction {
    /// Copy `len` bytes from the base starting at `offset`.
    Copy {
        /// Offset into the base object.
        offset: u64,
        /// Number of bytes to copy.
        len: u64,
    },
    /// Append literal bytes from the delta stream.
    Insert(Vec<u8>),
}

/// A decoded delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Declared size of the base object.
    pub base_size: u64,
    /// Declared size of the reconstructed object.
    pub target_size: u64,
    /// Instructions in stream order.
    pub instructions: Vec<DeltaInstruction>,
}

impl Delta {
    /// Decodes a delta stream.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let base_size = read_size(data, &mut pos)?;
        let target_size = read_size(data, &mut pos)?;
        let mut instructions = Vec::new();
        while pos < data.len() {
            instructions.push(read_instruction(data, &mut pos)?);
        }
        Ok(Self {
            base_size,
            target_size,
            instructions,
        })
    }

    /// Encodes the delta to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_size(&mut out, self.base_size);
        write_size(&mut out, self.target_size);
        for instruction in &self.instructions {
            match instruction {
                DeltaInstruction::Copy { offset, len } => write_copy(&mut out, *offset, *len),
                DeltaInstruction::Insert(bytes) => {
                    for chunk in bytes.chunks(MAX_INSERT) {
                        out.push(chunk.len() as u8);
                        out.extend_from_slice(chunk);
                    }
                }
            }
        }
        out
    }
}

/// Reads the base size declared by a delta without applying it.
pub fn base_size(delta: &[u8]) -> Result<u64> {
    let mut pos = 0;
    read_size(delta, &mut pos)
}

/// Applies a delta to a base object.
///
/// The base length must equal the declared base size and the output length
/// must equal the declared target size.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    let target_size = read_size(delta, &mut pos)?;

    if base.len() as u64 != base_size {
        return Err(OdbError::Format(format!(
            "delta base size mismatch: declared {base_size}, base has {}",
            base.len()
        )));
    }

    let capacity = usize::try_from(target_size)
        .map_err(|_| OdbError::Format(format!("delta target too large: {target_size}")))?;
    let mut out = Vec::with_capacity(capacity.min(1 << 24));

    while pos < delta.len() {
        match read_instruction(delta, &mut pos)? {
            DeltaInstruction::Copy { offset, len } => {
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= base.len() as u64)
                    .ok_or_else(|| {
                        OdbError::Format(format!(
                            "delta copy {offset}+{len} outside base of {} bytes",
                            base.len()
                        ))
                    })?;
                out.extend_from_slice(&base[offset as usize..end as usize]);
            }
            DeltaInstruction::Insert(bytes) => out.extend_from_slice(&bytes),
        }
        if out.len() as u64 > target_size {
            return Err(OdbError::Format(format!(
                "delta output exceeds declared target size {target_size}"
            )));
        }
    }

    if out.len() as u64 != target_size {
        return Err(OdbError::Format(format!(
            "delta target size mismatch: declared {target_size}, produced {}",
            out.len()
        )));
    }

    trace!(base = base.len(), target = out.len(), "applied delta");
    Ok(out)
}

/// Generates a delta that turns `base` into `target`.
///
/// Matches are found on `BLOCK`-byte boundaries of the base and extended
/// forward; everything else becomes literal inserts.
pub fn create_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut blocks: HashMap<&[u8], usize> = HashMap::new();
    if base.len() >= BLOCK {
        for offset in (0..=base.len() - BLOCK).step_by(BLOCK) {
            blocks.entry(&base[offset..offset + BLOCK]).or_insert(offset);
        }
    }

    let mut instructions = Vec::new();
    let mut pending = Vec::new();
    let mut pos = 0;

    while pos < target.len() {
        let candidate = target
            .get(pos..pos + BLOCK)
            .and_then(|block| blocks.get(block).copied());

        match candidate {
            Some(base_offset) => {
                let mut len = BLOCK;
                while base_offset + len < base.len()
                    && pos + len < target.len()
                    && base[base_offset + len] == target[pos + len]
                {
                    len += 1;
                }

                if !pending.is_empty() {
                    instructions.push(DeltaInstruction::Insert(std::mem::take(&mut pending)));
                }
                let mut copied = 0;
                while copied < len {
                    let chunk = (len - copied).min(MAX_COPY);
                    instructions.push(DeltaInstruction::Copy {
                        offset: (base_offset + copied) as u64,
                        len: chunk as u64,
                    });
                    copied += chunk;
                }
                pos += len;
            }
            None => {
                pending.push(target[pos]);
                pos += 1;
            }
        }
    }
    if !pending.is_empty() {
        instructions.push(DeltaInstruction::Insert(pending));
    }

    Delta {
        base_size: base.len() as u64,
        target_size: target.len() as u64,
        instructions,
    }
    .encode()
}

/// Little-endian base-128 size (used for the two delta header sizes).
fn read_size(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| OdbError::Format("truncated delta size".to_string()))?;
        *pos += 1;
        if shift > 63 {
            return Err(OdbError::Format("delta size varint too long".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn write_size(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_instruction(data: &[u8], pos: &mut usize) -> Result<DeltaInstruction> {
    let truncated = || OdbError::Format("truncated delta instruction".to_string());
    let opcode = data[*pos];
    *pos += 1;

    if opcode & 0x80 != 0 {
        let mut offset = 0u64;
        for i in 0..4 {
            if opcode & (1 << i) != 0 {
                let byte = *data.get(*pos).ok_or_else(truncated)?;
                *pos += 1;
                offset |= u64::from(byte) << (8 * i);
            }
        }
        let mut len = 0u64;
        for i in 0..3 {
            if opcode & (0x10 << i) != 0 {
                let byte = *data.get(*pos).ok_or_else(truncated)?;
                *pos += 1;
                len |= u64::from(byte) << (8 * i);
            }
        }
        if len == 0 {
            len = MAX_COPY as u64;
        }
        Ok(DeltaInstruction::Copy { offset, len })
    } else if opcode != 0 {
        let len = opcode as usize;
        let bytes = data.get(*pos..*pos + len).ok_or_else(truncated)?;
        *pos += len;
        Ok(DeltaInstruction::Insert(bytes.to_vec()))
    } else {
        Err(OdbError::Format("reserved delta opcode 0".to_string()))
    }
}

fn write_copy(out: &mut Vec<u8>, offset: u64, len: u64) {
    let opcode_at = out.len();
    out.push(0x80);
    let mut opcode = 0x80u8;
    for i in 0..4 {
        let byte = (offset >> (8 * i)) as u8;
        if byte != 0 {
            opcode |= 1 << i;
            out.push(byte);
        }
    }
    // A size of exactly 0x10000 is encoded as "no size bytes".
    let len = if len == MAX_COPY as u64 { 0 } else { len };
    for i in 0..3 {
        let byte = (len >> (8 * i)) as u8;
        if byte != 0 {
            opcode |= 0x10 << i;
            out.push(byte);
        }
    }
    out[opcode_at] = opcode;
}
