//! Whole-structure snapshots.
//!
//! The on-disk format is a sequence of little-endian sections, one per
//! declared table: a tag byte, the table name, the payload, and a CRC32
//! content hash of the payload. Loading re-declares nothing; the signature
//! must already carry the snapshot's symbols, and every section's hash is
//! checked before its rows are installed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use magma_core::{Arity, Ob, Signature};

use crate::error::{EngineError, Result};

const MAGIC: &[u8; 8] = b"MAGMA\0v1";

const TAG_CARRIER: u8 = 0;
const TAG_UNARY_RELATION: u8 = 1;
const TAG_BINARY_RELATION: u8 = 2;
const TAG_NULLARY_FUNCTION: u8 = 3;
const TAG_INJECTIVE_FUNCTION: u8 = 4;
const TAG_BINARY_FUNCTION: u8 = 5;
const TAG_SYMMETRIC_FUNCTION: u8 = 6;

/// Dumps a self-consistent view of the support and every declared table.
pub fn dump(signature: &Signature, path: &Path) -> Result<()> {
    info!(?path, "dumping structure");
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(MAGIC)?;

    let carrier = signature.carrier();
    let mut payload = Vec::new();
    put_u64(&mut payload, carrier.item_dim() as u64);
    let obs: Vec<Ob> = carrier.iter().collect();
    put_u64(&mut payload, obs.len() as u64);
    for ob in obs {
        put_u32(&mut payload, ob);
    }
    write_section(&mut out, TAG_CARRIER, "carrier", &payload)?;

    for (name, rel) in signature.unary_relations() {
        let mut payload = Vec::new();
        let obs: Vec<Ob> = rel.iter().collect();
        put_u64(&mut payload, obs.len() as u64);
        for ob in obs {
            put_u32(&mut payload, ob);
        }
        write_section(&mut out, TAG_UNARY_RELATION, name, &payload)?;
    }

    for (name, rel) in signature.binary_relations() {
        let mut payload = Vec::new();
        let mut pairs = Vec::new();
        for lhs in carrier.iter() {
            for rhs in rel.iter_lhs(lhs) {
                pairs.push((lhs, rhs));
            }
        }
        put_u64(&mut payload, pairs.len() as u64);
        for (lhs, rhs) in pairs {
            put_u32(&mut payload, lhs);
            put_u32(&mut payload, rhs);
        }
        write_section(&mut out, TAG_BINARY_RELATION, name, &payload)?;
    }

    for (name, fun) in signature.nullary_functions() {
        let mut payload = Vec::new();
        put_u32(&mut payload, fun.find());
        write_section(&mut out, TAG_NULLARY_FUNCTION, name, &payload)?;
    }

    for (name, fun) in signature.injective_functions() {
        let mut payload = Vec::new();
        let keys: Vec<Ob> = fun.iter().collect();
        put_u64(&mut payload, keys.len() as u64);
        for key in keys {
            put_u32(&mut payload, key);
            put_u32(&mut payload, fun.find(key));
        }
        write_section(&mut out, TAG_INJECTIVE_FUNCTION, name, &payload)?;
    }

    for (name, fun) in signature.binary_functions() {
        let mut payload = Vec::new();
        let mut entries = Vec::new();
        for lhs in carrier.iter() {
            for rhs in fun.iter_lhs(lhs) {
                entries.push((lhs, rhs, fun.find(lhs, rhs)));
            }
        }
        put_u64(&mut payload, entries.len() as u64);
        for (lhs, rhs, val) in entries {
            put_u32(&mut payload, lhs);
            put_u32(&mut payload, rhs);
            put_u32(&mut payload, val);
        }
        write_section(&mut out, TAG_BINARY_FUNCTION, name, &payload)?;
    }

    for (name, fun) in signature.symmetric_functions() {
        let mut payload = Vec::new();
        let mut entries = Vec::new();
        for lhs in carrier.iter() {
            for rhs in fun.iter_lhs(lhs) {
                if rhs >= lhs {
                    entries.push((lhs, rhs, fun.find(lhs, rhs)));
                }
            }
        }
        put_u64(&mut payload, entries.len() as u64);
        for (lhs, rhs, val) in entries {
            put_u32(&mut payload, lhs);
            put_u32(&mut payload, rhs);
            put_u32(&mut payload, val);
        }
        write_section(&mut out, TAG_SYMMETRIC_FUNCTION, name, &payload)?;
    }

    out.flush()?;
    Ok(())
}

/// Loads a snapshot into an already-declared signature, validating each
/// section's content hash against the stored one.
pub fn load(signature: &Signature, path: &Path) -> Result<()> {
    info!(?path, "loading structure");
    let mut input = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 8];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(EngineError::CorruptSnapshot {
            table: "magic".to_owned(),
        });
    }

    let carrier = signature.carrier();
    while let Some((tag, name, payload)) = read_section(&mut input)? {
        debug!(tag, name, bytes = payload.len(), "loading section");
        let mut bytes = payload.as_slice();
        let corrupt = || EngineError::CorruptSnapshot {
            table: name.clone(),
        };
        match tag {
            TAG_CARRIER => {
                let item_dim = get_u64(&mut bytes).ok_or_else(corrupt)? as usize;
                if item_dim != carrier.item_dim() {
                    return Err(corrupt());
                }
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let ob = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    if ob == 0 || ob as usize > carrier.item_dim() {
                        return Err(EngineError::InvalidId { ob });
                    }
                    carrier.raw_insert(ob);
                }
                carrier.update_counts();
            }
            TAG_UNARY_RELATION => {
                let rel = signature.unary_relation(&name).ok_or_else(corrupt)?;
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let ob = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    rel.raw_insert(ob);
                }
            }
            TAG_BINARY_RELATION => {
                let rel = signature.binary_relation(&name).ok_or_else(corrupt)?;
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let lhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let rhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    rel.raw_insert(lhs, rhs);
                }
            }
            TAG_NULLARY_FUNCTION => {
                let fun = signature.nullary_function(&name).ok_or_else(corrupt)?;
                let val = get_u32(&mut bytes).ok_or_else(corrupt)?;
                if val != 0 {
                    fun.raw_insert(val);
                }
            }
            TAG_INJECTIVE_FUNCTION => {
                let fun = signature.injective_function(&name).ok_or_else(corrupt)?;
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let key = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let val = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    fun.raw_insert(key, val);
                }
            }
            TAG_BINARY_FUNCTION => {
                let fun = signature.binary_function(&name).ok_or_else(corrupt)?;
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let lhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let rhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let val = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    fun.raw_insert(lhs, rhs, val);
                }
            }
            TAG_SYMMETRIC_FUNCTION => {
                let fun = signature.symmetric_function(&name).ok_or_else(corrupt)?;
                let count = get_u64(&mut bytes).ok_or_else(corrupt)?;
                for _ in 0..count {
                    let lhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let rhs = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    let val = get_u32(&mut bytes).ok_or_else(corrupt)?;
                    fun.raw_insert(lhs, rhs, val);
                }
            }
            _ => return Err(corrupt()),
        }
        if !bytes.is_empty() {
            return Err(corrupt());
        }
    }

    signature.validate();
    Ok(())
}

/// Arity of a section tag; snapshot tooling uses this to sanity-check
/// section names against a signature file.
pub fn tag_arity(tag: u8) -> Option<Arity> {
    match tag {
        TAG_UNARY_RELATION => Some(Arity::UnaryRelation),
        TAG_BINARY_RELATION => Some(Arity::BinaryRelation),
        TAG_NULLARY_FUNCTION => Some(Arity::NullaryFunction),
        TAG_INJECTIVE_FUNCTION => Some(Arity::InjectiveFunction),
        TAG_BINARY_FUNCTION => Some(Arity::BinaryFunction),
        TAG_SYMMETRIC_FUNCTION => Some(Arity::SymmetricFunction),
        _ => None,
    }
}

fn put_u32(payload: &mut Vec<u8>, value: u32) {
    payload.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(payload: &mut Vec<u8>, value: u64) {
    payload.extend_from_slice(&value.to_le_bytes());
}

fn get_u32(bytes: &mut &[u8]) -> Option<u32> {
    if bytes.len() < 4 {
        return None;
    }
    let (head, rest) = bytes.split_at(4);
    *bytes = rest;
    Some(u32::from_le_bytes(head.try_into().ok()?))
}

fn get_u64(bytes: &mut &[u8]) -> Option<u64> {
    if bytes.len() < 8 {
        return None;
    }
    let (head, rest) = bytes.split_at(8);
    *bytes = rest;
    Some(u64::from_le_bytes(head.try_into().ok()?))
}

fn write_section(out: &mut impl Write, tag: u8, name: &str, payload: &[u8]) -> Result<()> {
    let digest = crc32fast::hash(payload);
    debug!(tag, name, bytes = payload.len(), digest, "dumping section");
    out.write_all(&[tag])?;
    out.write_all(&(name.len() as u16).to_le_bytes())?;
    out.write_all(name.as_bytes())?;
    out.write_all(&(payload.len() as u64).to_le_bytes())?;
    out.write_all(payload)?;
    out.write_all(&digest.to_le_bytes())?;
    Ok(())
}

fn read_section(input: &mut impl Read) -> Result<Option<(u8, String, Vec<u8>)>> {
    let mut tag = [0u8; 1];
    if input.read(&mut tag)? == 0 {
        return Ok(None);
    }
    let mut name_len = [0u8; 2];
    input.read_exact(&mut name_len)?;
    let mut name = vec![0u8; u16::from_le_bytes(name_len) as usize];
    input.read_exact(&mut name)?;
    let name = String::from_utf8(name).map_err(|_| EngineError::CorruptSnapshot {
        table: "section name".to_owned(),
    })?;
    let mut payload_len = [0u8; 8];
    input.read_exact(&mut payload_len)?;
    let mut payload = vec![0u8; u64::from_le_bytes(payload_len) as usize];
    input.read_exact(&mut payload)?;
    let mut stored = [0u8; 4];
    input.read_exact(&mut stored)?;
    if crc32fast::hash(&payload) != u32::from_le_bytes(stored) {
        return Err(EngineError::CorruptSnapshot { table: name });
    }
    Ok(Some((tag[0], name, payload)))
}
