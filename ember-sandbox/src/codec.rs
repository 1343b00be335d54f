//! Self-describing little-endian wire codec for [`HermeticSpec`].
//!
//! This is the contract between the coordinator and a worker in the
//! distributed-execution case (§6 of the specification this crate
//! implements): a `HermeticSpec` built locally is encoded, shipped, and
//! decoded byte-for-byte identically on the remote end.
//!
//! Wire format (all integers little-endian):
//!
//! ```text
//! u32 count, then count × (u32 length, bytes)   -- inputs
//! u32 count, then count × (u32 length, bytes)   -- outputs
//! u32 count, then count × (u32 length, bytes)   -- temps
//! u8  flags                                      -- bit 0: network allowed
//! u32 count, then count × (u32 keylen, keybytes, u32 vallen, valbytes) -- env
//! u64 max_memory_bytes  (0 = unspecified)
//! u64 max_cpu_time_ms   (0 = unspecified)
//! u64 timeout_ms
//! ```
//!
//! Two details the source spec flags as open questions are resolved here,
//! see `DESIGN.md`:
//!
//! - `max_cpu_time_ms` and `timeout_ms` are two distinct `u64` fields even
//!   though both commonly carry the same value; the decoder accepts that.
//! - The wire format has no dedicated slot for an `AllowHosts` host list or
//!   for `max_processes`. Both are round-tripped through two reserved env
//!   entries that are stripped back out on decode and never exposed through
//!   [`HermeticSpec::env`].

use crate::spec::{HermeticSpec, NetworkPolicy, ResourceLimits};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

const NETWORK_FLAG: u8 = 0b0000_0001;
const KNOWN_FLAGS: u8 = NETWORK_FLAG;

/// Reserved env key carrying an `AllowHosts` list (comma-joined), stripped on decode.
const HOSTS_KEY: &str = "\u{0}ember.network.allow_hosts";
/// Reserved env key carrying `max_processes`, stripped on decode.
const MAX_PROCESSES_KEY: &str = "\u{0}ember.limits.max_processes";

/// Errors raised while encoding or decoding a [`HermeticSpec`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The byte stream ended before a complete spec could be read.
    #[error("truncated hermetic spec wire data at offset {0}")]
    Truncated(usize),

    /// The flags byte set a bit this codec version does not understand.
    #[error("unknown flag bits set: {0:#010b}")]
    UnknownFlags(u8),

    /// A length or count field would not fit the platform's `usize`, or
    /// would require an allocation larger than the remaining input.
    #[error("numeric overflow decoding field at offset {0}")]
    Overflow(usize),

    /// A path or env entry's UTF-8 was invalid.
    #[error("invalid UTF-8 in wire data at offset {0}")]
    InvalidUtf8(usize),

    /// A length field's value exceeds `u32::MAX` during encoding.
    #[error("{0} is too large to encode: length {1} exceeds u32::MAX")]
    TooLarge(&'static str, usize),
}

type CodecResult<T> = Result<T, CodecError>;

/// Encode a [`HermeticSpec`] to its wire representation.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] if any path or env entry exceeds
/// `u32::MAX` bytes.
pub fn encode(spec: &HermeticSpec) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();

    encode_path_list(&mut out, spec.inputs())?;
    encode_path_list(&mut out, spec.outputs())?;
    encode_path_list(&mut out, spec.temps())?;

    let mut flags = 0u8;
    let mut env = spec.env().clone();
    match spec.network() {
        NetworkPolicy::Hermetic => {}
        NetworkPolicy::AllowHosts(hosts) => {
            flags |= NETWORK_FLAG;
            let _ = env.insert(HOSTS_KEY.to_string(), hosts.join(","));
        }
    }
    if let Some(max_processes) = spec.resource_limits().max_processes {
        let _ = env.insert(MAX_PROCESSES_KEY.to_string(), max_processes.to_string());
    }
    out.push(flags);

    encode_env(&mut out, &env)?;

    let limits = spec.resource_limits();
    out.extend_from_slice(&limits.max_memory_bytes.unwrap_or(0).to_le_bytes());
    out.extend_from_slice(&limits.max_cpu_time_ms.unwrap_or(0).to_le_bytes());
    out.extend_from_slice(&spec.timeout_ms().to_le_bytes());

    Ok(out)
}

/// Decode a [`HermeticSpec`] from its wire representation.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] on an incomplete stream,
/// [`CodecError::UnknownFlags`] if a reserved flag bit is set, and
/// [`CodecError::Overflow`] if a length/count field cannot be satisfied by
/// the remaining bytes.
pub fn decode(bytes: &[u8]) -> CodecResult<HermeticSpec> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let inputs = decode_path_list(&mut cursor)?;
    let outputs = decode_path_list(&mut cursor)?;
    let temps = decode_path_list(&mut cursor)?;

    let flags = cursor.read_u8()?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(CodecError::UnknownFlags(flags));
    }

    let mut env = decode_env(&mut cursor)?;

    let allow_hosts_raw = env.remove(HOSTS_KEY);
    let max_processes_raw = env.remove(MAX_PROCESSES_KEY);

    let network = if flags & NETWORK_FLAG != 0 {
        let hosts = allow_hosts_raw
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        NetworkPolicy::AllowHosts(hosts)
    } else {
        NetworkPolicy::Hermetic
    };

    let max_processes = max_processes_raw.and_then(|s| s.parse::<u32>().ok());

    let max_memory_bytes = cursor.read_u64()?;
    let max_cpu_time_ms = cursor.read_u64()?;
    let timeout_ms = cursor.read_u64()?;

    let resource_limits = ResourceLimits {
        max_memory_bytes: (max_memory_bytes != 0).then_some(max_memory_bytes),
        max_cpu_time_ms: (max_cpu_time_ms != 0).then_some(max_cpu_time_ms),
        max_processes,
    };

    Ok(HermeticSpec::from_parts(
        inputs,
        outputs,
        temps,
        env,
        network,
        resource_limits,
        timeout_ms,
    ))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u8(&mut self) -> CodecResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let end = self.pos + 4;
        let slice = self.bytes.get(self.pos..end).ok_or(CodecError::Truncated(self.pos))?;
        let arr: [u8; 4] = slice.try_into().map_err(|_| CodecError::Truncated(self.pos))?;
        self.pos = end;
        Ok(u32::from_le_bytes(arr))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        let end = self.pos + 8;
        let slice = self.bytes.get(self.pos..end).ok_or(CodecError::Truncated(self.pos))?;
        let arr: [u8; 8] = slice.try_into().map_err(|_| CodecError::Truncated(self.pos))?;
        self.pos = end;
        Ok(u64::from_le_bytes(arr))
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Overflow(self.pos))?;
        let slice = self.bytes.get(self.pos..end).ok_or(CodecError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_string(&mut self) -> CodecResult<String> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(start))
    }
}

fn encode_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> CodecResult<()> {
    let len_u32 = u32::try_from(len).map_err(|_| CodecError::TooLarge(what, len))?;
    out.extend_from_slice(&len_u32.to_le_bytes());
    Ok(())
}

fn encode_path_list(out: &mut Vec<u8>, paths: &[PathBuf]) -> CodecResult<()> {
    encode_len(out, "path list count", paths.len())?;
    for p in paths {
        let s = p.to_string_lossy();
        encode_len(out, "path entry", s.len())?;
        out.extend_from_slice(s.as_bytes());
    }
    Ok(())
}

fn decode_path_list(cursor: &mut Cursor<'_>) -> CodecResult<Vec<PathBuf>> {
    let count = cursor.read_u32()? as usize;
    let mut out = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        out.push(PathBuf::from(cursor.read_string()?));
    }
    Ok(out)
}

fn encode_env(out: &mut Vec<u8>, env: &BTreeMap<String, String>) -> CodecResult<()> {
    encode_len(out, "env count", env.len())?;
    for (k, v) in env {
        encode_len(out, "env key", k.len())?;
        out.extend_from_slice(k.as_bytes());
        encode_len(out, "env value", v.len())?;
        out.extend_from_slice(v.as_bytes());
    }
    Ok(())
}

fn decode_env(cursor: &mut Cursor<'_>) -> CodecResult<BTreeMap<String, String>> {
    let count = cursor.read_u32()? as usize;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        let key = cursor.read_string()?;
        let value = cursor.read_string()?;
        let _ = out.insert(key, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SandboxBuilder;

    #[test]
    fn round_trip_is_identity_for_minimal_spec() {
        let spec = SandboxBuilder::new().skip_fs_checks().build().unwrap();
        let bytes = encode(&spec).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(spec, decoded);
    }

    #[test]
    fn round_trip_is_identity_with_all_fields_populated() {
        let spec = SandboxBuilder::new()
            .input("src/a.c")
            .input("src/b.c")
            .output("out/a.o")
            .temp("scratch/tmp1")
            .env("CC", "clang")
            .env("CFLAGS", "-O2")
            .network(NetworkPolicy::AllowHosts(vec!["registry.example.com".into(), "cache.example.com".into()]))
            .resource_limits(ResourceLimits {
                max_memory_bytes: Some(512 * 1024 * 1024),
                max_cpu_time_ms: Some(30_000),
                max_processes: Some(64),
            })
            .timeout_ms(60_000)
            .skip_fs_checks()
            .build()
            .unwrap();

        let bytes = encode(&spec).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(spec, decoded);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let spec = SandboxBuilder::new().skip_fs_checks().build().unwrap();
        let bytes = encode(&spec).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(decode(truncated), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn decode_rejects_unknown_flag_bits() {
        let spec = SandboxBuilder::new().skip_fs_checks().build().unwrap();
        let mut bytes = encode(&spec).unwrap();
        // Locate the flags byte: after three empty path lists (u32 count=0 each).
        let flags_offset = 4 * 3;
        bytes[flags_offset] |= 0b1000_0000;
        assert!(matches!(decode(&bytes), Err(CodecError::UnknownFlags(_))));
    }

    #[test]
    fn cpu_time_and_timeout_are_independent_fields() {
        let spec = SandboxBuilder::new()
            .resource_limits(ResourceLimits {
                max_cpu_time_ms: Some(1_000),
                ..Default::default()
            })
            .timeout_ms(5_000)
            .skip_fs_checks()
            .build()
            .unwrap();
        let decoded = decode(&encode(&spec).unwrap()).unwrap();
        assert_eq!(decoded.resource_limits().max_cpu_time_ms, Some(1_000));
        assert_eq!(decoded.timeout_ms(), 5_000);
    }

    #[test]
    fn decoder_accepts_duplicated_cpu_and_timeout_values() {
        // A producer writing the same value twice into both fields must
        // still decode cleanly, per the source spec's open question.
        let spec = SandboxBuilder::new()
            .resource_limits(ResourceLimits {
                max_cpu_time_ms: Some(9_000),
                ..Default::default()
            })
            .timeout_ms(9_000)
            .skip_fs_checks()
            .build()
            .unwrap();
        let decoded = decode(&encode(&spec).unwrap()).unwrap();
        assert_eq!(decoded.resource_limits().max_cpu_time_ms, Some(9_000));
        assert_eq!(decoded.timeout_ms(), 9_000);
    }

    #[test]
    fn reserved_env_keys_never_leak_into_public_env() {
        let spec = SandboxBuilder::new()
            .network(NetworkPolicy::AllowHosts(vec!["h".into()]))
            .resource_limits(ResourceLimits {
                max_processes: Some(4),
                ..Default::default()
            })
            .skip_fs_checks()
            .build()
            .unwrap();
        let decoded = decode(&encode(&spec).unwrap()).unwrap();
        assert!(decoded.env().keys().all(|k| !k.starts_with('\u{0}')));
    }
}
