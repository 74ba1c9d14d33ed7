use std::io::Read;

use crate::charset::CharsetConverter;
use crate::context::LoadContext;
use crate::error::{format_error, PersistError, PersistResult};
use crate::float48;
use crate::resource::LoadLimits;
use crate::value::Value;
use crate::wire::{read_array, read_bounded, tag, TagNode};

/// Decodes tag nodes and their auxiliary bytes into runtime values.
pub struct ValueLoader<'a> {
    charset: &'a dyn CharsetConverter,
    limits: LoadLimits,
}

impl<'a> ValueLoader<'a> {
    pub fn new(charset: &'a dyn CharsetConverter, limits: LoadLimits) -> Self {
        Self { charset, limits }
    }

    /// Decodes one value. `aux` must be positioned at the value's auxiliary
    /// bytes; only string and blob tags (and host kinds) consume any.
    pub fn decode_value<R: Read>(
        &self,
        node: TagNode,
        aux: &mut R,
        ctx: &mut dyn LoadContext,
    ) -> PersistResult<Value> {
        let payload = node.payload;
        let value = match node.code {
            tag::EMPTY => Value::Empty,
            tag::INTEGER => Value::Int(payload as i32),
            tag::BOOLEAN => Value::Bool(payload != 0),
            tag::SHORT_STRING => {
                if payload != 0 {
                    Value::Str(self.read_pascal_string(aux)?)
                } else {
                    Value::Str(String::new())
                }
            }
            tag::LONG_STRING => {
                self.limits.check_string(payload)?;
                let bytes = read_bounded(aux, payload as usize, "long string")?;
                Value::Str(self.charset.decode(&bytes))
            }
            tag::FLOAT32 => Value::Float(f64::from(f32::from_bits(payload))),
            tag::ZERO_FLOAT => Value::Float(0.0),
            tag::BLOB => {
                self.limits.check_blob(payload)?;
                Value::Blob(read_bounded(aux, payload as usize, "blob")?)
            }
            tag::FILE_HANDLE => Value::FileHandle(payload),
            tag::PROCEDURE => Value::Procedure(
                ctx.load_procedure(payload)
                    .ok_or_else(|| unresolved("procedure", payload))?,
            ),
            tag::ARRAY => Value::Array(
                ctx.load_array(payload)
                    .ok_or_else(|| unresolved("array", payload))?,
            ),
            tag::HASH => Value::Hash(
                ctx.load_hash(payload)
                    .ok_or_else(|| unresolved("hash", payload))?,
            ),
            tag::RECORD => Value::Record(
                ctx.load_record(payload)
                    .ok_or_else(|| unresolved("record", payload))?,
            ),
            tag::RECORD_TYPE => Value::RecordType(
                ctx.load_record_type(payload)
                    .ok_or_else(|| unresolved("record-type", payload))?,
            ),
            code if !node.is_float48() => ctx.load_context(node, aux)?.ok_or_else(|| {
                format_error(format!("unsupported tag {code:#06x} (payload {payload})"))
            })?,
            code => Value::Float(float48::decode(code, payload)),
        };
        Ok(value)
    }

    /// Reads a one-byte length followed by that many bytes.
    pub fn read_pascal_string<R: Read>(&self, input: &mut R) -> PersistResult<String> {
        let [len] = read_array::<1, _>(input, "string length")?;
        let bytes = read_bounded(input, usize::from(len), "string")?;
        Ok(self.charset.decode(&bytes))
    }

    /// Appends `count` length-prefixed names to `out`.
    pub fn load_names<R: Read>(
        &self,
        input: &mut R,
        count: u32,
        out: &mut Vec<String>,
    ) -> PersistResult<()> {
        self.limits.check_segment(count)?;
        for _ in 0..count {
            out.push(self.read_pascal_string(input)?);
        }
        Ok(())
    }

    /// Reads `count` densely packed tag nodes, then each node's auxiliary
    /// bytes in table order, storing value `i` at `target[first + i]`.
    pub fn load<R: Read>(
        &self,
        input: &mut R,
        target: &mut [Value],
        first: usize,
        count: u32,
        ctx: &mut dyn LoadContext,
    ) -> PersistResult<()> {
        self.limits.check_segment(count)?;
        let count = count as usize;
        let end = first
            .checked_add(count)
            .filter(|end| *end <= target.len())
            .ok_or_else(|| {
                format_error(format!(
                    "segment of {count} values at {first} overruns {} slots",
                    target.len()
                ))
            })?;
        let nodes = self.load_tags(input, count)?;
        for (slot, node) in target[first..end].iter_mut().zip(nodes) {
            *slot = self.decode_value(node, input, ctx)?;
        }
        Ok(())
    }

    /// Reads a segment into a fresh vector of exactly `count` values.
    pub fn load_vec<R: Read>(
        &self,
        input: &mut R,
        count: u32,
        ctx: &mut dyn LoadContext,
    ) -> PersistResult<Vec<Value>> {
        self.limits.check_segment(count)?;
        let nodes = self.load_tags(input, count as usize)?;
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            values.push(self.decode_value(node, input, ctx)?);
        }
        Ok(values)
    }

    fn load_tags<R: Read>(&self, input: &mut R, count: usize) -> PersistResult<Vec<TagNode>> {
        let table = read_bounded(input, count * TagNode::SIZE, "tag table")?;
        Ok(table
            .chunks_exact(TagNode::SIZE)
            .map(|chunk| {
                let mut raw = [0u8; TagNode::SIZE];
                raw.copy_from_slice(chunk);
                TagNode::from_bytes(raw)
            })
            .collect())
    }
}

#[cold]
#[inline(never)]
fn unresolved(kind: &'static str, id: u32) -> PersistError {
    PersistError::Unresolved { kind, id }
}
