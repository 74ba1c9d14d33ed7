use std::io::Write;

use crate::charset::CharsetConverter;
use crate::context::SaveContext;
use crate::error::{format_error, PersistResult};
use crate::float48;
use crate::value::Value;
use crate::wire::{tag, TagNode};

/// Encodes runtime values as tag nodes plus auxiliary bytes.
pub struct ValueSaver<'a> {
    charset: &'a dyn CharsetConverter,
}

impl<'a> ValueSaver<'a> {
    pub fn new(charset: &'a dyn CharsetConverter) -> Self {
        Self { charset }
    }

    /// Encodes one value, appending any auxiliary bytes to `aux`.
    pub fn encode_value(
        &self,
        value: &Value,
        aux: &mut Vec<u8>,
        ctx: &mut dyn SaveContext,
    ) -> PersistResult<TagNode> {
        let node = match value {
            Value::Empty => TagNode::new(tag::EMPTY, 0),
            Value::Int(value) => TagNode::new(tag::INTEGER, *value as u32),
            Value::Bool(value) => TagNode::new(tag::BOOLEAN, u32::from(*value)),
            Value::Str(text) => {
                let bytes = self.charset.encode(text);
                match bytes.len() {
                    0 => TagNode::new(tag::SHORT_STRING, 0),
                    len @ 1..=255 => {
                        aux.push(len as u8);
                        aux.extend_from_slice(&bytes);
                        TagNode::new(tag::SHORT_STRING, 1)
                    }
                    len => {
                        let len = u32::try_from(len)
                            .map_err(|_| format_error("string longer than 4 GiB"))?;
                        aux.extend_from_slice(&bytes);
                        TagNode::new(tag::LONG_STRING, len)
                    }
                }
            }
            Value::Float(value) => encode_float(*value),
            Value::Blob(bytes) => {
                let len = u32::try_from(bytes.len())
                    .map_err(|_| format_error("blob longer than 4 GiB"))?;
                aux.extend_from_slice(bytes);
                TagNode::new(tag::BLOB, len)
            }
            Value::FileHandle(handle) => TagNode::new(tag::FILE_HANDLE, *handle),
            Value::Procedure(procedure) => TagNode::new(tag::PROCEDURE, ctx.procedure_id(procedure)),
            Value::Array(array) => TagNode::new(tag::ARRAY, ctx.array_id(array)),
            Value::Hash(hash) => TagNode::new(tag::HASH, ctx.hash_id(hash)),
            Value::Record(record) => TagNode::new(tag::RECORD, ctx.record_id(record)),
            Value::RecordType(ty) => TagNode::new(tag::RECORD_TYPE, ctx.record_type_id(ty)),
            Value::Context(id) => TagNode::new(tag::CONTEXT, *id),
            Value::Mutex(id) => TagNode::new(tag::MUTEX, *id),
            Value::HostContext(host) => {
                let node = TagNode::new(host.code, host.payload);
                if node.is_float48() || node.code <= tag::MUTEX {
                    return Err(format_error(format!(
                        "host context uses reserved tag {:#06x}",
                        host.code
                    )));
                }
                aux.extend_from_slice(&host.data);
                node
            }
        };
        Ok(node)
    }

    /// Writes all tag nodes first, then every auxiliary payload in tag order.
    pub fn save_segment<W: Write>(
        &self,
        out: &mut W,
        values: &[Value],
        ctx: &mut dyn SaveContext,
    ) -> PersistResult<()> {
        let mut aux = Vec::new();
        let mut table = Vec::with_capacity(values.len() * TagNode::SIZE);
        for value in values {
            let node = self.encode_value(value, &mut aux, ctx)?;
            table.extend_from_slice(&node.to_bytes());
        }
        out.write_all(&table)?;
        out.write_all(&aux)?;
        Ok(())
    }

    pub fn write_pascal_string<W: Write>(&self, out: &mut W, text: &str) -> PersistResult<()> {
        let bytes = self.charset.encode(text);
        let len = u8::try_from(bytes.len())
            .map_err(|_| format_error(format!("name of {} bytes exceeds 255", bytes.len())))?;
        out.write_all(&[len])?;
        out.write_all(&bytes)?;
        Ok(())
    }

    pub fn save_names<W: Write>(&self, out: &mut W, names: &[String]) -> PersistResult<()> {
        for name in names {
            self.write_pascal_string(out, name)?;
        }
        Ok(())
    }

    pub fn encode_text(&self, text: &str) -> Vec<u8> {
        self.charset.encode(text)
    }
}

/// Zero goes out as the zero-float tag, values the 48-bit format cannot
/// hold as a 32-bit float, everything else as a 48-bit float.
pub fn encode_float(value: f64) -> TagNode {
    if value == 0.0 {
        return TagNode::new(tag::ZERO_FLOAT, 0);
    }
    match float48::encode(value) {
        Some((code, payload)) => TagNode::new(code, payload),
        None => TagNode::new(tag::FLOAT32, (value as f32).to_bits()),
    }
}
