//! GGUF model files.
//!
//! ```text
//! magic "GGUF" (u32) | version (u32) | tensor count (u64) | metadata count (u64)
//! metadata:    key (u64 len + utf8) | value type (u32) | value
//! tensor info: name | n_dims (u32) | dims (u64 each, ne0 first) | ggml type (u32) | offset (u64)
//! padding to `general.alignment` (default 32)
//! tensor data, each tensor at its offset from the data start
//! ```
//!
//! Only the tensor types llama-textgen can dequantize are decoded (F32, F16,
//! Q8_0, Q4_0); anything else is reported with its raw type code.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use half::f16;
use memmap2::Mmap;

use crate::{ModelError, ModelResult};

/// "GGUF" in little-endian ASCII.
pub const GGUF_MAGIC: u32 = 0x4655_4747;
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;
pub const GGUF_VERSION_V2: u32 = 2;
pub const GGUF_VERSION_V3: u32 = 3;

/// Elements per quantization block (Q8_0 and Q4_0).
pub const QK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum GgmlType {
    F32,
    F16,
    Q4_0,
    Q8_0,
}

impl GgmlType {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(GgmlType::F32),
            1 => Some(GgmlType::F16),
            2 => Some(GgmlType::Q4_0),
            8 => Some(GgmlType::Q8_0),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            GgmlType::F32 => 0,
            GgmlType::F16 => 1,
            GgmlType::Q4_0 => 2,
            GgmlType::Q8_0 => 8,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            GgmlType::F32 | GgmlType::F16 => 1,
            GgmlType::Q4_0 | GgmlType::Q8_0 => QK,
        }
    }

    pub fn bytes_per_block(self) -> usize {
        match self {
            GgmlType::F32 => 4,
            GgmlType::F16 => 2,
            // f16 scale + 32 nibbles
            GgmlType::Q4_0 => 2 + QK / 2,
            // f16 scale + 32 signed bytes
            GgmlType::Q8_0 => 2 + QK,
        }
    }

    /// Bytes for `numel` elements; `None` when not a whole number of blocks.
    pub fn tensor_bytes(self, numel: usize) -> Option<usize> {
        let bs = self.block_size();
        if numel % bs != 0 {
            return None;
        }
        (numel / bs).checked_mul(self.bytes_per_block())
    }
}

impl std::fmt::Display for GgmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GgmlType::F32 => "F32",
            GgmlType::F16 => "F16",
            GgmlType::Q4_0 => "Q4_0",
            GgmlType::Q8_0 => "Q8_0",
        };
        f.write_str(name)
    }
}

/// A metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl GgufValue {
    fn type_code(&self) -> u32 {
        match self {
            GgufValue::U8(_) => 0,
            GgufValue::I8(_) => 1,
            GgufValue::U16(_) => 2,
            GgufValue::I16(_) => 3,
            GgufValue::U32(_) => 4,
            GgufValue::I32(_) => 5,
            GgufValue::F32(_) => 6,
            GgufValue::Bool(_) => 7,
            GgufValue::String(_) => 8,
            GgufValue::Array(_) => 9,
            GgufValue::U64(_) => 10,
            GgufValue::I64(_) => 11,
            GgufValue::F64(_) => 12,
        }
    }

    /// Integer value, if this is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            GgufValue::U8(v) => Some(v as u64),
            GgufValue::U16(v) => Some(v as u64),
            GgufValue::U32(v) => Some(v as u64),
            GgufValue::U64(v) => Some(v),
            GgufValue::I8(v) => u64::try_from(v).ok(),
            GgufValue::I16(v) => u64::try_from(v).ok(),
            GgufValue::I32(v) => u64::try_from(v).ok(),
            GgufValue::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            GgufValue::I8(v) => Some(v as i64),
            GgufValue::I16(v) => Some(v as i64),
            GgufValue::I32(v) => Some(v as i64),
            GgufValue::I64(v) => Some(v),
            GgufValue::U8(v) => Some(v as i64),
            GgufValue::U16(v) => Some(v as i64),
            GgufValue::U32(v) => Some(v as i64),
            GgufValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            GgufValue::F32(v) => Some(v),
            GgufValue::F64(v) => Some(v as f32),
            _ => self.as_i64().map(|v| v as f32),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            GgufValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            GgufValue::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Location and layout of one tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    /// Dimensions, innermost (`ne0`) first.
    pub dims: Vec<usize>,
    /// Raw ggml type code.
    pub ggml_type: u32,
    /// Offset from the start of the data section.
    pub offset: u64,
}

impl TensorInfo {
    pub fn numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }
}

/// A parsed GGUF file: metadata and tensor directory over the raw bytes.
pub struct GgufFile {
    backing: Backing,
    version: u32,
    metadata: HashMap<String, GgufValue>,
    tensors: Vec<TensorInfo>,
    index: HashMap<String, usize>,
    data_offset: usize,
}

impl std::fmt::Debug for GgufFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GgufFile")
            .field("version", &self.version)
            .field("metadata_keys", &self.metadata.len())
            .field("tensors", &self.tensors.len())
            .field("data_offset", &self.data_offset)
            .finish()
    }
}

impl GgufFile {
    /// Memory-map and parse a file.
    pub fn open(path: impl AsRef<Path>) -> ModelResult<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is only read, and model files are not modified while loaded.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::parse(Backing::Mapped(mmap))
    }

    /// Parse an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> ModelResult<Self> {
        Self::parse(Backing::Owned(bytes))
    }

    fn parse(backing: Backing) -> ModelResult<Self> {
        let bytes = backing.bytes();
        let mut cursor = Cursor::new(bytes);

        let magic = read_u32(&mut cursor)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic {
                expected: GGUF_MAGIC,
                got: magic,
            });
        }
        let version = read_u32(&mut cursor)?;
        if !(GGUF_VERSION_V2..=GGUF_VERSION_V3).contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        let tensor_count = read_len(&mut cursor)?;
        let kv_count = read_len(&mut cursor)?;

        let mut metadata = HashMap::new();
        for _ in 0..kv_count {
            let key = read_string(&mut cursor)?;
            let value_type = read_u32(&mut cursor)?;
            let value = read_value(&mut cursor, value_type)?;
            metadata.insert(key, value);
        }

        let alignment = match metadata.get("general.alignment") {
            Some(v) => v
                .as_u64()
                .map(|a| a as usize)
                .filter(|a| a.is_power_of_two())
                .ok_or_else(|| ModelError::Malformed(format!("bad alignment {v:?}")))?,
            None => GGUF_DEFAULT_ALIGNMENT,
        };

        let mut tensors = Vec::new();
        let mut index = HashMap::new();
        for i in 0..tensor_count {
            let name = read_string(&mut cursor)?;
            let n_dims = read_u32(&mut cursor)? as usize;
            if n_dims == 0 || n_dims > 4 {
                return Err(ModelError::Malformed(format!(
                    "tensor {name} has {n_dims} dimensions"
                )));
            }
            let mut dims = Vec::with_capacity(n_dims);
            for _ in 0..n_dims {
                dims.push(read_len(&mut cursor)?);
            }
            let ggml_type = read_u32(&mut cursor)?;
            let offset = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
            if index.insert(name.clone(), i).is_some() {
                return Err(ModelError::Malformed(format!("duplicate tensor {name}")));
            }
            tensors.push(TensorInfo {
                name,
                dims,
                ggml_type,
                offset,
            });
        }

        let data_offset = (cursor.position() as usize).div_ceil(alignment) * alignment;

        tracing::debug!(
            version,
            n_tensors = tensors.len(),
            n_metadata = metadata.len(),
            alignment,
            "parsed GGUF header"
        );

        Ok(Self {
            backing,
            version,
            metadata,
            tensors,
            index,
            data_offset,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn metadata(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.index.get(name).map(|&i| &self.tensors[i])
    }

    /// Raw bytes of a tensor.
    pub fn tensor_bytes(&self, name: &str) -> ModelResult<(&TensorInfo, GgmlType, &[u8])> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| ModelError::MissingTensor(name.to_string()))?;
        let ty = GgmlType::from_u32(info.ggml_type).ok_or_else(|| {
            ModelError::UnsupportedTensorType {
                name: name.to_string(),
                ggml_type: info.ggml_type,
            }
        })?;
        let size = info
            .numel()
            .and_then(|n| ty.tensor_bytes(n))
            .ok_or_else(|| {
                ModelError::Malformed(format!(
                    "tensor {name} with dims {:?} is not a whole number of {ty} blocks",
                    info.dims
                ))
            })?;
        let bytes = self.backing.bytes();
        let start = usize::try_from(info.offset)
            .ok()
            .and_then(|o| o.checked_add(self.data_offset))
            .ok_or_else(|| ModelError::Malformed(format!("tensor {name} offset overflows")))?;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                ModelError::Malformed(format!(
                    "tensor {name} data exceeds file bounds ({} bytes)",
                    bytes.len()
                ))
            })?;
        Ok((info, ty, &bytes[start..end]))
    }

    /// A tensor dequantized to f32, with its dimensions.
    pub fn tensor_f32(&self, name: &str) -> ModelResult<(Vec<usize>, Vec<f32>)> {
        let (info, ty, bytes) = self.tensor_bytes(name)?;
        Ok((info.dims.clone(), dequantize(ty, bytes)))
    }
}

fn truncated(e: std::io::Error) -> ModelError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ModelError::Malformed("file is truncated".to_string())
    } else {
        ModelError::Io(e)
    }
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> ModelResult<u32> {
    cursor.read_u32::<LittleEndian>().map_err(truncated)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

/// A u64 count, rejected when it could not fit in the rest of the file.
fn read_len(cursor: &mut Cursor<&[u8]>) -> ModelResult<usize> {
    let n = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
    usize::try_from(n)
        .ok()
        .filter(|&n| n <= remaining(cursor).max(1 << 20))
        .ok_or_else(|| ModelError::Malformed(format!("implausible length {n}")))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> ModelResult<String> {
    let len = read_len(cursor)?;
    if len > remaining(cursor) {
        return Err(ModelError::Malformed("file is truncated".to_string()));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(truncated)?;
    String::from_utf8(bytes).map_err(|_| ModelError::Malformed("invalid UTF-8 string".to_string()))
}

fn read_value(cursor: &mut Cursor<&[u8]>, value_type: u32) -> ModelResult<GgufValue> {
    let v = match value_type {
        0 => GgufValue::U8(cursor.read_u8().map_err(truncated)?),
        1 => GgufValue::I8(cursor.read_i8().map_err(truncated)?),
        2 => GgufValue::U16(cursor.read_u16::<LittleEndian>().map_err(truncated)?),
        3 => GgufValue::I16(cursor.read_i16::<LittleEndian>().map_err(truncated)?),
        4 => GgufValue::U32(cursor.read_u32::<LittleEndian>().map_err(truncated)?),
        5 => GgufValue::I32(cursor.read_i32::<LittleEndian>().map_err(truncated)?),
        6 => GgufValue::F32(cursor.read_f32::<LittleEndian>().map_err(truncated)?),
        7 => GgufValue::Bool(cursor.read_u8().map_err(truncated)? != 0),
        8 => GgufValue::String(read_string(cursor)?),
        9 => {
            let element_type = read_u32(cursor)?;
            if element_type == 9 {
                return Err(ModelError::Malformed("nested arrays".to_string()));
            }
            let len = read_len(cursor)?;
            let mut values = Vec::with_capacity(len.min(remaining(cursor)));
            for _ in 0..len {
                values.push(read_value(cursor, element_type)?);
            }
            GgufValue::Array(values)
        }
        10 => GgufValue::U64(cursor.read_u64::<LittleEndian>().map_err(truncated)?),
        11 => GgufValue::I64(cursor.read_i64::<LittleEndian>().map_err(truncated)?),
        12 => GgufValue::F64(cursor.read_f64::<LittleEndian>().map_err(truncated)?),
        other => {
            return Err(ModelError::Malformed(format!(
                "unknown metadata value type {other}"
            )))
        }
    };
    Ok(v)
}

/// Dequantize a whole-block byte slice to f32.
pub fn dequantize(ty: GgmlType, bytes: &[u8]) -> Vec<f32> {
    match ty {
        GgmlType::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        GgmlType::F16 => bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        GgmlType::Q8_0 => {
            let mut out = Vec::with_capacity(bytes.len() / ty.bytes_per_block() * QK);
            for block in bytes.chunks_exact(ty.bytes_per_block()) {
                let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
                out.extend(block[2..].iter().map(|&q| (q as i8) as f32 * d));
            }
            out
        }
        GgmlType::Q4_0 => {
            let mut out = Vec::with_capacity(bytes.len() / ty.bytes_per_block() * QK);
            for block in bytes.chunks_exact(ty.bytes_per_block()) {
                let d = f16::from_le_bytes([block[0], block[1]]).to_f32();
                let qs = &block[2..];
                let mut vals = [0.0f32; QK];
                // Low nibbles hold the first half of the block, high nibbles the second.
                for (j, &q) in qs.iter().enumerate() {
                    vals[j] = ((q & 0x0F) as i32 - 8) as f32 * d;
                    vals[j + QK / 2] = ((q >> 4) as i32 - 8) as f32 * d;
                }
                out.extend_from_slice(&vals);
            }
            out
        }
    }
}

/// Quantize f32 values (a whole number of blocks for Q types).
pub fn quantize(ty: GgmlType, values: &[f32]) -> Vec<u8> {
    match ty {
        GgmlType::F32 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        GgmlType::F16 => values
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect(),
        GgmlType::Q8_0 => {
            let mut out = Vec::with_capacity(values.len() / QK * ty.bytes_per_block());
            for block in values.chunks(QK) {
                let amax = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                let d = amax / 127.0;
                let id = if d != 0.0 { 1.0 / d } else { 0.0 };
                out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
                for i in 0..QK {
                    let x = block.get(i).copied().unwrap_or(0.0);
                    out.push((x * id).round() as i8 as u8);
                }
            }
            out
        }
        GgmlType::Q4_0 => {
            let mut out = Vec::with_capacity(values.len() / QK * ty.bytes_per_block());
            for block in values.chunks(QK) {
                let mut padded = [0.0f32; QK];
                padded[..block.len()].copy_from_slice(block);
                // Signed value with the largest magnitude maps to -8.
                let max = padded
                    .iter()
                    .copied()
                    .fold(0.0f32, |m, v| if v.abs() > m.abs() { v } else { m });
                let d = max / -8.0;
                let id = if d != 0.0 { 1.0 / d } else { 0.0 };
                out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
                for j in 0..QK / 2 {
                    let x0 = padded[j] * id;
                    let x1 = padded[j + QK / 2] * id;
                    let q0 = ((x0 + 8.5) as i8).clamp(0, 15) as u8;
                    let q1 = ((x1 + 8.5) as i8).clamp(0, 15) as u8;
                    out.push(q0 | (q1 << 4));
                }
            }
            out
        }
    }
}

struct PendingTensor {
    name: String,
    dims: Vec<usize>,
    ggml_type: u32,
    data: Vec<u8>,
}

/// Builds a GGUF v3 image.
#[derive(Default)]
pub struct GgufWriter {
    metadata: Vec<(String, GgufValue)>,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: GgufValue) -> &mut Self {
        self.metadata.push((key.into(), value));
        self
    }

    /// Add a tensor from f32 values, stored as `ty`. `dims` lists `ne0` first.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        dims: &[usize],
        ty: GgmlType,
        values: &[f32],
    ) -> ModelResult<&mut Self> {
        let name = name.into();
        let numel: usize = dims.iter().product();
        if numel != values.len() {
            return Err(ModelError::ShapeMismatch {
                name,
                expected: dims.to_vec(),
                got: vec![values.len()],
            });
        }
        if ty.tensor_bytes(numel).is_none() {
            return Err(ModelError::Malformed(format!(
                "{name}: {numel} elements is not a whole number of {ty} blocks"
            )));
        }
        let data = quantize(ty, values);
        self.tensors.push(PendingTensor {
            name,
            dims: dims.to_vec(),
            ggml_type: ty.as_u32(),
            data,
        });
        Ok(self)
    }

    /// Add a tensor with an arbitrary type code and pre-encoded bytes.
    pub fn add_raw_tensor(
        &mut self,
        name: impl Into<String>,
        dims: &[usize],
        ggml_type: u32,
        data: Vec<u8>,
    ) -> &mut Self {
        self.tensors.push(PendingTensor {
            name: name.into(),
            dims: dims.to_vec(),
            ggml_type,
            data,
        });
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = self.write_into(&mut out);
        out
    }

    pub fn write_to_path(&self, path: impl AsRef<Path>) -> ModelResult<()> {
        let mut file = std::io::BufWriter::new(File::create(path)?);
        self.write_into(&mut file)?;
        file.flush()?;
        Ok(())
    }

    fn write_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let align = GGUF_DEFAULT_ALIGNMENT;
        let mut header = Vec::new();
        header.write_u32::<LittleEndian>(GGUF_MAGIC)?;
        header.write_u32::<LittleEndian>(GGUF_VERSION_V3)?;
        header.write_u64::<LittleEndian>(self.tensors.len() as u64)?;
        header.write_u64::<LittleEndian>(self.metadata.len() as u64)?;
        for (key, value) in &self.metadata {
            write_string(&mut header, key)?;
            header.write_u32::<LittleEndian>(value.type_code())?;
            write_value(&mut header, value)?;
        }

        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for t in &self.tensors {
            offsets.push(offset);
            offset = (offset + t.data.len()).div_ceil(align) * align;
        }
        for (t, &off) in self.tensors.iter().zip(&offsets) {
            write_string(&mut header, &t.name)?;
            header.write_u32::<LittleEndian>(t.dims.len() as u32)?;
            for &d in &t.dims {
                header.write_u64::<LittleEndian>(d as u64)?;
            }
            header.write_u32::<LittleEndian>(t.ggml_type)?;
            header.write_u64::<LittleEndian>(off as u64)?;
        }
        header.resize(header.len().div_ceil(align) * align, 0);
        w.write_all(&header)?;

        let mut written = 0usize;
        for (t, &off) in self.tensors.iter().zip(&offsets) {
            w.write_all(&vec![0u8; off - written])?;
            w.write_all(&t.data)?;
            written = off + t.data.len();
        }
        Ok(())
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    w.write_u64::<LittleEndian>(s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn write_value<W: Write>(w: &mut W, value: &GgufValue) -> std::io::Result<()> {
    match value {
        GgufValue::U8(v) => w.write_u8(*v),
        GgufValue::I8(v) => w.write_i8(*v),
        GgufValue::U16(v) => w.write_u16::<LittleEndian>(*v),
        GgufValue::I16(v) => w.write_i16::<LittleEndian>(*v),
        GgufValue::U32(v) => w.write_u32::<LittleEndian>(*v),
        GgufValue::I32(v) => w.write_i32::<LittleEndian>(*v),
        GgufValue::F32(v) => w.write_f32::<LittleEndian>(*v),
        GgufValue::Bool(v) => w.write_u8(u8::from(*v)),
        GgufValue::String(s) => write_string(w, s),
        GgufValue::Array(items) => {
            let element_type = items.first().map(|v| v.type_code()).unwrap_or(4);
            w.write_u32::<LittleEndian>(element_type)?;
            w.write_u64::<LittleEndian>(items.len() as u64)?;
            for item in items {
                write_value(w, item)?;
            }
            Ok(())
        }
        GgufValue::U64(v) => w.write_u64::<LittleEndian>(*v),
        GgufValue::I64(v) => w.write_i64::<LittleEndian>(*v),
        GgufValue::F64(v) => w.write_f64::<LittleEndian>(*v),
    }
}
