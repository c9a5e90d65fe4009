//! Shared scalar types used across the pipeline: element types, identifiers
//! and the process-wide modification timestamp counter.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Element type of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    Float,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::UInt8 | DataType::Int8 => 1,
            DataType::UInt16 | DataType::Int16 => 2,
            DataType::Float => 4,
        }
    }

    /// Read the element at `index` from a little-endian byte buffer as f64.
    pub fn read(&self, bytes: &[u8], index: usize) -> f64 {
        let offset = index * self.size_bytes();
        match self {
            DataType::UInt8 => bytes[offset] as f64,
            DataType::Int8 => bytes[offset] as i8 as f64,
            DataType::UInt16 => {
                u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f64
            }
            DataType::Int16 => {
                i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f64
            }
            DataType::Float => f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]) as f64,
        }
    }

    /// Write `value` as the element at `index` into a little-endian byte
    /// buffer, clamping to the representable range of the type.
    pub fn write(&self, bytes: &mut [u8], index: usize, value: f64) {
        let offset = index * self.size_bytes();
        match self {
            DataType::UInt8 => {
                bytes[offset] = value.clamp(0.0, u8::MAX as f64).round() as u8;
            }
            DataType::Int8 => {
                bytes[offset] =
                    value.clamp(i8::MIN as f64, i8::MAX as f64).round() as i8 as u8;
            }
            DataType::UInt16 => {
                let v = value.clamp(0.0, u16::MAX as f64).round() as u16;
                bytes[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
            }
            DataType::Int16 => {
                let v = value.clamp(i16::MIN as f64, i16::MAX as f64).round() as i16;
                bytes[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
            }
            DataType::Float => {
                bytes[offset..offset + 4].copy_from_slice(&(value as f32).to_le_bytes());
            }
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::UInt8 => "uint8",
            DataType::Int8 => "int8",
            DataType::UInt16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Float => "float",
        };
        write!(f, "{}", name)
    }
}

/// Identifier for an execution device registered with the device manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device{}", self.0)
    }
}

/// Identifier for a process node. Unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

static TIMESTAMP_COUNTER: AtomicU64 = AtomicU64::new(1);
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next value of the process-wide logical timestamp. Strictly increasing,
/// so two objects stamped in sequence always compare in creation order.
pub fn next_timestamp() -> u64 {
    TIMESTAMP_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Allocate a fresh node identifier.
pub fn next_node_id() -> NodeId {
    NodeId(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::UInt8.size_bytes(), 1);
        assert_eq!(DataType::Int16.size_bytes(), 2);
        assert_eq!(DataType::Float.size_bytes(), 4);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let mut buf = vec![0u8; 16];
        DataType::Float.write(&mut buf, 1, 3.5);
        assert_eq!(DataType::Float.read(&buf, 1), 3.5);

        DataType::UInt16.write(&mut buf, 0, 1234.0);
        assert_eq!(DataType::UInt16.read(&buf, 0), 1234.0);

        DataType::Int8.write(&mut buf, 2, -7.0);
        assert_eq!(DataType::Int8.read(&buf, 2), -7.0);
    }

    #[test]
    fn test_write_clamps_to_range() {
        let mut buf = vec![0u8; 4];
        DataType::UInt8.write(&mut buf, 0, 300.0);
        assert_eq!(DataType::UInt8.read(&buf, 0), 255.0);
        DataType::UInt8.write(&mut buf, 1, -5.0);
        assert_eq!(DataType::UInt8.read(&buf, 1), 0.0);
    }

    #[test]
    fn test_timestamps_are_strictly_increasing() {
        let a = next_timestamp();
        let b = next_timestamp();
        assert!(b > a);
    }
}
