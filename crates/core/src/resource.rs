use serde::{Deserialize, Serialize};

use crate::error::{limit_error, PersistResult};

/// Upper bounds applied to every length field read from a stream.
///
/// A corrupt or hostile file can declare any size it likes; these limits keep
/// the loader from allocating or looping on the strength of such a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadLimits {
    pub max_object_bytes: u32,
    pub max_properties: u32,
    pub max_segment_values: u32,
    pub max_string_bytes: u32,
    pub max_blob_bytes: u32,
    pub max_array_elements: u64,
    pub max_frames: u32,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_object_bytes: 64 * 1024 * 1024,
            max_properties: 1_024,
            max_segment_values: 1 << 20,
            max_string_bytes: 16 * 1024 * 1024,
            max_blob_bytes: 64 * 1024 * 1024,
            max_array_elements: 1 << 24,
            max_frames: 65_536,
        }
    }
}

impl LoadLimits {
    pub(crate) fn check_segment(&self, count: u32) -> PersistResult<()> {
        if count > self.max_segment_values {
            return Err(limit_error(format!(
                "segment of {count} values exceeds {}",
                self.max_segment_values
            )));
        }
        Ok(())
    }

    pub(crate) fn check_string(&self, len: u32) -> PersistResult<()> {
        if len > self.max_string_bytes {
            return Err(limit_error(format!(
                "string of {len} bytes exceeds {}",
                self.max_string_bytes
            )));
        }
        Ok(())
    }

    pub(crate) fn check_blob(&self, len: u32) -> PersistResult<()> {
        if len > self.max_blob_bytes {
            return Err(limit_error(format!(
                "blob of {len} bytes exceeds {}",
                self.max_blob_bytes
            )));
        }
        Ok(())
    }
}
