use derive_more::Display;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// Level used when the configured one is missing or out of range
pub static DEFAULT_COMPRESSION_LEVEL: u8 = 1;
pub static MAX_COMPRESSION_LEVEL: u8 = 9;

/// Zip compression level (0-9)
///
/// - 0: entries are stored without compression
/// - 1: fastest deflate (default, save games are usually small)
/// - 9: slowest, smallest archives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub struct CompressionLevel(u8);

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl TryFrom<i64> for CompressionLevel {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|level| *level <= MAX_COMPRESSION_LEVEL)
            .map(Self)
            .ok_or(value)
    }
}

impl From<CompressionLevel> for i64 {
    fn from(value: CompressionLevel) -> Self {
        i64::from(value.0)
    }
}

impl CompressionLevel {
    /// Options for a zip entry of `len` bytes
    pub fn file_options(self, len: u64) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().large_file(len >= u64::from(u32::MAX));
        if self.0 == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_level_range() {
        for level in 0..=9 {
            assert!(CompressionLevel::try_from(level).is_ok());
        }
        assert_eq!(CompressionLevel::try_from(10), Err(10));
        assert_eq!(CompressionLevel::try_from(-1), Err(-1));
    }

    #[test]
    fn test_compression_level_default() {
        assert_eq!(i64::from(CompressionLevel::default()), 1);
    }

    #[test]
    fn test_stored_and_deflated_options_build() {
        let _stored = CompressionLevel::try_from(0).unwrap().file_options(10);
        let _deflated = CompressionLevel::try_from(9).unwrap().file_options(10);
        let _large = CompressionLevel::default().file_options(u64::MAX);
    }
}
