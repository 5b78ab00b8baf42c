use cfg_if::cfg_if;
use thiserror::Error;

/// Errors that can occur while compressing or decompressing a payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressError {
    #[error("failed to create compressor at level {level}")]
    CompressorCreationFailed { level: i32 },

    #[error("failed to compress payload of {payload_size} bytes")]
    CompressionFailed { payload_size: usize },

    #[error("failed to create decompressor")]
    DecompressorCreationFailed,

    #[error("failed to decompress payload of {payload_size} bytes (possible malformed or malicious data)")]
    DecompressionFailed { payload_size: usize },
}

cfg_if! {
    if #[cfg(feature = "zstd_support")]
    {
        use zstd::bulk::{Compressor, Decompressor};

        /// Compresses outbound payloads. Only payloads that actually shrink
        /// are sent with the COMPRESSED flag; the caller compares lengths.
        pub struct Encoder {
            result: Vec<u8>,
            encoder: Compressor<'static>,
        }

        impl Encoder {
            pub fn new(level: i32) -> Result<Self, CompressError> {
                let encoder = Compressor::new(level)
                    .map_err(|_| CompressError::CompressorCreationFailed { level })?;
                Ok(Self {
                    encoder,
                    result: Vec::new(),
                })
            }

            pub fn encode(&mut self, payload: &[u8]) -> Result<&[u8], CompressError> {
                self.result = self
                    .encoder
                    .compress(payload)
                    .map_err(|_| CompressError::CompressionFailed {
                        payload_size: payload.len(),
                    })?;
                Ok(&self.result)
            }
        }

        /// Decompresses inbound payloads carrying the COMPRESSED flag.
        pub struct Decoder {
            result: Vec<u8>,
            decoder: Decompressor<'static>,
        }

        impl Decoder {
            pub fn new() -> Result<Self, CompressError> {
                let decoder = Decompressor::new()
                    .map_err(|_| CompressError::DecompressorCreationFailed)?;
                Ok(Self {
                    decoder,
                    result: Vec::new(),
                })
            }

            pub fn decode(&mut self, payload: &[u8]) -> Result<&[u8], CompressError> {
                let upper_bound = Decompressor::<'static>::upper_bound(payload)
                    .map_err(|_| CompressError::DecompressionFailed {
                        payload_size: payload.len(),
                    })?;
                self.result = self
                    .decoder
                    .decompress(payload, upper_bound)
                    .map_err(|_| CompressError::DecompressionFailed {
                        payload_size: payload.len(),
                    })?;
                Ok(&self.result)
            }
        }
    }
    else
    {
        /// Passthrough encoder; without zstd support the COMPRESSED flag is
        /// never set on outbound datagrams.
        pub struct Encoder {
            result: Vec<u8>,
        }

        impl Encoder {
            pub fn new(_level: i32) -> Result<Self, CompressError> {
                Ok(Self { result: Vec::new() })
            }

            pub fn encode(&mut self, payload: &[u8]) -> Result<&[u8], CompressError> {
                self.result = payload.to_vec();
                Ok(&self.result)
            }
        }

        pub struct Decoder {
            result: Vec<u8>,
        }

        impl Decoder {
            pub fn new() -> Result<Self, CompressError> {
                Ok(Self { result: Vec::new() })
            }

            pub fn decode(&mut self, payload: &[u8]) -> Result<&[u8], CompressError> {
                self.result = payload.to_vec();
                Ok(&self.result)
            }
        }
    }
}
