use bytes::Bytes;
use prost::Message as _;
use tendermint::abci::types::ExtendedCommitInfo;

use crate::{
    generated::argus::abci::v1 as raw,
    vote_extension::OracleVoteExtension,
    zlib,
};

/// The default cap on any codec-framed payload, applied post-compression.
pub const DEFAULT_MAX_WIRE_BYTES: usize = 1024 * 1024;

/// Frame tag of an extended commit injected into a block as `tx[0]`.
pub const EXTENDED_COMMIT_FRAME_TAG: u8 = 0xEC;

/// Frame tag of an identity-compressed vote extension.
pub const NOOP_COMPRESSOR_TAG: u8 = 0x00;

/// Frame tag of a zlib-compressed vote extension.
pub const ZLIB_COMPRESSOR_TAG: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct CodecError(CodecErrorKind);

impl CodecError {
    fn malformed_frame(source: prost::DecodeError) -> Self {
        Self(CodecErrorKind::MalformedFrame(source))
    }

    fn compression(source: std::io::Error) -> Self {
        Self(CodecErrorKind::Compression(source))
    }

    fn extended_commit_info(source: tendermint::Error) -> Self {
        Self(CodecErrorKind::ExtendedCommitInfo(source))
    }

    fn overlong(len: usize, max: usize) -> Self {
        Self(CodecErrorKind::Overlong {
            len,
            max,
        })
    }

    fn unknown_compressor_tag(tag: u8) -> Self {
        Self(CodecErrorKind::UnknownCompressorTag {
            tag,
        })
    }

    fn wrong_frame_tag(tag: u8) -> Self {
        Self(CodecErrorKind::WrongFrameTag {
            tag,
        })
    }

    fn empty_frame() -> Self {
        Self(CodecErrorKind::EmptyFrame)
    }

    /// Returns true if this error reports a payload beyond the wire cap.
    #[must_use]
    pub fn is_overlong(&self) -> bool {
        matches!(self.0, CodecErrorKind::Overlong { .. })
    }
}

#[derive(Debug, thiserror::Error)]
enum CodecErrorKind {
    #[error("failed to decode wire bytes")]
    MalformedFrame(#[source] prost::DecodeError),
    #[error("failed to process compression stream")]
    Compression(#[source] std::io::Error),
    #[error("invalid extended commit info")]
    ExtendedCommitInfo(#[source] tendermint::Error),
    #[error("payload is {len} bytes, exceeding the {max} byte wire cap")]
    Overlong { len: usize, max: usize },
    #[error("unknown compressor tag: {tag:#04x}")]
    UnknownCompressorTag { tag: u8 },
    #[error("unexpected frame tag: {tag:#04x}")]
    WrongFrameTag { tag: u8 },
    #[error("frame is empty")]
    EmptyFrame,
}

/// Serializes vote extensions to and from their wire form.
///
/// Encoding must be deterministic: structurally equal vote extensions
/// produce byte-equal output on every replica.
pub trait VoteExtensionCodec: Send + Sync {
    /// Encodes the vote extension to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be framed or exceeds the wire
    /// cap.
    fn encode(&self, vote_extension: &OracleVoteExtension) -> Result<Bytes, CodecError>;

    /// Decodes wire bytes into a vote extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid frame.
    fn decode(&self, bytes: &[u8]) -> Result<OracleVoteExtension, CodecError>;
}

/// The plain protobuf wire form of a vote extension. Map entries are
/// serialized in ascending ID order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVoteExtensionCodec;

impl VoteExtensionCodec for DefaultVoteExtensionCodec {
    fn encode(&self, vote_extension: &OracleVoteExtension) -> Result<Bytes, CodecError> {
        Ok(vote_extension.clone().into_raw().encode_to_vec().into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<OracleVoteExtension, CodecError> {
        raw::OracleVoteExtension::decode(bytes)
            .map(OracleVoteExtension::from_raw)
            .map_err(CodecError::malformed_frame)
    }
}

/// A byte-stream compressor used to wrap an inner codec.
pub trait Compressor: Send + Sync {
    /// The 1-byte tag identifying this compressor on the wire.
    fn tag(&self) -> u8;

    /// Compresses `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the compression stream fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompresses `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or the decompressed
    /// output exceeds the configured cap.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// The identity compressor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn tag(&self) -> u8 {
        NOOP_COMPRESSOR_TAG
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

/// A zlib (deflate) compressor with a decompression-bomb guard.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    max_decompressed_bytes: usize,
}

impl ZlibCompressor {
    #[must_use]
    pub fn new(max_decompressed_bytes: usize) -> Self {
        Self {
            max_decompressed_bytes,
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIRE_BYTES)
    }
}

impl Compressor for ZlibCompressor {
    fn tag(&self) -> u8 {
        ZLIB_COMPRESSOR_TAG
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zlib::compress_bytes(data).map_err(CodecError::compression)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let decompressed = zlib::decompress_bytes(data, self.max_decompressed_bytes)
            .map_err(CodecError::compression)?;
        if decompressed.len() > self.max_decompressed_bytes {
            return Err(CodecError::overlong(
                decompressed.len(),
                self.max_decompressed_bytes,
            ));
        }
        Ok(decompressed)
    }
}

/// Wraps an inner vote-extension codec with a compressor.
///
/// The frame is `[1-byte compressor tag][compressed inner encoding]` and is
/// capped at `max_encoded_bytes` in both directions.
#[derive(Debug, Clone, Copy)]
pub struct CompressionVoteExtensionCodec<C, Z> {
    inner: C,
    compressor: Z,
    max_encoded_bytes: usize,
}

impl<C, Z> CompressionVoteExtensionCodec<C, Z> {
    #[must_use]
    pub fn new(inner: C, compressor: Z) -> Self {
        Self {
            inner,
            compressor,
            max_encoded_bytes: DEFAULT_MAX_WIRE_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_encoded_bytes(mut self, max_encoded_bytes: usize) -> Self {
        self.max_encoded_bytes = max_encoded_bytes;
        self
    }
}

impl<C, Z> VoteExtensionCodec for CompressionVoteExtensionCodec<C, Z>
where
    C: VoteExtensionCodec,
    Z: Compressor,
{
    fn encode(&self, vote_extension: &OracleVoteExtension) -> Result<Bytes, CodecError> {
        let inner = self.inner.encode(vote_extension)?;
        let compressed = self.compressor.compress(&inner)?;
        let mut framed = Vec::with_capacity(compressed.len().saturating_add(1));
        framed.push(self.compressor.tag());
        framed.extend_from_slice(&compressed);
        if framed.len() > self.max_encoded_bytes {
            return Err(CodecError::overlong(framed.len(), self.max_encoded_bytes));
        }
        Ok(framed.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<OracleVoteExtension, CodecError> {
        if bytes.len() > self.max_encoded_bytes {
            return Err(CodecError::overlong(bytes.len(), self.max_encoded_bytes));
        }
        let Some((tag, compressed)) = bytes.split_first() else {
            return Err(CodecError::empty_frame());
        };
        if *tag != self.compressor.tag() {
            return Err(CodecError::unknown_compressor_tag(*tag));
        }
        let inner = self.compressor.decompress(compressed)?;
        self.inner.decode(&inner)
    }
}

/// Serializes an aggregated extended commit for injection as `tx[0]`.
///
/// The frame is `[0xEC][length-delimited canonical ExtendedCommitInfo]`.
/// Zero-length per-validator vote extensions are legal.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedCommitCodec {
    max_encoded_bytes: usize,
}

impl ExtendedCommitCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_encoded_bytes: DEFAULT_MAX_WIRE_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_encoded_bytes(mut self, max_encoded_bytes: usize) -> Self {
        self.max_encoded_bytes = max_encoded_bytes;
        self
    }

    /// Encodes the commit into its framed wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the framed bytes exceed the wire cap.
    pub fn encode(&self, commit: &ExtendedCommitInfo) -> Result<Bytes, CodecError> {
        let raw = tendermint_proto::abci::ExtendedCommitInfo::from(commit.clone());
        let mut framed = Vec::with_capacity(raw.encoded_len().saturating_add(6));
        framed.push(EXTENDED_COMMIT_FRAME_TAG);
        framed.extend_from_slice(&raw.encode_length_delimited_to_vec());
        if framed.len() > self.max_encoded_bytes {
            return Err(CodecError::overlong(framed.len(), self.max_encoded_bytes));
        }
        Ok(framed.into())
    }

    /// Decodes a framed extended commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame tag is wrong, the bytes do not decode,
    /// or the payload exceeds the wire cap.
    pub fn decode(&self, bytes: &[u8]) -> Result<ExtendedCommitInfo, CodecError> {
        if bytes.len() > self.max_encoded_bytes {
            return Err(CodecError::overlong(bytes.len(), self.max_encoded_bytes));
        }
        let Some((tag, payload)) = bytes.split_first() else {
            return Err(CodecError::empty_frame());
        };
        if *tag != EXTENDED_COMMIT_FRAME_TAG {
            return Err(CodecError::wrong_frame_tag(*tag));
        }
        let raw = tendermint_proto::abci::ExtendedCommitInfo::decode_length_delimited(payload)
            .map_err(CodecError::malformed_frame)?;
        ExtendedCommitInfo::try_from(raw).map_err(CodecError::extended_commit_info)
    }
}

impl Default for ExtendedCommitCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tendermint::{
        abci::types::{
            BlockSignatureInfo,
            ExtendedVoteInfo,
            Validator,
        },
        block::BlockIdFlag,
    };

    use super::*;
    use crate::types::CurrencyPairId;

    fn dummy_vote_extension() -> OracleVoteExtension {
        OracleVoteExtension {
            prices: BTreeMap::from([
                (CurrencyPairId::new(0), 100_u64.to_be_bytes().to_vec()),
                (CurrencyPairId::new(1), 200_u64.to_be_bytes().to_vec()),
                (CurrencyPairId::new(42), vec![]),
            ]),
        }
    }

    fn dummy_extended_commit(extensions: Vec<Bytes>) -> ExtendedCommitInfo {
        let votes = extensions
            .into_iter()
            .enumerate()
            .map(|(i, vote_extension)| ExtendedVoteInfo {
                validator: Validator {
                    address: [u8::try_from(i).unwrap(); 20],
                    power: 10_u8.into(),
                },
                sig_info: BlockSignatureInfo::Flag(BlockIdFlag::Commit),
                vote_extension,
                extension_signature: None,
            })
            .collect();
        ExtendedCommitInfo {
            round: 0_u8.into(),
            votes,
        }
    }

    #[test]
    fn default_codec_round_trip() {
        let codec = DefaultVoteExtensionCodec;
        let vote_extension = dummy_vote_extension();
        let bytes = codec.encode(&vote_extension).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), vote_extension);
    }

    #[test]
    fn default_codec_is_deterministic() {
        let codec = DefaultVoteExtensionCodec;
        let vote_extension = dummy_vote_extension();
        assert_eq!(
            codec.encode(&vote_extension).unwrap(),
            codec.encode(&vote_extension).unwrap(),
        );
    }

    #[test]
    fn compression_codec_round_trip() {
        let codec =
            CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, ZlibCompressor::default());
        let vote_extension = dummy_vote_extension();
        let bytes = codec.encode(&vote_extension).unwrap();
        assert_eq!(bytes[0], ZLIB_COMPRESSOR_TAG);
        assert_eq!(codec.decode(&bytes).unwrap(), vote_extension);
    }

    #[test]
    fn noop_compression_codec_round_trip() {
        let codec = CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, NoopCompressor);
        let vote_extension = dummy_vote_extension();
        let bytes = codec.encode(&vote_extension).unwrap();
        assert_eq!(bytes[0], NOOP_COMPRESSOR_TAG);
        assert_eq!(codec.decode(&bytes).unwrap(), vote_extension);
    }

    #[test]
    fn empty_vote_extension_round_trip() {
        let codec =
            CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, ZlibCompressor::default());
        let vote_extension = OracleVoteExtension::default();
        let bytes = codec.encode(&vote_extension).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), vote_extension);
    }

    #[test]
    fn mismatched_compressor_tag_is_rejected() {
        let zlib =
            CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, ZlibCompressor::default());
        let noop = CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, NoopCompressor);
        let bytes = zlib.encode(&dummy_vote_extension()).unwrap();
        assert!(noop.decode(&bytes).is_err());
    }

    #[test]
    fn empty_frame_is_rejected() {
        let codec = CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, NoopCompressor);
        assert!(codec.decode(&[]).is_err());
    }

    #[test]
    fn overlong_encoding_is_rejected() {
        let codec = CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, NoopCompressor)
            .with_max_encoded_bytes(8);
        let err = codec.encode(&dummy_vote_extension()).unwrap_err();
        assert!(err.is_overlong());
    }

    #[test]
    fn extended_commit_round_trip() {
        let codec = ExtendedCommitCodec::new();
        let commit = dummy_extended_commit(vec![
            Bytes::from_static(&[1, 2, 3]),
            Bytes::new(),
            Bytes::from_static(&[4]),
        ]);
        let bytes = codec.encode(&commit).unwrap();
        assert_eq!(bytes[0], EXTENDED_COMMIT_FRAME_TAG);
        assert_eq!(codec.decode(&bytes).unwrap(), commit);
    }

    #[test]
    fn extended_commit_wrong_tag_is_rejected() {
        let codec = ExtendedCommitCodec::new();
        let commit = dummy_extended_commit(vec![Bytes::new()]);
        let mut bytes = codec.encode(&commit).unwrap().to_vec();
        bytes[0] = 0x00;
        assert!(codec.decode(&bytes).is_err());
    }

    #[test]
    fn truncated_extended_commit_is_rejected() {
        let codec = ExtendedCommitCodec::new();
        let commit = dummy_extended_commit(vec![Bytes::from_static(&[1, 2, 3])]);
        let bytes = codec.encode(&commit).unwrap();
        assert!(codec.decode(&bytes[..bytes.len() - 2]).is_err());
    }
}
