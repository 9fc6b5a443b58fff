//! WAL configuration.

use crate::error::{WalError, WalResult};
use crate::meta::MetaStore;
use crate::segment::SegmentFiler;
use crate::stats::MetricsCollector;
use segwal_codec::{builtin_codec, is_internal_codec_id, BinaryCodec, Codec};
use std::sync::Arc;
use tracing::Span;

/// Default segment size budget: 64 MiB.
pub const DEFAULT_SEGMENT_SIZE: u32 = 64 * 1024 * 1024;

/// Smallest accepted segment size budget.
pub const MIN_SEGMENT_SIZE: u32 = 1024;

/// Options for opening a WAL.
///
/// Components left as `None` get the file-based defaults when the WAL opens.
#[derive(Debug, Clone)]
pub struct Options {
    /// Codec for newly written segments.
    pub codec: Arc<dyn Codec>,

    /// Catalog and stable KV store. Defaults to a `FileMetaStore`.
    pub meta_store: Option<Arc<dyn MetaStore>>,

    /// Segment file lifecycle. Defaults to a `FileSegmentFiler`.
    pub segment_filer: Option<Arc<dyn SegmentFiler>>,

    /// Span that every WAL event is recorded under.
    pub logger: Option<Span>,

    /// Size in bytes at which a segment seals and a new one starts.
    pub segment_size: u32,

    /// Metrics sink. Defaults to an `AtomicMetrics`.
    pub metrics: Option<Arc<dyn MetricsCollector>>,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            codec: Arc::new(BinaryCodec),
            meta_store: None,
            segment_filer: None,
            logger: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            metrics: None,
            create_if_missing: true,
        }
    }
}

impl Options {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the codec used for new segments.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replaces the meta store.
    #[must_use]
    pub fn meta_store(mut self, store: Arc<dyn MetaStore>) -> Self {
        self.meta_store = Some(store);
        self
    }

    /// Replaces the segment filer.
    #[must_use]
    pub fn segment_filer(mut self, filer: Arc<dyn SegmentFiler>) -> Self {
        self.segment_filer = Some(filer);
        self
    }

    /// Sets the span WAL events are recorded under.
    #[must_use]
    pub fn logger(mut self, span: Span) -> Self {
        self.logger = Some(span);
        self
    }

    /// Sets the segment size budget.
    #[must_use]
    pub const fn segment_size(mut self, bytes: u32) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Checks the options for values the WAL cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Config`] if the segment size is below
    /// [`MIN_SEGMENT_SIZE`] or the codec claims a reserved ID that no
    /// built-in codec uses.
    pub fn validate(&self) -> WalResult<()> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(WalError::config(format!(
                "segment size {} is below the minimum of {MIN_SEGMENT_SIZE} bytes",
                self.segment_size
            )));
        }
        let id = self.codec.id();
        if is_internal_codec_id(id) && builtin_codec(id).is_none() {
            return Err(WalError::config(format!(
                "codec ID {id} lies in the range reserved for built-in codecs"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segwal_codec::{CborCodec, CodecResult, LogEntry, FIRST_EXTERNAL_CODEC_ID};

    #[derive(Debug)]
    struct FixedIdCodec(u64);

    impl Codec for FixedIdCodec {
        fn id(&self) -> u64 {
            self.0
        }

        fn encode(&self, entry: &LogEntry, out: &mut Vec<u8>) -> CodecResult<()> {
            BinaryCodec.encode(entry, out)
        }

        fn decode(&self, bytes: &[u8]) -> CodecResult<LogEntry> {
            BinaryCodec.decode(bytes)
        }
    }

    #[test]
    fn default_options() {
        let options = Options::default();
        assert!(options.create_if_missing);
        assert_eq!(options.segment_size, DEFAULT_SEGMENT_SIZE);
        assert_eq!(options.codec.id(), segwal_codec::CODEC_BINARY_V1);
        options.validate().unwrap();
    }

    #[test]
    fn builder_pattern() {
        let options = Options::new()
            .create_if_missing(false)
            .segment_size(4096)
            .codec(Arc::new(CborCodec));

        assert!(!options.create_if_missing);
        assert_eq!(options.segment_size, 4096);
        assert_eq!(options.codec.id(), segwal_codec::CODEC_CBOR_V1);
        options.validate().unwrap();
    }

    #[test]
    fn tiny_segments_are_rejected() {
        let err = Options::new().segment_size(100).validate().unwrap_err();
        assert!(matches!(err, WalError::Config { .. }));
    }

    #[test]
    fn reserved_codec_ids_are_rejected() {
        let err = Options::new()
            .codec(Arc::new(FixedIdCodec(7)))
            .validate()
            .unwrap_err();
        assert!(matches!(err, WalError::Config { .. }));

        Options::new()
            .codec(Arc::new(FixedIdCodec(FIRST_EXTERNAL_CODEC_ID)))
            .validate()
            .unwrap();
    }
}
