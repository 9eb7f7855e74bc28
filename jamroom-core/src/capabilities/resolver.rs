use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::ResolveError;

/// A stream of raw media bytes, in arbitrarily sized chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ResolveError>>;

/// What a [MediaResolver] knows about a url.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub duration_seconds: f64,
    pub thumbnail_url: String,
    /// The platform's own id of the track, used for de-duplication and as the blob key.
    pub external_id: String,
}

/// A media stream returned by [MediaResolver::fetch_stream].
pub struct MediaStream {
    /// The total amount of bytes, if the source reported it.
    pub total_length: Option<u64>,
    pub bytes: ByteStream,
}

/// Turns user-submitted urls into track metadata and media bytes.
#[async_trait]
pub trait MediaResolver
where
    Self: Send + Sync + 'static,
{
    /// Looks up the metadata of the media behind the url.
    async fn resolve(&self, url: &str) -> Result<TrackInfo, ResolveError>;

    /// Opens a byte stream of the media behind the url.
    async fn fetch_stream(&self, url: &str) -> Result<MediaStream, ResolveError>;
}
