use futures_util::StreamExt;
use jamroom_core::{MediaStream, ResolveError};
use log::debug;
use reqwest::Client;

/// Opens a plain http stream of the bytes behind a url.
pub async fn open_network_stream(client: &Client, url: &str) -> Result<MediaStream, ResolveError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ResolveError::Fetch(e.to_string()))?;

    let status = response.status();

    if !status.is_success() {
        return Err(ResolveError::Fetch(format!(
            "Stream request failed with {}",
            status
        )));
    }

    let total_length = response.content_length();
    debug!("Opened network stream of {:?} bytes", total_length);

    let bytes = response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| ResolveError::Fetch(e.to_string()))
        })
        .boxed();

    Ok(MediaStream {
        total_length,
        bytes,
    })
}
