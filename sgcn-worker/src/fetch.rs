use anyhow::{Context, Error};
use reqwest::Client;
use url::Url;

/// Read the full contents of a local path, a `file://` url or an http(s) url.
pub async fn fetch_bytes(client: &Client, location: &str) -> Result<Vec<u8>, Error> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            let response = client
                .get(url)
                .send()
                .await?
                .error_for_status()
                .with_context(|| format!("failed to download {location}"))?;
            Ok(response.bytes().await?.to_vec())
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::msg(format!("invalid file url: {location}")))?;
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))
        }
        // Anything else, including bare paths and Windows drive letters, is read from disk
        _ => tokio::fs::read(location)
            .await
            .with_context(|| format!("failed to read {location}")),
    }
}

/// Decode as UTF-8, falling back to Windows-1252 for legacy (mostly Excel exported) source files.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            decoded.into_owned()
        }
    }
}
