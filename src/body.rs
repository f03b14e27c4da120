//! Size-bounded reading of HTTP response bodies.

/// Why a body could not be read.
#[derive(Debug)]
pub(crate) enum BodyError {
    /// The body exceeds the limit (in bytes).
    TooLarge(usize),
    /// The connection failed while reading.
    Transport(reqwest::Error),
}

/// Reads the body of `response`, failing as soon as it exceeds `limit` bytes.
pub(crate) async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(BodyError::TooLarge(limit));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(BodyError::Transport)? {
        if body.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
