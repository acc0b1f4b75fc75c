#[cfg(test)]
use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use reqwest::Response;

/// The connection failed while reading the body.
#[derive(Debug, PartialEq, Eq)]
pub struct Error;

/// An adapter for streaming byte chunks.
pub enum Chunks {
    Response(Response),
    #[cfg(test)]
    VecDeque(VecDeque<Bytes>),
    #[cfg(test)]
    Broken(VecDeque<Bytes>),
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Chunks::Response(response)
    }

    #[cfg(test)]
    pub fn from_vec_deque(vec: VecDeque<Bytes>) -> Self {
        Chunks::VecDeque(vec)
    }

    /// Yields the given chunks, then fails instead of ending.
    #[cfg(test)]
    pub fn broken_after(vec: VecDeque<Bytes>) -> Self {
        Chunks::Broken(vec)
    }

    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Response(response) => {
                let Ok(chunk) = response.chunk().await else {
                    return Err(Error);
                };
                Ok(chunk)
            }
            #[cfg(test)]
            Chunks::VecDeque(vec) => Ok(vec.pop_front()),
            #[cfg(test)]
            Chunks::Broken(vec) => vec.pop_front().map(Some).ok_or(Error),
        }
    }

    /// Reads the remaining chunks into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_to_end() {
        let mut chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"{\"te"), Bytes::from_static(b"xt\":1}")]
                .into(),
        );
        let body = chunks.read_to_end().await.unwrap();
        assert_eq!(&body[..], b"{\"text\":1}");
    }

    #[tokio::test]
    async fn test_broken_body() {
        let mut chunks =
            Chunks::broken_after(vec![Bytes::from_static(b"partial")].into());
        assert!(chunks.next_chunk().await.unwrap().is_some());
        assert_eq!(chunks.next_chunk().await.unwrap_err(), Error);
    }
}
