use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::{ready, Stream};
use hyper::Body;
use pin_project_lite::pin_project;
use tracing::trace;

use crate::util::stream_verifier::StreamVerifier;

/// This struct wraps an HTTP body, allowing it to be consumed asynchronously without materializing
///  it but at the same time performing validation that requires knowledge of the entire body's
///  data (e.g. SHA1 checksum check).
///
/// The actual contract is to append an (empty) chunk of data to the stream with an error if the
///  validation fails. Once a stream chunk with an error was returned, this stream will stop
///  polling from upstream and always return an error
pin_project! {
    pub struct ValidatingHttpBody {
        #[pin]
        http_body: Body,
        verifiers: Vec<Box<dyn StreamVerifier>>,
        is_failed: bool,
    }
}
impl ValidatingHttpBody {
    pub fn new(http_body: Body, verifiers: Vec<Box<dyn StreamVerifier>>) -> ValidatingHttpBody {
        ValidatingHttpBody {
            http_body,
            verifiers,
            is_failed: false,
        }
    }
}

impl Stream for ValidatingHttpBody {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_failed {
            return Poll::Ready(Some(Err(anyhow::Error::msg("polling from failed stream"))));
        }

        let this = self.project();
        let inner = ready!(this.http_body.poll_next(cx));
        match inner {
            Some(Ok(data)) => {
                // available data from the wrapped HTTP body -> pass this on
                for verifier in this.verifiers.iter_mut() {
                    if let Err(e) = verifier.bytes_ready(&data) {
                        *this.is_failed = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Ok(data)))
            }
            None => {
                // wrapped HTTP body is fully drained -> finalize validation
                trace!("validating downloaded body against {} checksum(s)", this.verifiers.len());
                match this.verifiers.iter().find(|v| !v.verify_signature()) {
                    None => Poll::Ready(None),
                    Some(failed) => {
                        *this.is_failed = true;
                        Poll::Ready(Some(Err(anyhow::Error::msg(format!(
                            "failed {} validation", failed.attributes().extension
                        )))))
                    }
                }
            }
            Some(Err(e)) => {
                *this.is_failed = true;
                Poll::Ready(Some(Err(e.into())))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.http_body.size_hint()
    }
}


#[cfg(test)]
mod test {
    use futures::StreamExt;
    use sha1::{Digest, Sha1};
    use super::*;
    use crate::util::stream_verifier::{Sha1StreamVerifier, StreamVerifierAttributes};

    fn sha1_verifier(data: &[u8]) -> Box<dyn StreamVerifier> {
        let mut hasher = Sha1::default();
        hasher.update(data);
        let attributes = StreamVerifierAttributes { extension: "sha1".to_string(), lenient: false, sufficient: true };
        Box::new(Sha1StreamVerifier::with_expected_hash(attributes, hasher.finalize().into()))
    }

    #[tokio::test]
    async fn test_valid_body() {
        let mut body = ValidatingHttpBody::new(Body::from("abc"), vec![sha1_verifier(b"abc")]);
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abc");
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let mut body = ValidatingHttpBody::new(Body::from("abc"), vec![sha1_verifier(b"xyz")]);
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"abc");
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.unwrap().is_err());
    }
}
