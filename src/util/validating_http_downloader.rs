use std::path::Path;

use anyhow::anyhow;
use bytes::Bytes;
use futures::StreamExt;
use hex::FromHex;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper::client::HttpConnector;
use hyper::header::USER_AGENT;
use hyper_tls::HttpsConnector;
use tokio::fs::{remove_file, rename, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, trace};
use uuid::Uuid;

use crate::util::stream_verifier::{Md5StreamVerifier, Sha1StreamVerifier, StreamVerifier, StreamVerifierAttributes};
use crate::util::validating_http_body::ValidatingHttpBody;

/// Downloads files relative to a fixed base URI, checking the body's integrity against a hashcode
///  if one is returned in a header.
///
/// Instances do HTTP connection caching internally, so keeping them alive has performance benefits.
pub struct ValidatingHttpDownloader {
    client: Client<HttpsConnector<HttpConnector>>,
    base_uri: String, // with trailing '/'
}
impl ValidatingHttpDownloader {
    pub fn new(base_uri: &str) -> anyhow::Result<ValidatingHttpDownloader> {
        let mut base_uri = base_uri.to_string();
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }

        // check that the base URI is valid
        Uri::try_from(base_uri.clone())?;

        Ok(ValidatingHttpDownloader {
            client: Client::builder()
                .build::<_, Body>(HttpsConnector::new()),
            base_uri,
        })
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// `Ok(None)` if the server does not have the file
    async fn request(&self, path: &str) -> anyhow::Result<Option<ValidatingHttpBody>> {
        let artifact_path = format!("{}{}", self.base_uri, path);
        let request = Request::builder()
            .method("GET")
            .uri(Uri::try_from(artifact_path.clone())?)
            .header(USER_AGENT, "curl/7.68.0" ) // Maven Central returns a 403 without a user agent
            .body(Body::empty())?;

        trace!("getting {:?}", request);

        let artifact_response = self.client.request(request)
            .await?;

        if artifact_response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !artifact_response.status().is_success() {
            return Err(anyhow!("upstream request for {} failed: {}", artifact_path, artifact_response.status()));
        }

        let verifiers = Self::header_verifiers(&artifact_response)?;
        Ok(Some(ValidatingHttpBody::new(artifact_response.into_body(), verifiers)))
    }

    fn header_verifiers(response: &Response<Body>) -> anyhow::Result<Vec<Box<dyn StreamVerifier>>> {
        let sha1_hash_header = response.headers().get("x-checksum-sha1")
            .or_else(|| response.headers().get("x-goog-meta-checksum-sha1"))
            ;
        let sha1_string = sha1_hash_header
            .map(|h| h.to_str().unwrap_or(""))
            .map(|s| if s.len() == 42 { &s[1..41] } else { s } );

        let md5_string = response.headers().get("x-checksum-md5")
            .or_else(|| response.headers().get("x-goog-meta-checksum-md5"))
            .map(|h| h.to_str().unwrap_or(""))
            ;

        let attributes = |extension: &str| StreamVerifierAttributes {
            extension: extension.to_string(),
            lenient: false,
            sufficient: false,
        };

        let mut verifiers: Vec<Box<dyn StreamVerifier>> = vec![];
        if let Some(sha1) = sha1_string {
            let expected_hash = <[u8;20]>::from_hex(sha1)?;
            verifiers.push(Box::new(Sha1StreamVerifier::with_expected_hash(attributes("sha1"), expected_hash)));
        }
        if let Some(md5) = md5_string {
            let expected_hash = <[u8;16]>::from_hex(md5)?;
            verifiers.push(Box::new(Md5StreamVerifier::with_expected_hash(attributes("md5"), expected_hash)));
        }
        Ok(verifiers)
    }

    /// Downloads a file into memory. `Ok(None)` if the server does not have it.
    pub async fn get_bytes(&self, path: &str) -> anyhow::Result<Option<Bytes>> {
        let mut body = match self.request(path).await? {
            Some(body) => body,
            None => return Ok(None),
        };

        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Downloads a file to `target`. The data is written to a temporary file next to the target
    ///  and renamed once it is complete and validated. Returns `false` if the server does not
    ///  have the file.
    pub async fn download_to(&self, path: &str, target: &Path) -> anyhow::Result<bool> {
        let mut body = match self.request(path).await? {
            Some(body) => body,
            None => return Ok(false),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = target.with_file_name(format!(
            "{}.{}.downloading",
            target.file_name().and_then(|n| n.to_str()).unwrap_or("download"),
            Uuid::new_v4().as_hyphenated(),
        ));

        let result = async {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            while let Some(chunk) = body.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            rename(&temp_path, target).await?;
            Ok::<_, anyhow::Error>(())
        }.await;

        if let Err(e) = result {
            if let Err(cleanup) = remove_file(&temp_path).await {
                error!("error cleaning up {} after failed download: {}", temp_path.display(), cleanup);
            }
            return Err(e);
        }
        Ok(true)
    }
}
