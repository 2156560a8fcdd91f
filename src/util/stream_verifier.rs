use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::fs::{try_exists, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::error::RepositoryError;
use crate::maven::paths::signature_path;

/// Files are streamed through verifiers in chunks of this size
pub const CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVerifierAttributes {
    /// signature file extension, with or without leading '.'
    pub extension: String,
    /// a lenient verifier tolerates a missing signature file and failures
    pub lenient: bool,
    /// successful verification by a sufficient verifier makes further checks unnecessary
    pub sufficient: bool,
}

/// Observes a byte stream and checks it against an expected signature.
pub trait StreamVerifier: Send {
    fn attributes(&self) -> &StreamVerifierAttributes;

    fn init_signature(&mut self, signature: &str) -> anyhow::Result<()>;

    fn bytes_ready(&mut self, data: &[u8]) -> anyhow::Result<()>;

    fn verify_signature(&self) -> bool;
}

pub trait StreamVerifierFactory: Send + Sync {
    fn new_instance(&self) -> Box<dyn StreamVerifier>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha1,
    Md5,
}
impl DigestAlgorithm {
    pub fn extension(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Md5 => "md5",
        }
    }
}

/// Signature files of Maven repositories contain the hex digest, optionally followed by the file
///  name
fn parse_hex_digest<const N: usize>(signature: &str) -> anyhow::Result<[u8; N]> {
    let digest = signature.split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("empty signature"))?;
    let bytes = hex::decode(digest)?;
    bytes.try_into()
        .map_err(|b: Vec<u8>| anyhow!("expected a {} byte digest, got {} bytes", N, b.len()))
}

pub struct Sha1StreamVerifier {
    attributes: StreamVerifierAttributes,
    hasher: Sha1,
    expected_hash: Option<[u8; 20]>,
}
impl Sha1StreamVerifier {
    pub fn new(attributes: StreamVerifierAttributes) -> Sha1StreamVerifier {
        Sha1StreamVerifier {
            attributes,
            hasher: Default::default(),
            expected_hash: None,
        }
    }

    pub fn with_expected_hash(attributes: StreamVerifierAttributes, expected_hash: [u8; 20]) -> Sha1StreamVerifier {
        Sha1StreamVerifier {
            expected_hash: Some(expected_hash),
            ..Sha1StreamVerifier::new(attributes)
        }
    }
}
impl StreamVerifier for Sha1StreamVerifier {
    fn attributes(&self) -> &StreamVerifierAttributes {
        &self.attributes
    }

    fn init_signature(&mut self, signature: &str) -> anyhow::Result<()> {
        self.expected_hash = Some(parse_hex_digest(signature)?);
        Ok(())
    }

    fn bytes_ready(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.hasher.update(data);
        Ok(())
    }

    fn verify_signature(&self) -> bool {
        let hash = self.hasher.clone().finalize();
        trace!("validating SHA1 hash");
        match &self.expected_hash {
            Some(expected) => hash.as_slice() == expected,
            None => false,
        }
    }
}

pub struct Md5StreamVerifier {
    attributes: StreamVerifierAttributes,
    context: md5::Context,
    expected_hash: Option<[u8; 16]>,
}
impl Md5StreamVerifier {
    pub fn new(attributes: StreamVerifierAttributes) -> Md5StreamVerifier {
        Md5StreamVerifier {
            attributes,
            context: md5::Context::new(),
            expected_hash: None,
        }
    }

    pub fn with_expected_hash(attributes: StreamVerifierAttributes, expected_hash: [u8; 16]) -> Md5StreamVerifier {
        Md5StreamVerifier {
            expected_hash: Some(expected_hash),
            ..Md5StreamVerifier::new(attributes)
        }
    }
}
impl StreamVerifier for Md5StreamVerifier {
    fn attributes(&self) -> &StreamVerifierAttributes {
        &self.attributes
    }

    fn init_signature(&mut self, signature: &str) -> anyhow::Result<()> {
        self.expected_hash = Some(parse_hex_digest(signature)?);
        Ok(())
    }

    fn bytes_ready(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.context.consume(data);
        Ok(())
    }

    fn verify_signature(&self) -> bool {
        let hash: [u8; 16] = self.context.clone()
            .compute()
            .into();
        trace!("validating MD5 hash");
        self.expected_hash == Some(hash)
    }
}

/// Creates SHA1 or MD5 verifiers for `.sha1` / `.md5` signature files
#[derive(Debug, Clone)]
pub struct DigestVerifierFactory {
    pub algorithm: DigestAlgorithm,
    pub lenient: bool,
    pub sufficient: bool,
}
impl DigestVerifierFactory {
    fn attributes(&self) -> StreamVerifierAttributes {
        StreamVerifierAttributes {
            extension: self.algorithm.extension().to_string(),
            lenient: self.lenient,
            sufficient: self.sufficient,
        }
    }
}
impl StreamVerifierFactory for DigestVerifierFactory {
    fn new_instance(&self) -> Box<dyn StreamVerifier> {
        match self.algorithm {
            DigestAlgorithm::Sha1 => Box::new(Sha1StreamVerifier::new(self.attributes())),
            DigestAlgorithm::Md5 => Box::new(Md5StreamVerifier::new(self.attributes())),
        }
    }
}

/// Checks a file against the signature files next to it, with one freshly created verifier per
///  factory. The file is streamed once and fed to all verifiers whose signature file exists.
pub async fn verify_file(file: &Path, factories: &[Arc<dyn StreamVerifierFactory>]) -> Result<(), RepositoryError> {
    if factories.is_empty() {
        return Ok(());
    }

    let mut verifiers = Vec::with_capacity(factories.len());
    for factory in factories {
        let mut verifier = factory.new_instance();
        let attributes = verifier.attributes().clone();
        let sig_path = signature_path(file, &attributes.extension);

        let exists = try_exists(&sig_path).await
            .map_err(|e| RepositoryError::read(&sig_path, e))?;
        if exists {
            let signature = tokio::fs::read_to_string(&sig_path).await
                .map_err(|e| RepositoryError::Verification(format!("cannot read signature file {}: {}", sig_path.display(), e)))?;

            match verifier.init_signature(&signature) {
                Ok(()) => verifiers.push(verifier),
                Err(e) if attributes.lenient => {
                    debug!("ignoring unusable signature file {}: {}", sig_path.display(), e);
                }
                Err(e) => {
                    return Err(RepositoryError::Verification(format!("invalid signature file {}: {}", sig_path.display(), e)));
                }
            }
        }
        else if !attributes.lenient {
            return Err(RepositoryError::Verification(format!(
                "no {} signature file {} for non-lenient verifier", attributes.extension, sig_path.display()
            )));
        }
        // a missing signature file is fine for a lenient verifier
    }

    let f = File::open(file).await
        .map_err(|e| RepositoryError::read(file, e))?;
    let mut chunks = ReaderStream::with_capacity(f, CHUNK_SIZE);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| RepositoryError::read(file, e))?;
        for verifier in verifiers.iter_mut() {
            if let Err(e) = verifier.bytes_ready(&chunk) {
                if !verifier.attributes().lenient {
                    return Err(RepositoryError::Verification(format!("failed to process {}: {}", file.display(), e)));
                }
            }
        }
    }

    for verifier in &verifiers {
        let attributes = verifier.attributes();
        if verifier.verify_signature() {
            if attributes.sufficient {
                break;
            }
        }
        else if !attributes.lenient {
            return Err(RepositoryError::Verification(format!(
                "{} signature does not match {}", attributes.extension, file.display()
            )));
        }
    }

    Ok(())
}
