//! Certificate Public Key Pinning
//!
//! A pin is the SHA-256 digest of a certificate's DER-encoded
//! SubjectPublicKeyInfo. The TLS verifier below accepts a server only when
//! its end-entity certificate carries the pinned key, so a mismatching
//! server is rejected during the handshake, before any request bytes leave
//! the client.

use crate::error::{MfpError, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig as TlsClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Marker carried by handshake errors raised on a pin mismatch
pub const PIN_MISMATCH_MARKER: &str = "mfp-client: certificate public key does not match pin";

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const TAG_EXPLICIT_VERSION: u8 = 0xA0;

/// A pinned public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyPin {
    spki_sha256: [u8; 32],
    source: Option<PathBuf>,
}

impl PublicKeyPin {
    /// Read a DER or PEM certificate file and pin its public key
    pub fn from_certificate_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            MfpError::Certificate(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let der = if looks_like_pem(&raw) {
            decode_pem(&raw)?
        } else {
            raw
        };

        let mut pin = Self::from_certificate_der(&der)?;
        pin.source = Some(path.to_path_buf());
        Ok(pin)
    }

    /// Pin the public key of a DER-encoded X.509 certificate
    pub fn from_certificate_der(der: &[u8]) -> Result<Self> {
        let spki = subject_public_key_info(der)?;
        Ok(Self {
            spki_sha256: Sha256::digest(spki).into(),
            source: None,
        })
    }

    /// SHA-256 of the pinned SubjectPublicKeyInfo
    pub fn fingerprint(&self) -> [u8; 32] {
        self.spki_sha256
    }

    /// Hex form of the fingerprint, for logs
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.spki_sha256)
    }

    /// File the pin was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Check whether a DER certificate carries the pinned key.
    ///
    /// Unparseable certificates never match.
    pub fn matches_certificate(&self, der: &[u8]) -> bool {
        match subject_public_key_info(der) {
            Ok(spki) => {
                let digest: [u8; 32] = Sha256::digest(spki).into();
                digest == self.spki_sha256
            }
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PublicKeyPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyPin")
            .field("spki_sha256", &self.fingerprint_hex())
            .field("source", &self.source)
            .finish()
    }
}

fn looks_like_pem(raw: &[u8]) -> bool {
    raw.windows(10).any(|w| w == b"-----BEGIN")
}

/// Decode the first CERTIFICATE block of a PEM file
fn decode_pem(raw: &[u8]) -> Result<Vec<u8>> {
    CertificateDer::from_pem_slice(raw)
        .map(|cert| cert.as_ref().to_vec())
        .map_err(|e| MfpError::Certificate(format!("Invalid PEM certificate: {}", e)))
}

/// One DER element: tag, full encoding and content
struct Tlv<'a> {
    tag: u8,
    raw: &'a [u8],
    content: &'a [u8],
}

/// Read one DER element from the front of `input`, returning it and the rest
fn read_tlv(input: &[u8]) -> Result<(Tlv<'_>, &[u8])> {
    let malformed = |what: &str| MfpError::Certificate(format!("Malformed DER: {}", what));

    let (&tag, rest) = input.split_first().ok_or_else(|| malformed("missing tag"))?;
    let (&first_len, rest) = rest.split_first().ok_or_else(|| malformed("missing length"))?;

    let (len, rest) = if first_len & 0x80 == 0 {
        (first_len as usize, rest)
    } else {
        let count = (first_len & 0x7f) as usize;
        if count == 0 || count > 4 || rest.len() < count {
            return Err(malformed("unsupported length encoding"));
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, &rest[count..])
    };

    if rest.len() < len {
        return Err(malformed("truncated element"));
    }

    let header_len = input.len() - rest.len();
    Ok((
        Tlv {
            tag,
            raw: &input[..header_len + len],
            content: &rest[..len],
        },
        &rest[len..],
    ))
}

fn expect(tlv: &Tlv<'_>, tag: u8, what: &str) -> Result<()> {
    if tlv.tag == tag {
        Ok(())
    } else {
        Err(MfpError::Certificate(format!(
            "Malformed certificate: expected {} (tag {:#04x}), found tag {:#04x}",
            what, tag, tlv.tag
        )))
    }
}

/// Locate the SubjectPublicKeyInfo inside a DER certificate.
///
/// Certificate ::= SEQUENCE { tbsCertificate, ... } and the tbsCertificate
/// fields preceding the key are an optional [0] version, serialNumber,
/// signature, issuer, validity and subject.
fn subject_public_key_info(der: &[u8]) -> Result<&[u8]> {
    let (certificate, _) = read_tlv(der)?;
    expect(&certificate, TAG_SEQUENCE, "certificate sequence")?;

    let (tbs, _) = read_tlv(certificate.content)?;
    expect(&tbs, TAG_SEQUENCE, "tbsCertificate")?;

    let (mut field, mut rest) = read_tlv(tbs.content)?;
    if field.tag == TAG_EXPLICIT_VERSION {
        (field, rest) = read_tlv(rest)?;
    }
    expect(&field, TAG_INTEGER, "serial number")?;

    for what in ["signature algorithm", "issuer", "validity", "subject"] {
        (field, rest) = read_tlv(rest)?;
        expect(&field, TAG_SEQUENCE, what)?;
    }

    let (spki, _) = read_tlv(rest)?;
    expect(&spki, TAG_SEQUENCE, "subjectPublicKeyInfo")?;
    Ok(spki.raw)
}

/// rustls verifier that trusts exactly the pinned public key
#[derive(Debug)]
pub struct PinnedVerifier {
    pin: Arc<PublicKeyPin>,
    provider: Arc<CryptoProvider>,
}

impl PinnedVerifier {
    /// Create a verifier for a pin using the ring crypto provider
    pub fn new(pin: Arc<PublicKeyPin>) -> Self {
        Self {
            pin,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self.pin.matches_certificate(end_entity.as_ref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                server = ?server_name,
                pin = %self.pin.fingerprint_hex(),
                "rejecting server certificate that does not match the pinned key"
            );
            Err(rustls::Error::General(PIN_MISMATCH_MARKER.to_string()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a rustls client configuration enforcing `pin`
pub fn pinned_tls_config(pin: Arc<PublicKeyPin>) -> Result<TlsClientConfig> {
    let verifier = Arc::new(PinnedVerifier::new(pin));
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = TlsClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| MfpError::Internal(format!("Failed to configure TLS: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
