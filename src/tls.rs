use std::{fmt, sync::Arc};

use log::{debug, warn};
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};

use crate::error::TlsError;

/// Decides whether a certificate whose names do not cover `hostname` should
/// still be accepted. Only consulted once the chain itself has been verified.
pub trait HostnameVerifier: Send + Sync {
    fn verify(&self, hostname: &str, certificate: &CertificateDer<'_>) -> bool;
}

impl<F> HostnameVerifier for F
where
    F: Fn(&str, &CertificateDer<'_>) -> bool + Send + Sync,
{
    fn verify(&self, hostname: &str, certificate: &CertificateDer<'_>) -> bool {
        self(hostname, certificate)
    }
}

/// Trust anchors and optional client identity used for encrypted upstreams.
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    pub roots: RootCertStore,
    pub identity: Option<(Vec<CertificateDer<'static>>, Arc<PrivateKeyDer<'static>>)>,
}

impl TrustMaterial {
    pub fn new(roots: RootCertStore) -> Self {
        TrustMaterial {
            roots,
            identity: None,
        }
    }

    /// Builds the material from PEM encoded CA certificates and, optionally, a
    /// PEM encoded client certificate chain and private key.
    pub fn from_pem(ca: &[u8], identity: Option<(&[u8], &[u8])>) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(read_certs(ca)?);
        if added == 0 {
            return Err(TlsError::NoCertificates);
        }
        if ignored > 0 {
            warn!("ignored {} unparsable CA certificates", ignored);
        }
        let identity = match identity {
            Some((chain, key)) => {
                let key =
                    rustls_pemfile::private_key(&mut &key[..])?.ok_or(TlsError::NoPrivateKey)?;
                Some((read_certs(chain)?, Arc::new(key)))
            }
            None => None,
        };
        Ok(TrustMaterial { roots, identity })
    }
}

fn read_certs(mut pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut pem).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(certs)
}

/// Custom TLS trust applied to encrypted upstream connections.
///
/// Either half may be left out: missing material falls back to the platform
/// roots, a missing hostname rule keeps strict name checking.
///
/// A verifier set through [`TrustPolicy::with_verifier`] replaces chain and
/// name checking entirely, so roots and the hostname rule are then unused.
/// Client identity from the material still applies.
#[derive(Clone, Default)]
pub struct TrustPolicy {
    material: Option<TrustMaterial>,
    hostname_verifier: Option<Arc<dyn HostnameVerifier>>,
    verifier: Option<Arc<dyn ServerCertVerifier>>,
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("material", &self.material)
            .field("hostname_verifier", &self.hostname_verifier.is_some())
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl TrustPolicy {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_material(mut self, material: TrustMaterial) -> Self {
        self.material = Some(material);
        self
    }
    pub fn with_hostname_verifier(mut self, verifier: impl HostnameVerifier + 'static) -> Self {
        self.hostname_verifier = Some(Arc::new(verifier));
        self
    }

    /// Trusts whatever `verifier` accepts, e.g. a pinned self-signed
    /// certificate that webpki would refuse as an end entity.
    pub fn with_verifier(mut self, verifier: Arc<dyn ServerCertVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub(crate) fn client_config(&self) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;
        let builder = match (&self.verifier, &self.hostname_verifier) {
            (Some(verifier), _) => {
                debug!("using caller supplied certificate verifier");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(verifier.clone())
            }
            (None, Some(hostnames)) => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PolicyVerifier::new(
                    self.roots(),
                    provider,
                    hostnames.clone(),
                )?)),
            (None, None) => builder.with_root_certificates(self.roots()),
        };
        let identity = self.material.as_ref().and_then(|m| m.identity.as_ref());
        Ok(match identity {
            Some((chain, key)) => {
                builder.with_client_auth_cert(chain.clone(), key.clone_key())?
            }
            None => builder.with_no_client_auth(),
        })
    }
}

impl TrustPolicy {
    fn roots(&self) -> RootCertStore {
        match &self.material {
            Some(material) => material.roots.clone(),
            None => platform_roots(),
        }
    }
}

pub(crate) fn default_client_config() -> Result<ClientConfig, TlsError> {
    TrustPolicy::default().client_config()
}

fn platform_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("unable to load platform certificate: {}", e);
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("loaded {} platform roots ({} ignored)", added, ignored);
    roots
}

/// Full chain verification, with name mismatches deferred to the policy's
/// hostname rule.
struct PolicyVerifier {
    inner: Arc<WebPkiServerVerifier>,
    hostnames: Arc<dyn HostnameVerifier>,
}

impl PolicyVerifier {
    fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        hostnames: Arc<dyn HostnameVerifier>,
    ) -> Result<Self, TlsError> {
        let inner =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
        Ok(PolicyVerifier { inner, hostnames })
    }
}

impl fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyVerifier").finish_non_exhaustive()
    }
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(err)) if is_name_mismatch(&err) => {
                let hostname = server_name.to_str();
                if self.hostnames.verify(&hostname, end_entity) {
                    debug!("accepted certificate for {} by hostname rule", hostname);
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(rustls::Error::InvalidCertificate(err))
                }
            }
            result => result,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
