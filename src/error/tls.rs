use thiserror::Error;
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Unable to read PEM data: {0}")]
    Pem(#[from] std::io::Error),
    #[error("No certificates found in PEM data")]
    NoCertificates,
    #[error("No private key found in PEM data")]
    NoPrivateKey,
    #[error("Invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
    #[error("Unable to build certificate verifier: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
}
