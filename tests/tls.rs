use std::{
    io::{Read, Write},
    net::SocketAddr,
    sync::Arc,
};

use hyper::body::Bytes;
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    DigitallySignedStruct, ServerConfig, ServerConnection, SignatureScheme, StreamOwned,
};
use stream_relay::{
    Headers, HttpTransport, Transport, TrustMaterial, TrustPolicy, UpstreamError,
    UpstreamRequest,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use url::Url;

const CA: &[u8] = include_bytes!("data/ca.pem");
const MEDIA_CERT: &[u8] = include_bytes!("data/media.pem");
const MEDIA_KEY: &[u8] = include_bytes!("data/media.key");
const SELF_SIGNED_CERT: &[u8] = include_bytes!("data/self-signed.pem");
const SELF_SIGNED_KEY: &[u8] = include_bytes!("data/self-signed.key");

fn certs(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// HTTPS origin on a plain thread, answering every request with `secure`.
fn spawn_tls_origin(cert: &[u8], key: &[u8]) -> SocketAddr {
    let key = rustls_pemfile::private_key(&mut &key[..]).unwrap().unwrap();
    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs(cert), key)
        .unwrap();
    let config = Arc::new(config);
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(tcp) = stream else {
                break;
            };
            let config = config.clone();
            std::thread::spawn(move || {
                let Ok(conn) = ServerConnection::new(config) else {
                    return;
                };
                let mut tls = StreamOwned::new(conn, tcp);
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match tls.read(&mut byte) {
                        Ok(1) => head.push(byte[0]),
                        _ => return,
                    }
                }
                let reply = b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\nsecure";
                tls.write_all(reply).ok();
                tls.conn.send_close_notify();
                tls.flush().ok();
            });
        }
    });
    addr
}

async fn get(policy: TrustPolicy, url: &str) -> Result<Vec<u8>, UpstreamError> {
    let transport = HttpTransport::new(Some(&policy)).unwrap();
    let response = transport
        .execute(UpstreamRequest {
            method: "GET".to_string(),
            url: Url::parse(url).unwrap(),
            headers: Headers::new(),
            body: Bytes::new(),
        })
        .await?;
    assert_eq!(response.status, 200);
    let mut body = Vec::new();
    let mut reader = response.body;
    reader.read_to_end(&mut body).await.unwrap();
    Ok(body)
}

/// Accepts exactly one certificate, chain or not.
#[derive(Debug)]
struct PinnedCertificate {
    pinned: CertificateDer<'static>,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertificate {
    fn new(pem: &[u8]) -> Self {
        PinnedCertificate {
            pinned: certs(pem).remove(0),
            provider: Arc::new(ring::default_provider()),
        }
    }
}

impl ServerCertVerifier for PinnedCertificate {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("certificate is not pinned".to_string()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
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

fn custom_ca() -> TrustPolicy {
    TrustPolicy::new().with_material(TrustMaterial::from_pem(CA, None).unwrap())
}

#[tokio::test]
async fn hostname_rule_accepts_mismatched_name() {
    let origin = spawn_tls_origin(MEDIA_CERT, MEDIA_KEY);
    let url = format!("https://{}/track", origin);

    assert!(get(custom_ca(), &url).await.is_err());

    let policy = custom_ca()
        .with_hostname_verifier(|host: &str, _: &CertificateDer<'_>| host == "127.0.0.1");
    assert_eq!(get(policy, &url).await.unwrap(), b"secure");
}

#[tokio::test]
async fn hostname_rule_can_refuse() {
    let origin = spawn_tls_origin(MEDIA_CERT, MEDIA_KEY);
    let policy = custom_ca().with_hostname_verifier(|_: &str, _: &CertificateDer<'_>| false);
    assert!(matches!(
        get(policy, &format!("https://{}/track", origin)).await,
        Err(UpstreamError::Transport(_))
    ));
}

#[tokio::test]
async fn caller_verifier_trusts_self_signed_server() {
    let origin = spawn_tls_origin(SELF_SIGNED_CERT, SELF_SIGNED_KEY);
    let url = format!("https://{}/track", origin);

    let as_root = TrustPolicy::new()
        .with_material(TrustMaterial::from_pem(SELF_SIGNED_CERT, None).unwrap());
    assert!(get(as_root, &url).await.is_err());

    let pinned = PinnedCertificate::new(SELF_SIGNED_CERT);
    let pinned = TrustPolicy::new().with_verifier(Arc::new(pinned));
    assert_eq!(get(pinned, &url).await.unwrap(), b"secure");
}

#[tokio::test]
async fn policy_is_not_consulted_for_plain_http() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap_or(0) == 0 {
                return;
            }
            head.push(byte[0]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nplain")
            .await
            .ok();
    });

    let refuse_all = custom_ca()
        .with_hostname_verifier(|_: &str, _: &CertificateDer<'_>| false)
        .with_verifier(Arc::new(PinnedCertificate::new(SELF_SIGNED_CERT)));
    let body = get(refuse_all, &format!("http://{}/track", origin))
        .await
        .unwrap();
    assert_eq!(body, b"plain");
}
