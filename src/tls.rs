use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// Build a TLS acceptor from PEM files. Both paths or neither.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both COVERS_TLS_CERT and COVERS_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {cert_path}"),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_path_disables_tls() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_rejected() {
        let err = load_tls_acceptor(Some("cert.pem"), None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("COVERS_TLS_KEY"));

        let err = load_tls_acceptor(None, Some("key.pem")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_cert_file_is_io_error() {
        let dir = std::env::temp_dir().join("covers_test_tls");
        let err = load_tls_acceptor(
            Some(dir.join("nope.pem").to_str().unwrap()),
            Some(dir.join("nope.key").to_str().unwrap()),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_cert_file_is_rejected() {
        let dir = std::env::temp_dir().join("covers_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("empty.pem");
        std::fs::write(&cert, b"").unwrap();
        let err = load_tls_acceptor(cert.to_str(), Some("unused.key")).err().unwrap();
        assert!(err.to_string().contains("no certificates"));
    }
}
