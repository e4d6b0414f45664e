//! Throwaway certificate authorities for tests

use explainer_core::{Identity, TrustStore};
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};

pub(crate) struct Pki {
    ca_cert: Certificate,
    ca_key: KeyPair,
}

impl Pki {
    pub(crate) fn new() -> Self {
        Self::named("mTLS Explainer Test Root")
    }

    pub(crate) fn named(common_name: &str) -> Self {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, common_name);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = params.self_signed(&ca_key).unwrap();
        Self { ca_cert, ca_key }
    }

    pub(crate) fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    pub(crate) fn trust_store(&self) -> TrustStore {
        TrustStore::from_pem(self.ca_pem().as_bytes())
    }

    /// Leaf certificate and key PEM signed by this authority
    pub(crate) fn issue(&self, names: &[&str]) -> (String, String) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names.clone()).unwrap();
        params.distinguished_name.push(DnType::CommonName, names[0].as_str());
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    pub(crate) fn server_identity(&self) -> Identity {
        let (cert, key) = self.issue(&["localhost", "127.0.0.1"]);
        Identity::from_pem(cert.as_bytes(), key.as_bytes()).unwrap()
    }

    pub(crate) fn client_identity(&self) -> Identity {
        let (cert, key) = self.issue(&["client.localhost"]);
        Identity::from_pem(cert.as_bytes(), key.as_bytes()).unwrap()
    }
}
