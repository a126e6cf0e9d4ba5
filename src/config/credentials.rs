use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose, Engine as _};
use x509_parser::pem::{parse_x509_pem, Pem};

use super::{ClusterEntry, Material, UserIdentity};
use crate::error::{Error, Result};

const PEM_HEADER: &[u8] = b"-----BEGIN";

/// A client certificate chain and its private key, both PEM encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    certificate_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl ClientCertificate {
    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// Certificate chain followed by the key, the layout TLS identities are usually built from.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.certificate_pem.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key_pem);
        pem
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("certificate_pem", &String::from_utf8_lossy(&self.certificate_pem))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// One or more PEM encoded CA certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertificate {
    pem: Vec<u8>,
    der: Vec<Vec<u8>>,
}

impl CaCertificate {
    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    /// DER encoding of each certificate in the bundle, in file order.
    pub fn der_certificates(&self) -> &[Vec<u8>] {
        &self.der
    }
}

impl UserIdentity {
    /// Resolves the client certificate and key.
    ///
    /// Returns `Ok(None)` when the user declares neither; declaring only one
    /// half of the pair is an error.
    pub fn resolve_client_certificate(
        &self,
        base_dir: Option<&Path>,
    ) -> Result<Option<ClientCertificate>> {
        let subject = format!("client certificate of user '{}'", self.name);
        let certificate = read_material(&self.client_certificate, base_dir, &subject)?;
        let key = read_material(&self.client_key, base_dir, &subject)?;

        let (certificate, key) = match (certificate, key) {
            (None, None) => return Ok(None),
            (Some(certificate), Some(key)) => (certificate, key),
            (Some(_), None) => {
                return Err(Error::credential(subject, "certificate has no client key"))
            }
            (None, Some(_)) => {
                return Err(Error::credential(subject, "client key has no certificate"))
            }
        };

        let invalid = |reason: String| Error::credential(&subject, reason);
        let certificate_pem = unwrap_pem(certificate.bytes).map_err(invalid)?;
        certificates_in(&certificate_pem).map_err(invalid)?;

        let key_pem = unwrap_pem(key.bytes).map_err(invalid)?;
        check_private_key(&key_pem).map_err(invalid)?;

        Ok(Some(ClientCertificate {
            certificate_pem,
            key_pem,
        }))
    }

    /// Resolves the bearer token, inline `token` first, then `tokenFile`.
    pub fn resolve_bearer_token(&self, base_dir: Option<&Path>) -> Result<Option<String>> {
        let subject = format!("bearer token of user '{}'", self.name);
        let Some(material) = read_material(&self.token, base_dir, &subject)? else {
            if let Some(exec) = &self.exec {
                log::warn!(
                    "user '{}' uses exec credential plugin '{}', which is not supported; continuing without a token",
                    self.name,
                    exec.command
                );
            }
            return Ok(None);
        };

        let token = String::from_utf8(material.bytes)
            .map_err(|_| Error::credential(&subject, "token is not valid UTF-8"))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::credential(subject, "token is empty"));
        }
        Ok(Some(token.to_owned()))
    }
}

impl ClusterEntry {
    /// Resolves the certificate authority bundle, if the cluster declares one.
    pub fn resolve_ca_certificate(&self, base_dir: Option<&Path>) -> Result<Option<CaCertificate>> {
        let subject = format!("certificate authority of cluster '{}'", self.name);
        let Some(material) = read_material(&self.certificate_authority, base_dir, &subject)? else {
            return Ok(None);
        };

        let invalid = |reason: String| Error::credential(&subject, reason);
        let pem = unwrap_pem(material.bytes).map_err(invalid)?;
        let der = certificates_in(&pem).map_err(invalid)?;
        Ok(Some(CaCertificate { pem, der }))
    }
}

struct RawMaterial {
    bytes: Vec<u8>,
}

fn read_material(
    material: &Material,
    base_dir: Option<&Path>,
    subject: &str,
) -> Result<Option<RawMaterial>> {
    if let Some(data) = &material.data {
        return Ok(Some(RawMaterial {
            bytes: data.as_bytes().to_vec(),
        }));
    }

    let Some(file) = &material.file else {
        return Ok(None);
    };
    let path = anchor(file, base_dir);
    let bytes = fs::read(&path)
        .map_err(|err| Error::credential(subject, format!("{}: {err}", path.display())))?;
    Ok(Some(RawMaterial { bytes }))
}

fn anchor(file: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base_dir) if file.is_relative() => base_dir.join(file),
        _ => file.to_path_buf(),
    }
}

/// Accepts PEM as-is and transparently decodes base64-wrapped PEM.
fn unwrap_pem(bytes: Vec<u8>) -> Result<Vec<u8>, String> {
    if contains_pem(&bytes) {
        return Ok(bytes);
    }

    let compact: Vec<u8> = bytes
        .into_iter()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let decoded = general_purpose::STANDARD
        .decode(&compact)
        .map_err(|err| format!("material is neither PEM nor base64: {err}"))?;
    if contains_pem(&decoded) {
        Ok(decoded)
    } else {
        Err("decoded material contains no PEM block".into())
    }
}

fn contains_pem(bytes: &[u8]) -> bool {
    bytes
        .windows(PEM_HEADER.len())
        .any(|window| window == PEM_HEADER)
}

fn pem_blocks(mut input: &[u8]) -> Result<Vec<Pem>, String> {
    let mut blocks = Vec::new();
    while contains_pem(input) {
        let (rest, pem) = parse_x509_pem(input).map_err(|err| format!("malformed PEM: {err:?}"))?;
        blocks.push(pem);
        input = rest;
    }
    Ok(blocks)
}

fn certificates_in(pem: &[u8]) -> Result<Vec<Vec<u8>>, String> {
    let mut der = Vec::new();
    for block in pem_blocks(pem)? {
        if block.label != "CERTIFICATE" {
            continue;
        }
        block
            .parse_x509()
            .map_err(|err| format!("malformed certificate: {err:?}"))?;
        der.push(block.contents);
    }

    if der.is_empty() {
        return Err("no CERTIFICATE block found".into());
    }
    Ok(der)
}

fn check_private_key(pem: &[u8]) -> Result<(), String> {
    let found = pem_blocks(pem)?
        .iter()
        .any(|block| block.label.ends_with("PRIVATE KEY") && !block.contents.is_empty());
    if found {
        Ok(())
    } else {
        Err("no PRIVATE KEY block found".into())
    }
}
