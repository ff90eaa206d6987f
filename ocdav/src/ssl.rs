// Copyright 2023 Hugo Osvaldo Barrera
//
// SPDX-License-Identifier: EUPL-1.2

//! Interactive certificate trust.
//!
//! Verification delegates to the regular WebPKI checks against the system
//! CA set. When those fail, a human-readable description of the problem is
//! put to the host's prompt; the chain is accepted for this session iff
//! the reply starts with `y`.

use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, Error as TlsError, RootCertStore, ServerName};
use sha2::{Digest, Sha256};

use crate::auth::AuthPrompt;

pub(crate) struct InteractiveVerifier {
    inner: WebPkiVerifier,
    prompt: Option<Arc<dyn AuthPrompt>>,
}

impl InteractiveVerifier {
    /// Builds a verifier trusting the system default CA set.
    pub(crate) fn new(prompt: Option<Arc<dyn AuthPrompt>>) -> std::io::Result<InteractiveVerifier> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs()? {
            // Individual unparsable platform certs are skipped, not fatal.
            roots.add_parsable_certificates(&[cert.0]);
        }

        Ok(InteractiveVerifier {
            inner: WebPkiVerifier::new(roots, None),
            prompt,
        })
    }
}

impl ServerCertVerifier for InteractiveVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let verdict = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        );

        let error = match verdict {
            Ok(ok) => return Ok(ok),
            Err(error) => error,
        };

        let problem = describe_problem(&error, end_entity, intermediates, server_name);
        if let Some(cb) = &self.prompt {
            log::debug!("Asking the host about a certificate problem: {error}");
            if let Some(reply) = cb.prompt(&problem, true) {
                if reply.starts_with('y') || reply.starts_with('Y') {
                    return Ok(ServerCertVerified::assertion());
                }
                log::debug!("Host declined the certificate chain: {reply}");
            }
        }

        Err(error)
    }
}

/// Builds the user-facing text for a failed verification.
fn describe_problem(
    error: &TlsError,
    end_entity: &Certificate,
    intermediates: &[Certificate],
    server_name: &ServerName,
) -> String {
    let mut problem = String::from("There are problems with the SSL certificate:\n");

    // WebPKI failures surface with their cause name embedded in the
    // message; match on those names to keep the text specific.
    let cause = error.to_string();
    let mut known = false;
    for (token, line) in [
        ("CertNotValidYet", " * The certificate is not yet valid.\n"),
        ("CertExpired", " * The certificate has expired.\n"),
        ("UnknownIssuer", " * The certificate is not trusted!\n"),
        (
            "CertNotValidForName",
            " * The hostname for which the certificate was issued does not match the hostname of the server.\n",
        ),
        (
            "CaUsedAsEndEntity",
            " * The certificate chain contained a certificate other than the server cert.\n",
        ),
        ("CertRevoked", " * The server certificate has been revoked by the issuing authority.\n"),
    ] {
        if cause.contains(token) {
            problem.push_str(line);
            known = true;
        }
    }
    if !known {
        problem.push_str(&format!(" * The certificate could not be verified: {cause}.\n"));
    }

    problem.push_str(&format!("Server hostname: {server_name:?}\n"));
    problem.push_str(&format!(
        "Certificate fingerprint: {}\n",
        fingerprint(end_entity)
    ));
    for signer in intermediates {
        problem.push_str(&format!("Signed by: {}\n", fingerprint(signer)));
    }

    problem.push_str(
        "Do you want to accept the certificate chain anyway?\nAnswer yes to do so and take the risk: ",
    );
    problem
}

fn fingerprint(cert: &Certificate) -> String {
    let digest = Sha256::digest(&cert.0);
    digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use rustls::{Certificate, Error as TlsError, ServerName};

    use super::describe_problem;

    #[test]
    fn test_problem_text_names_the_cause() {
        let error = TlsError::InvalidCertificateData(
            "invalid peer certificate: CertExpired".to_string(),
        );
        let name = ServerName::try_from("example.com").unwrap();
        let text = describe_problem(&error, &Certificate(vec![0x01, 0x02]), &[], &name);

        assert!(text.starts_with("There are problems with the SSL certificate:\n"));
        assert!(text.contains("has expired"));
        assert!(text.contains("Certificate fingerprint: "));
        assert!(text.ends_with("take the risk: "));
    }

    #[test]
    fn test_unrecognised_cause_is_reported_verbatim() {
        let error = TlsError::General("something odd".to_string());
        let name = ServerName::try_from("example.com").unwrap();
        let text = describe_problem(&error, &Certificate(vec![0x01]), &[], &name);

        assert!(text.contains("could not be verified"));
        assert!(text.contains("something odd"));
    }
}
