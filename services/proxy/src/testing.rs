//! Fixtures shared by the unit tests.

use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use uuid::Uuid;

use crate::auth::{SessionVerifier, VerifiedIdentity};
use crate::context::{ProxyContext, ProxySettings};
use crate::error::AuthError;
use crate::keys::ServerKey;
use crate::proxy::Registry;

/// Key generation is slow; every test shares one key.
static KEY: LazyLock<Arc<ServerKey>> =
    LazyLock::new(|| Arc::new(ServerKey::generate().expect("generate test key")));

/// Verifier that answers every login the same way.
pub(crate) struct StaticVerifier {
    outcome: Result<VerifiedIdentity, u16>,
}

impl StaticVerifier {
    pub(crate) fn accept(name: &str) -> Self {
        Self {
            outcome: Ok(VerifiedIdentity {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
                properties: Vec::new(),
            }),
        }
    }

    pub(crate) fn reject(status: u16) -> Self {
        Self {
            outcome: Err(status),
        }
    }
}

#[async_trait]
impl SessionVerifier for StaticVerifier {
    async fn has_joined(
        &self,
        _username: &str,
        _server_hash: &str,
        _client_ip: Option<IpAddr>,
    ) -> Result<VerifiedIdentity, AuthError> {
        match &self.outcome {
            Ok(identity) => Ok(identity.clone()),
            Err(status) => Err(AuthError::Rejected { status: *status }),
        }
    }
}

/// Context with no backend groups and default settings.
pub(crate) fn context(verifier: StaticVerifier) -> ProxyContext {
    ProxyContext::new(
        Arc::new(Registry::new()),
        Arc::clone(&KEY),
        Arc::new(verifier),
        ProxySettings::default(),
    )
}

/// Encrypt `data` to the context's public key, as a client would.
pub(crate) fn encrypt_for(ctx: &ProxyContext, data: &[u8]) -> Vec<u8> {
    let public = RsaPublicKey::from_public_key_der(ctx.server_key.public_key_der()).unwrap();
    public
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)
        .unwrap()
}
