//! HMAC-SHA256 signed tokens.
//!
//! Two formats share one signer:
//! - tracking tokens `"<delivery_id>.<order_id>.<issued_at>.<sig>"`, handed to customers
//! - access tokens `"<role>.<user_id>.<sig>"`, issued elsewhere and only verified here

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::ports::{Principal, Role, TokenVerifier};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature does not match")]
    BadSignature,
}

#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("hmac accepts keys of any length")
    }

    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, payload: &str, signature_hex: &str) -> Result<(), TokenError> {
        let signature = hex::decode(signature_hex).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)
    }

    /// Splits `token` at its last dot and checks the signature over the prefix.
    fn open<'a>(&self, token: &'a str) -> Result<&'a str, TokenError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        self.verify(payload, signature)?;
        Ok(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingClaims {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl TrackingClaims {
    pub fn new(delivery_id: Uuid, order_id: Uuid) -> Self {
        Self {
            delivery_id,
            order_id,
            issued_at: Utc::now(),
        }
    }

    pub fn encode(&self, signer: &TokenSigner) -> String {
        let payload = format!(
            "{}.{}.{}",
            self.delivery_id.simple(),
            self.order_id.simple(),
            self.issued_at.timestamp()
        );
        let signature = signer.sign(&payload);
        format!("{payload}.{signature}")
    }

    pub fn decode(token: &str, signer: &TokenSigner) -> Result<Self, TokenError> {
        let payload = signer.open(token)?;
        let mut parts = payload.split('.');

        let (Some(delivery), Some(order), Some(issued), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let issued_secs: i64 = issued.parse().map_err(|_| TokenError::Malformed)?;

        Ok(Self {
            delivery_id: Uuid::parse_str(delivery).map_err(|_| TokenError::Malformed)?,
            order_id: Uuid::parse_str(order).map_err(|_| TokenError::Malformed)?,
            issued_at: Utc
                .timestamp_opt(issued_secs, 0)
                .single()
                .ok_or(TokenError::Malformed)?,
        })
    }
}

/// Verifies bearer tokens minted by the account service with a shared secret.
pub struct HmacTokenVerifier {
    signer: TokenSigner,
}

impl HmacTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            signer: TokenSigner::new(secret),
        }
    }

    pub fn issue(&self, principal: &Principal) -> String {
        let payload = format!("{}.{}", principal.role.as_str(), principal.user_id.simple());
        let signature = self.signer.sign(&payload);
        format!("{payload}.{signature}")
    }

    fn decode(&self, token: &str) -> Result<Principal, TokenError> {
        let payload = self.signer.open(token)?;
        let (role, user_id) = payload.split_once('.').ok_or(TokenError::Malformed)?;

        Ok(Principal {
            role: role.parse().map_err(|_| TokenError::Malformed)?,
            user_id: Uuid::parse_str(user_id).map_err(|_| TokenError::Malformed)?,
        })
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Option<Principal> {
        self.decode(token).ok()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn tracking_token_survives_encoding() {
        let signer = TokenSigner::new("secret");
        let claims = TrackingClaims::new(Uuid::from_u128(42), Uuid::from_u128(7));

        let token = claims.encode(&signer);
        let decoded = TrackingClaims::decode(&token, &signer).unwrap();

        assert_eq!(decoded.delivery_id, claims.delivery_id);
        assert_eq!(decoded.order_id, claims.order_id);
        assert_eq!(decoded.issued_at.timestamp(), claims.issued_at.timestamp());
    }

    #[test]
    fn tracking_token_rejects_other_secret() {
        let claims = TrackingClaims::new(Uuid::from_u128(42), Uuid::from_u128(7));
        let token = claims.encode(&TokenSigner::new("secret"));

        assert_eq!(
            TrackingClaims::decode(&token, &TokenSigner::new("other")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn tracking_token_rejects_swapped_delivery() {
        let signer = TokenSigner::new("secret");
        let token = TrackingClaims::new(Uuid::from_u128(42), Uuid::from_u128(7)).encode(&signer);
        let forged = token.replacen(
            &Uuid::from_u128(42).simple().to_string(),
            &Uuid::from_u128(43).simple().to_string(),
            1,
        );

        assert_eq!(
            TrackingClaims::decode(&forged, &signer),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let signer = TokenSigner::new("secret");
        assert_eq!(
            TrackingClaims::decode("nodots", &signer),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            TrackingClaims::decode("a.b.c.zz", &signer),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn access_token_round_trip() {
        let verifier = HmacTokenVerifier::new("access");
        let principal = Principal {
            user_id: Uuid::from_u128(9),
            role: Role::Courier,
        };

        let token = verifier.issue(&principal);
        assert_eq!(verifier.verify(&token), Some(principal));
        assert_eq!(HmacTokenVerifier::new("other").verify(&token), None);
    }
}
