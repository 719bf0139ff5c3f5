use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// RFC 3986 unreserved characters pass through, everything else is escaped
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Mints short-lived write URLs for one object key
pub trait UploadUrlIssuer: Send + Sync {
    fn issue(&self, file_key: &str, content_type: &str, expires_in: Duration) -> Result<String>;
}

/// Fields of an issued URL that the signature covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUpload<'a> {
    pub file_key: &'a str,
    pub content_type: &'a str,
    /// Unix seconds
    pub expires: i64,
    pub nonce: &'a str,
}

/// Issues URLs against a storage gateway that shares the signing secret.
///
/// Each URL carries `content-type`, `expires` (unix seconds), `nonce` and an
/// HMAC-SHA256 `signature` over `PUT`, the object path and those three values.
/// The gateway recomputes it with [`GatewayUrlIssuer::verify`].
pub struct GatewayUrlIssuer {
    gateway_url: String,
    bucket: String,
    secret: Vec<u8>,
}

impl GatewayUrlIssuer {
    pub fn new(
        gateway_url: impl Into<String>,
        bucket: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let gateway_url = gateway_url.into();
        let bucket = bucket.into();
        let secret = secret.as_ref().to_vec();

        if !(gateway_url.starts_with("http://") || gateway_url.starts_with("https://")) {
            bail!("Gateway URL must be http(s): {}", gateway_url);
        }
        if bucket.is_empty() || bucket.contains('/') {
            bail!("Invalid bucket name: {:?}", bucket);
        }
        if secret.is_empty() {
            bail!("upload.signing_secret must be set (VOICE_CLIP__UPLOAD__SIGNING_SECRET)");
        }

        Ok(Self {
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            bucket,
            secret,
        })
    }

    fn mac(&self, upload: &SignedUpload<'_>) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| anyhow!("Invalid signing secret"))?;
        let canonical = format!(
            "PUT\n/{}/{}\n{}\n{}\n{}",
            self.bucket, upload.file_key, upload.content_type, upload.expires, upload.nonce
        );
        mac.update(canonical.as_bytes());
        Ok(mac)
    }

    /// Hex signature for the given fields
    pub fn sign(&self, upload: &SignedUpload<'_>) -> Result<String> {
        Ok(hex::encode(self.mac(upload)?.finalize().into_bytes()))
    }

    /// Check a presented signature at unix time `now`; expired URLs never verify
    pub fn verify(&self, upload: &SignedUpload<'_>, signature: &str, now: i64) -> bool {
        if now > upload.expires {
            return false;
        }
        let Ok(presented) = hex::decode(signature) else {
            return false;
        };
        match self.mac(upload) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }
}

impl UploadUrlIssuer for GatewayUrlIssuer {
    fn issue(&self, file_key: &str, content_type: &str, expires_in: Duration) -> Result<String> {
        let expires_in = chrono::Duration::from_std(expires_in)?;
        let nonce = Uuid::new_v4().simple().to_string();
        let upload = SignedUpload {
            file_key,
            content_type,
            expires: (Utc::now() + expires_in).timestamp(),
            nonce: &nonce,
        };
        let signature = self.sign(&upload)?;

        Ok(format!(
            "{}/{}/{}?content-type={}&expires={}&nonce={}&signature={}",
            self.gateway_url,
            self.bucket,
            utf8_percent_encode(file_key, COMPONENT),
            utf8_percent_encode(content_type, COMPONENT),
            upload.expires,
            nonce,
            signature
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|p| p.strip_prefix(name).and_then(|p| p.strip_prefix('=')))
            .unwrap()
    }

    #[test]
    fn test_issue_url_shape() {
        let issuer = GatewayUrlIssuer::new("https://storage.example.com/", "clips", SECRET).unwrap();
        let before = Utc::now().timestamp();
        let url = issuer
            .issue("key.wav", "audio/wav", Duration::from_secs(300))
            .unwrap();

        assert!(url.starts_with("https://storage.example.com/clips/key.wav?"));
        assert_eq!(query_param(&url, "content-type"), "audio%2Fwav");

        let expires: i64 = query_param(&url, "expires").parse().unwrap();
        assert!(expires >= before + 300 && expires <= before + 301);
        assert_eq!(query_param(&url, "signature").len(), 64);
    }

    #[test]
    fn test_issued_signature_verifies() {
        let issuer = GatewayUrlIssuer::new("http://localhost:9000", "clips", SECRET).unwrap();
        let url = issuer
            .issue("key.wav", "audio/wav", Duration::from_secs(300))
            .unwrap();

        let upload = SignedUpload {
            file_key: "key.wav",
            content_type: "audio/wav",
            expires: query_param(&url, "expires").parse().unwrap(),
            nonce: query_param(&url, "nonce"),
        };
        let signature = query_param(&url, "signature");
        let now = Utc::now().timestamp();

        assert!(issuer.verify(&upload, signature, now));
        assert!(!issuer.verify(&upload, signature, upload.expires + 1));
    }

    #[test]
    fn test_tampered_fields_fail_verification() {
        let issuer = GatewayUrlIssuer::new("http://localhost:9000", "clips", SECRET).unwrap();
        let upload = SignedUpload {
            file_key: "key.wav",
            content_type: "audio/wav",
            expires: 1_000,
            nonce: "abc",
        };
        let signature = issuer.sign(&upload).unwrap();

        let extended = SignedUpload {
            expires: 9_999,
            ..upload.clone()
        };
        assert_ne!(issuer.sign(&extended).unwrap(), signature);
        assert!(!issuer.verify(&extended, &signature, 0));

        let retyped = SignedUpload {
            content_type: "text/html",
            ..upload.clone()
        };
        assert!(!issuer.verify(&retyped, &signature, 0));

        let other_key = SignedUpload {
            file_key: "other.wav",
            ..upload.clone()
        };
        assert!(!issuer.verify(&other_key, &signature, 0));

        assert!(issuer.verify(&upload, &signature, 0));
        assert!(!issuer.verify(&upload, "not-hex", 0));
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let upload = SignedUpload {
            file_key: "key.wav",
            content_type: "audio/wav",
            expires: 1_000,
            nonce: "abc",
        };
        let a = GatewayUrlIssuer::new("http://host", "clips", "one").unwrap();
        let b = GatewayUrlIssuer::new("http://host", "clips", "two").unwrap();

        let signature = a.sign(&upload).unwrap();
        assert!(!b.verify(&upload, &signature, 0));
    }

    #[test]
    fn test_each_url_has_unique_nonce() {
        let issuer = GatewayUrlIssuer::new("http://localhost:9000", "clips", SECRET).unwrap();
        let a = issuer.issue("k", "audio/wav", Duration::from_secs(1)).unwrap();
        let b = issuer.issue("k", "audio/wav", Duration::from_secs(1)).unwrap();
        assert_ne!(query_param(&a, "nonce"), query_param(&b, "nonce"));
    }

    #[test]
    fn test_key_is_percent_encoded() {
        let issuer = GatewayUrlIssuer::new("http://localhost:9000", "clips", SECRET).unwrap();
        let url = issuer
            .issue("a b+c.wav", "audio/wav", Duration::from_secs(1))
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/clips/a%20b%2Bc.wav?"));
    }

    #[test]
    fn test_rejects_bad_settings() {
        assert!(GatewayUrlIssuer::new("ftp://host", "clips", SECRET).is_err());
        assert!(GatewayUrlIssuer::new("http://host", "", SECRET).is_err());
        assert!(GatewayUrlIssuer::new("http://host", "a/b", SECRET).is_err());
        assert!(GatewayUrlIssuer::new("http://host", "clips", "").is_err());
    }
}
