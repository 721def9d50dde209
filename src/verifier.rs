//! 对响应与回调通知进行数字签名验证。
//! <https://pay.weixin.qq.com/wiki/doc/apiv3/wechatpay/wechatpay4_1.shtml>

use crate::error::{Result, WechatPayError};
use crate::platform_certificate::CertificateStore;
use crate::util::unix_timestamp;
use base64::prelude::*;
use bytes::{BufMut, BytesMut};
use chrono::Local;
use http::HeaderMap;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use std::time::Duration;

pub const WECHATPAY_SERIAL: &str = "Wechatpay-Serial";
pub const WECHATPAY_SIGNATURE: &str = "Wechatpay-Signature";
pub const WECHATPAY_TIMESTAMP: &str = "Wechatpay-Timestamp";
pub const WECHATPAY_NONCE: &str = "Wechatpay-Nonce";

/// 验签相关的 header。缺失的字段为 `None`，由 `ResponseVerifier` 决定报错的先后。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub serial_no: Option<String>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
}

impl SignatureHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self> {
        let get = |name: &str| -> Result<Option<String>> {
            match headers.get(name) {
                Some(v) => {
                    let v = v.to_str().map_err(|e| {
                        WechatPayError::DecodeFailed(format!("`{}` header: {}", name, e))
                    })?;
                    Ok(Some(v.to_string()))
                }
                None => Ok(None),
            }
        };

        Ok(SignatureHeaders {
            serial_no: get(WECHATPAY_SERIAL)?,
            signature: get(WECHATPAY_SIGNATURE)?,
            timestamp: get(WECHATPAY_TIMESTAMP)?,
            nonce: get(WECHATPAY_NONCE)?,
        })
    }
}

/// 验签原文：`timestamp\nnonce\nbody\n`。
pub fn build_message(timestamp: &str, nonce: &str, body: &[u8]) -> BytesMut {
    let mut msg = BytesMut::new();
    msg.put_slice(timestamp.as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(nonce.as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(body);
    msg.put_u8(b'\n');
    msg
}

/// 验证 SHA256withRSA 签名。`signature` 为 base64 编码。
pub fn verify_rsa_sha256(public_key: &RsaPublicKey, msg: &[u8], signature: &str) -> Result<()> {
    let signature = BASE64_STANDARD.decode(signature.as_bytes())?;
    let signature = Signature::try_from(signature.as_slice())
        .map_err(|e| WechatPayError::SignatureMismatch(e.to_string()))?;
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(msg, &signature)
        .map_err(|_| WechatPayError::SignatureMismatch("RSA-SHA256 verification failed".to_string()))
}

/// 响应签名验证器：按序列号选取平台证书，验证 SHA256withRSA 签名。
#[derive(Debug, Clone, Copy)]
pub struct ResponseVerifier<'a> {
    store: &'a CertificateStore,
    max_clock_skew: Option<Duration>,
}

impl<'a> ResponseVerifier<'a> {
    pub fn new(store: &'a CertificateStore) -> Self {
        ResponseVerifier {
            store,
            max_clock_skew: None,
        }
    }

    /// 拒绝时间戳与本地时间相差超过 `skew` 的响应或通知。
    pub fn max_clock_skew(mut self, skew: Option<Duration>) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// 验证签名。
    /// 先按序列号查找证书，找不到时无论签名是否存在都返回 `CertificateMismatch`。
    pub fn verify(&self, headers: &SignatureHeaders, body: &[u8]) -> Result<()> {
        let serial_no = headers
            .serial_no
            .as_deref()
            .ok_or(WechatPayError::MissingHeader(WECHATPAY_SERIAL))?;

        let certificate = self.store.get(serial_no).ok_or_else(|| {
            log::warn!("no platform certificate for serial_no {}", serial_no);
            WechatPayError::CertificateMismatch {
                serial_no: serial_no.to_string(),
            }
        })?;
        if !certificate.is_valid_at(Local::now()) {
            return Err(WechatPayError::CertificateExpired {
                serial_no: serial_no.to_string(),
            });
        }

        let signature = headers
            .signature
            .as_deref()
            .ok_or(WechatPayError::MissingHeader(WECHATPAY_SIGNATURE))?;
        let timestamp = headers
            .timestamp
            .as_deref()
            .ok_or(WechatPayError::MissingHeader(WECHATPAY_TIMESTAMP))?;
        let nonce = headers
            .nonce
            .as_deref()
            .ok_or(WechatPayError::MissingHeader(WECHATPAY_NONCE))?;

        if let Some(skew) = self.max_clock_skew {
            let ts: i64 = timestamp.parse().map_err(|_| {
                WechatPayError::DecodeFailed(format!("invalid timestamp: {}", timestamp))
            })?;
            if unix_timestamp().abs_diff(ts) > skew.as_secs() {
                return Err(WechatPayError::StaleTimestamp {
                    timestamp: ts,
                    skew_secs: skew.as_secs(),
                });
            }
        }

        let msg = build_message(timestamp, nonce, body);
        certificate.verify_signature(&msg, signature).map_err(|e| {
            log::warn!("response signature rejected: {}", e);
            e
        })
    }

    /// 直接从 `HeaderMap` 读取 header 并验证。
    pub fn verify_header_map(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        self.verify(&SignatureHeaders::from_header_map(headers)?, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::RsaPrivateKey;

    fn signed_headers(body: &[u8]) -> SignatureHeaders {
        let timestamp = unix_timestamp().to_string();
        let nonce = "593BEC0C930BF1AFEB40B4A08C8FB242".to_string();
        let signature = platform_sign(&timestamp, &nonce, body);
        SignatureHeaders {
            serial_no: Some(PLATFORM_SERIAL_NO.to_string()),
            signature: Some(signature),
            timestamp: Some(timestamp),
            nonce: Some(nonce),
        }
    }

    #[test]
    fn test_build_message() {
        assert_eq!(&build_message("123", "n", b"")[..], b"123\nn\n\n");
        assert_eq!(
            &build_message("1554208460", "nonce", br#"{"code":"OK"}"#)[..],
            b"1554208460\nnonce\n{\"code\":\"OK\"}\n"
        );
    }

    #[test]
    fn test_verify_ok() -> anyhow::Result<()> {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let body = br#"{"code":"SUCCESS"}"#;
        ResponseVerifier::new(&store).verify(&signed_headers(body), body)?;
        Ok(())
    }

    #[test]
    fn test_verify_tampered_body() {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let headers = signed_headers(br#"{"code":"SUCCESS"}"#);
        let err = ResponseVerifier::new(&store)
            .verify(&headers, br#"{"code":"FAIL"}"#)
            .unwrap_err();
        assert!(matches!(err, WechatPayError::SignatureMismatch(_)));
    }

    #[test]
    fn test_unknown_serial_is_certificate_mismatch() {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let body = b"{}";
        let mut headers = signed_headers(body);
        headers.serial_no = Some("UNKNOWN".to_string());
        // 签名本身有效，但序列号不匹配
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&headers, body),
            Err(WechatPayError::CertificateMismatch { serial_no }) if serial_no == "UNKNOWN"
        ));

        // 没有签名时也是 CertificateMismatch
        headers.signature = None;
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&headers, body),
            Err(WechatPayError::CertificateMismatch { .. })
        ));

        // 证书库为空
        let empty = CertificateStore::default();
        assert!(matches!(
            ResponseVerifier::new(&empty).verify(&signed_headers(body), body),
            Err(WechatPayError::CertificateMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_headers_are_distinct() {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let body = b"{}";

        let mut headers = signed_headers(body);
        headers.serial_no = None;
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&headers, body),
            Err(WechatPayError::MissingHeader(WECHATPAY_SERIAL))
        ));

        let mut headers = signed_headers(body);
        headers.signature = None;
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&headers, body),
            Err(WechatPayError::MissingHeader(WECHATPAY_SIGNATURE))
        ));

        let mut headers = signed_headers(body);
        headers.nonce = None;
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&headers, body),
            Err(WechatPayError::MissingHeader(WECHATPAY_NONCE))
        ));
    }

    #[test]
    fn test_expired_certificate_rejected() {
        let mut c = platform_certificate();
        c.expire_time = Local::now() - chrono::Duration::seconds(1);
        let store = CertificateStore::new(vec![c]);
        let body = b"{}";
        assert!(matches!(
            ResponseVerifier::new(&store).verify(&signed_headers(body), body),
            Err(WechatPayError::CertificateExpired { .. })
        ));
    }

    #[test]
    fn test_clock_skew() {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let body = b"{}";
        let verifier = ResponseVerifier::new(&store).max_clock_skew(Some(Duration::from_secs(300)));
        verifier.verify(&signed_headers(body), body).unwrap();

        let timestamp = (unix_timestamp() - 600).to_string();
        let headers = SignatureHeaders {
            signature: Some(platform_sign(&timestamp, "n", body)),
            timestamp: Some(timestamp),
            nonce: Some("n".to_string()),
            serial_no: Some(PLATFORM_SERIAL_NO.to_string()),
        };
        // 不限制时可通过
        ResponseVerifier::new(&store).verify(&headers, body).unwrap();
        assert!(matches!(
            verifier.verify(&headers, body),
            Err(WechatPayError::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_generated_key_pair_and_unrelated_key() -> anyhow::Result<()> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048)?;
        let public_key = RsaPublicKey::from(&private_key);

        let body = br#"{"code":"SUCCESS"}"#;
        let msg = build_message("1554208460", "nonce", body);
        let signature = SigningKey::<Sha256>::new(private_key).sign_with_rng(&mut rng, &msg);
        let signature = BASE64_STANDARD.encode(signature.to_bytes());

        verify_rsa_sha256(&public_key, &msg, &signature)?;
        assert!(matches!(
            verify_rsa_sha256(&platform_public_key(), &msg, &signature),
            Err(WechatPayError::SignatureMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_from_header_map() -> anyhow::Result<()> {
        let mut map = HeaderMap::new();
        map.insert(WECHATPAY_SERIAL, PLATFORM_SERIAL_NO.parse()?);
        map.insert(WECHATPAY_NONCE, "n".parse()?);
        let headers = SignatureHeaders::from_header_map(&map)?;
        assert_eq!(headers.serial_no.as_deref(), Some(PLATFORM_SERIAL_NO));
        assert_eq!(headers.nonce.as_deref(), Some("n"));
        assert_eq!(headers.signature, None);
        Ok(())
    }

    #[test]
    fn test_clock_skew_extreme_timestamps() {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let body = b"{}";
        let verifier = ResponseVerifier::new(&store).max_clock_skew(Some(Duration::from_secs(300)));
        for ts in [i64::MIN, i64::MAX, -1, 0] {
            let timestamp = ts.to_string();
            let headers = SignatureHeaders {
                signature: Some(platform_sign(&timestamp, "n", body)),
                timestamp: Some(timestamp),
                nonce: Some("n".to_string()),
                serial_no: Some(PLATFORM_SERIAL_NO.to_string()),
            };
            match verifier.verify(&headers, body) {
                Err(WechatPayError::StaleTimestamp { timestamp, skew_secs }) => {
                    assert_eq!(timestamp, ts);
                    assert_eq!(skew_secs, 300);
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    fn header_map(headers: &SignatureHeaders) -> anyhow::Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in [
            (WECHATPAY_SERIAL, &headers.serial_no),
            (WECHATPAY_SIGNATURE, &headers.signature),
            (WECHATPAY_TIMESTAMP, &headers.timestamp),
            (WECHATPAY_NONCE, &headers.nonce),
        ] {
            if let Some(v) = value {
                map.insert(name, v.parse()?);
            }
        }
        Ok(map)
    }

    #[test]
    fn test_verify_header_map() -> anyhow::Result<()> {
        let store = CertificateStore::new(vec![platform_certificate()]);
        let verifier = ResponseVerifier::new(&store);
        let body = br#"{"code_url":"weixin://wxpay/bizpayurl?pr=p4lpSuKzz"}"#;
        let headers = signed_headers(body);

        verifier.verify_header_map(&header_map(&headers)?, body)?;
        assert!(matches!(
            verifier.verify_header_map(&header_map(&headers)?, b"{}"),
            Err(WechatPayError::SignatureMismatch(_))
        ));

        let mut map = header_map(&headers)?;
        map.remove(WECHATPAY_NONCE);
        assert!(matches!(
            verifier.verify_header_map(&map, body),
            Err(WechatPayError::MissingHeader(WECHATPAY_NONCE))
        ));

        let mut map = header_map(&headers)?;
        map.insert(WECHATPAY_SERIAL, "UNKNOWN".parse()?);
        assert!(matches!(
            verifier.verify_header_map(&map, body),
            Err(WechatPayError::CertificateMismatch { .. })
        ));

        // 非 ASCII 的 header 值
        let mut map = header_map(&headers)?;
        map.insert(WECHATPAY_NONCE, http::HeaderValue::from_bytes(&[0xe4, 0xb8, 0xad])?);
        assert!(matches!(
            verifier.verify_header_map(&map, body),
            Err(WechatPayError::DecodeFailed(_))
        ));
        Ok(())
    }
}
