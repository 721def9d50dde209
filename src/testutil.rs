//! 测试用的密钥、证书与假的传输层。
//! `testdata/` 下的密钥与自签名证书仅用于测试。

use crate::credential::{parse_private_key_pem, MchCredential};
use crate::error::Result;
use crate::platform_certificate::PlatformCertificate;
use crate::transport::HttpTransport;
use crate::util::{generate_nonce_str, unix_timestamp, DATETIME_FORMAT};
use crate::verifier::{build_message, SignatureHeaders};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::{Request, Response};
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;

pub(crate) const MCH_PRIVATE_KEY_PEM: &str = include_str!("testdata/mch_private_key.pem");
pub(crate) const PLATFORM_PRIVATE_KEY_PEM: &str = include_str!("testdata/platform_private_key.pem");
pub(crate) const PLATFORM_CERTIFICATE_PEM: &str = include_str!("testdata/platform_certificate.pem");
pub(crate) const PLATFORM_SERIAL_NO: &str = "5157F09EFDC096DE15EBE81A47057A7232F4B8E3";

pub(crate) const API_V3_KEY: &str = "0123456789abcdef0123456789abcdef";
pub(crate) const API_KEY: &str = "secretkey";
pub(crate) const TEST_BASE_URL: &str = "https://api.mch.weixin.qq.com";

pub(crate) fn test_credential() -> MchCredential {
    MchCredential::builder()
        .mch_id("1900000001")
        .app_id("wx1")
        .mch_certificate_serial_no("MCHSERIAL001")
        .mch_api_v3_key(API_V3_KEY)
        .mch_api_key(API_KEY)
        .mch_rsa_private_key_pem(MCH_PRIVATE_KEY_PEM)
        .unwrap()
        .build()
        .unwrap()
}

pub(crate) fn mch_public_key() -> RsaPublicKey {
    RsaPublicKey::from(&parse_private_key_pem(MCH_PRIVATE_KEY_PEM).unwrap())
}

fn platform_private_key() -> RsaPrivateKey {
    parse_private_key_pem(PLATFORM_PRIVATE_KEY_PEM).unwrap()
}

pub(crate) fn platform_public_key() -> RsaPublicKey {
    RsaPublicKey::from(&platform_private_key())
}

pub(crate) fn platform_certificate() -> PlatformCertificate {
    PlatformCertificate::from_pem(PLATFORM_CERTIFICATE_PEM).unwrap()
}

/// 以平台私钥签名，模拟微信支付的应答签名。
pub(crate) fn platform_sign(timestamp: &str, nonce: &str, body: &[u8]) -> String {
    let msg = build_message(timestamp, nonce, body);
    let signature =
        SigningKey::<Sha256>::new(platform_private_key()).sign_with_rng(&mut rand::thread_rng(), &msg);
    BASE64_STANDARD.encode(signature.to_bytes())
}

/// 当前时间的签名 header。
pub(crate) fn platform_headers(body: &[u8]) -> SignatureHeaders {
    let timestamp = unix_timestamp().to_string();
    let nonce = generate_nonce_str(32);
    SignatureHeaders {
        serial_no: Some(PLATFORM_SERIAL_NO.to_string()),
        signature: Some(platform_sign(&timestamp, &nonce, body)),
        timestamp: Some(timestamp),
        nonce: Some(nonce),
    }
}

/// 带签名 header 的 JSON 应答。
pub(crate) fn platform_response(status: u16, body: &str) -> http::Response<Vec<u8>> {
    let headers = platform_headers(body.as_bytes());
    http::Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Wechatpay-Serial", headers.serial_no.unwrap())
        .header("Wechatpay-Signature", headers.signature.unwrap())
        .header("Wechatpay-Timestamp", headers.timestamp.unwrap())
        .header("Wechatpay-Nonce", headers.nonce.unwrap())
        .body(body.as_bytes().to_vec())
        .unwrap()
}

pub(crate) fn gcm_encrypt(key: &[u8; 32], aad: &[u8], nonce: &[u8], plaintext: &[u8]) -> String {
    let cipher = Aes256Gcm::new_from_slice(key).unwrap();
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .unwrap();
    BASE64_STANDARD.encode(ciphertext)
}

/// 支付成功通知的 body，资源数据以 `key` 加密。
pub(crate) fn notification_body(key: &[u8; 32], plaintext: &str) -> String {
    let nonce = "fdasflkja484";
    json!({
        "id": "EV-2018022511223320873",
        "create_time": "2015-05-20T13:29:35+08:00",
        "resource_type": "encrypt-resource",
        "event_type": "TRANSACTION.SUCCESS",
        "summary": "支付成功",
        "resource": {
            "original_type": "transaction",
            "algorithm": "AEAD_AES_256_GCM",
            "ciphertext": gcm_encrypt(key, b"transaction", nonce.as_bytes(), plaintext.as_bytes()),
            "associated_data": "transaction",
            "nonce": nonce,
        }
    })
    .to_string()
}

/// 下载平台证书接口的应答 body，证书以 `api_v3_key` 加密。
pub(crate) fn certificates_body(api_v3_key: &str) -> String {
    let key: [u8; 32] = api_v3_key.as_bytes().try_into().unwrap();
    let c = platform_certificate();
    let nonce = "4de73afd28b6";
    json!({
        "data": [{
            "serial_no": c.serial_no,
            "effective_time": c.effective_time.format(DATETIME_FORMAT).to_string(),
            "expire_time": c.expire_time.format(DATETIME_FORMAT).to_string(),
            "encrypt_certificate": {
                "algorithm": "AEAD_AES_256_GCM",
                "nonce": nonce,
                "associated_data": "certificate",
                "ciphertext": gcm_encrypt(&key, b"certificate", nonce.as_bytes(), PLATFORM_CERTIFICATE_PEM.as_bytes()),
            }
        }]
    })
    .to_string()
}

pub(crate) fn generate_test_id() -> String {
    generate_nonce_str(16)
}

/// 不发起网络请求，由闭包生成应答。
pub(crate) struct FakeTransport {
    handler: Box<dyn Fn(&Request) -> http::Response<Vec<u8>> + Send + Sync>,
}

impl FakeTransport {
    pub(crate) fn new(
        handler: impl Fn(&Request) -> http::Response<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        FakeTransport {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn execute(&self, req: Request) -> Result<Response> {
        Ok((self.handler)(&req).into())
    }
}
