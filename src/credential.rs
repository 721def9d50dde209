//! 微信支付商户的证书和密钥。
//! 这些信息均为敏感信息，注意确保安全，避免泄露。

use crate::error::{Result, WechatPayError};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use std::fmt::Debug;
use std::path::Path;

/// 商户 API v3 密钥长度。
pub const API_V3_KEY_LEN: usize = 32;

/// 微信支付商户的证书和密钥。
/// 一个进程内通常只构造一次，之后只读。
#[derive(Clone)]
pub struct MchCredential {
    /// 商户号
    mch_id: String,
    /// 应用 ID。旧版接口需要。
    app_id: Option<String>,
    /// 商户 API 证书序列号
    mch_certificate_serial_no: Option<String>,
    /// 商户 RSA 私钥
    mch_rsa_private_key: Option<RsaPrivateKey>,
    /// 商户 API v3 密钥
    mch_api_v3_key: Option<[u8; API_V3_KEY_LEN]>,
    /// 商户 API 密钥(旧版接口签名用)
    mch_api_key: Option<String>,
}

impl MchCredential {
    pub fn builder() -> MchCredentialBuilder {
        MchCredentialBuilder::default()
    }

    pub fn mch_id(&self) -> &str {
        &self.mch_id
    }

    pub fn app_id(&self) -> Result<&str> {
        self.app_id
            .as_deref()
            .ok_or(WechatPayError::ConfigMissing("app_id"))
    }

    pub fn mch_certificate_serial_no(&self) -> Result<&str> {
        self.mch_certificate_serial_no
            .as_deref()
            .ok_or(WechatPayError::ConfigMissing("mch_certificate_serial_no"))
    }

    pub fn mch_rsa_private_key(&self) -> Result<&RsaPrivateKey> {
        self.mch_rsa_private_key
            .as_ref()
            .ok_or(WechatPayError::ConfigMissing("mch_rsa_private_key"))
    }

    pub fn mch_api_v3_key(&self) -> Result<&[u8; API_V3_KEY_LEN]> {
        self.mch_api_v3_key
            .as_ref()
            .ok_or(WechatPayError::ConfigMissing("mch_api_v3_key"))
    }

    pub fn mch_api_key(&self) -> Result<&str> {
        self.mch_api_key
            .as_deref()
            .ok_or(WechatPayError::ConfigMissing("mch_api_key"))
    }
}

impl Debug for MchCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MchCredential")
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("mch_certificate_serial_no", &"...")
            .field("mch_rsa_private_key", &"...")
            .field("mch_api_v3_key", &"...")
            .field("mch_api_key", &"...")
            .finish()
    }
}

/// builder for `MchCredential`.
#[derive(Default)]
pub struct MchCredentialBuilder {
    mch_id: Option<String>,
    app_id: Option<String>,
    mch_certificate_serial_no: Option<String>,
    mch_rsa_private_key: Option<RsaPrivateKey>,
    mch_api_v3_key: Option<String>,
    mch_api_key: Option<String>,
}

impl MchCredentialBuilder {
    pub fn mch_id(&mut self, mch_id: impl Into<String>) -> &mut Self {
        self.mch_id = Some(mch_id.into());
        self
    }

    pub fn app_id(&mut self, app_id: impl Into<String>) -> &mut Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn mch_certificate_serial_no(&mut self, serial_no: impl Into<String>) -> &mut Self {
        self.mch_certificate_serial_no = Some(serial_no.into());
        self
    }

    pub fn mch_rsa_private_key(&mut self, key: RsaPrivateKey) -> &mut Self {
        self.mch_rsa_private_key = Some(key);
        self
    }

    /// 从 PEM 加载商户私钥。支持 PKCS#8 (`BEGIN PRIVATE KEY`) 与 PKCS#1 (`BEGIN RSA PRIVATE KEY`)。
    pub fn mch_rsa_private_key_pem(&mut self, pem: &str) -> Result<&mut Self> {
        let key = parse_private_key_pem(pem)?;
        self.mch_rsa_private_key = Some(key);
        Ok(self)
    }

    /// 从文件加载商户私钥，通常为 `apiclient_key.pem`。
    pub fn mch_rsa_private_key_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let pem = std::fs::read_to_string(path)?;
        self.mch_rsa_private_key_pem(&pem)
    }

    /// 商户 API v3 密钥，必须为 32 字节。
    pub fn mch_api_v3_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.mch_api_v3_key = Some(key.into());
        self
    }

    /// 商户 API 密钥，旧版接口签名用。
    pub fn mch_api_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.mch_api_key = Some(key.into());
        self
    }

    pub fn build(&mut self) -> Result<MchCredential> {
        let mch_id = self
            .mch_id
            .take()
            .filter(|s| !s.is_empty())
            .ok_or(WechatPayError::ConfigMissing("mch_id"))?;

        let mch_api_v3_key = match self.mch_api_v3_key.take() {
            Some(key) => {
                let key: [u8; API_V3_KEY_LEN] =
                    key.as_bytes().try_into().map_err(|_| {
                        WechatPayError::DecodeFailed(format!(
                            "mch_api_v3_key must be {} bytes, got {}",
                            API_V3_KEY_LEN,
                            key.len()
                        ))
                    })?;
                Some(key)
            }
            None => None,
        };

        Ok(MchCredential {
            mch_id,
            app_id: self.app_id.take(),
            mch_certificate_serial_no: self.mch_certificate_serial_no.take().filter(|s| !s.is_empty()),
            mch_rsa_private_key: self.mch_rsa_private_key.take(),
            mch_api_v3_key,
            mch_api_key: self.mch_api_key.take().filter(|s| !s.is_empty()),
        })
    }
}

/// 解析 PEM 格式的 RSA 私钥。
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| WechatPayError::DecodeFailed(format!("invalid RSA private key: {}", e)))
}
