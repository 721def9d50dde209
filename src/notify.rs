//! 微信支付通知。包括支付结果与退款结果等各类回调通知。
//! 通知须先验签，验签通过后才能解密其中的资源数据。

use crate::credential::API_V3_KEY_LEN;
use crate::error::{Result, WechatPayError};
use crate::util::datetime_fmt;
use crate::verifier::{ResponseVerifier, SignatureHeaders};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::prelude::*;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 资源数据的加密算法。目前只支持 AEAD_AES_256_GCM。
pub const AEAD_AES_256_GCM: &str = "AEAD_AES_256_GCM";

/// AES-256-GCM 随机串长度。
pub const NONCE_LEN: usize = 12;

/// 使用商户 API v3 密钥解密。
/// 密文、附加数据或随机串被篡改时返回 `AuthenticationFailed`，不会返回被篡改的明文。
pub fn aes_256_gcm_decrypt(
    key: &[u8; API_V3_KEY_LEN],
    associated_data: &[u8],
    nonce: &[u8],
    ciphertext: &str,
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(WechatPayError::DecodeFailed(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        )));
    }
    let ciphertext = BASE64_STANDARD.decode(ciphertext.as_bytes())?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(WechatPayError::decode)?;
    let payload = Payload {
        msg: &ciphertext,
        aad: associated_data,
    };
    cipher
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| WechatPayError::AuthenticationFailed)
}

/// 解密并转换为字符串。
pub fn aes_256_gcm_decrypt_to_string(
    key: &[u8; API_V3_KEY_LEN],
    associated_data: &[u8],
    nonce: &[u8],
    ciphertext: &str,
) -> Result<String> {
    let bytes = aes_256_gcm_decrypt(key, associated_data, nonce, ciphertext)?;
    String::from_utf8(bytes).map_err(WechatPayError::decode)
}

/// 微信支付通知。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// 通知的唯一 ID，长度不超过 36 字符。
    pub id: String,
    /// 通知创建的时间
    #[serde(with = "datetime_fmt")]
    pub create_time: DateTime<Local>,
    /// 通知类型。不超过 32 字符。
    /// TRANSACTION.SUCCESS：支付成功通知。
    /// REFUND.SUCCESS：退款成功通知
    /// REFUND.ABNORMAL：退款异常通知
    /// REFUND.CLOSED：退款关闭通知
    pub event_type: String,
    /// 通知的资源数据类型，不超过 32 字符。支付成功通知为 encrypt-resource。
    pub resource_type: String,
    /// 通知资源数据。
    pub resource: EncryptedResource,
    /// 回调摘要。不超过 64 字符。
    #[serde(default)]
    pub summary: String,
}

/// 加密的资源数据。通知和平台证书下载都使用这一结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedResource {
    /// 加密算法类型。目前只支持AEAD_AES_256_GCM。
    pub algorithm: String,
    /// 数据密文。已经过 base64 编码。
    pub ciphertext: String,
    /// 附加数据。
    #[serde(default)]
    pub associated_data: String,
    /// 原始类型
    /// 支付通知的类型为 transaction
    /// 退款通知的类型为 refund
    #[serde(default)]
    pub original_type: String,
    /// 随机串
    pub nonce: String,
}

impl EncryptedResource {
    pub(crate) fn decrypt(&self, key: &[u8; API_V3_KEY_LEN]) -> Result<Vec<u8>> {
        if self.algorithm != AEAD_AES_256_GCM {
            return Err(WechatPayError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        aes_256_gcm_decrypt(
            key,
            self.associated_data.as_bytes(),
            self.nonce.as_bytes(),
            &self.ciphertext,
        )
    }
}

/// 验签通过的通知。只有验签成功才能得到这个类型，也只有它能解密资源数据。
#[derive(Debug, Clone)]
pub struct VerifiedNotification {
    envelope: NotificationEnvelope,
}

impl VerifiedNotification {
    /// 验签，然后解析通知。验签失败时不会解析 body。
    pub fn verify(
        verifier: &ResponseVerifier<'_>,
        headers: &SignatureHeaders,
        body: &[u8],
    ) -> Result<Self> {
        verifier.verify(headers, body)?;
        let envelope: NotificationEnvelope = serde_json::from_slice(body)?;
        log::debug!(
            "notification {} ({}) verified",
            envelope.id,
            envelope.event_type
        );
        Ok(VerifiedNotification { envelope })
    }

    pub fn envelope(&self) -> &NotificationEnvelope {
        &self.envelope
    }

    /// 解密资源数据。
    pub fn decrypt(&self, key: &[u8; API_V3_KEY_LEN]) -> Result<Vec<u8>> {
        self.envelope.resource.decrypt(key)
    }

    /// 解密资源数据，并解析为 `T`。
    pub fn decrypt_json<T: DeserializeOwned>(&self, key: &[u8; API_V3_KEY_LEN]) -> Result<T> {
        let plain = self.decrypt(key)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

/// 解密后的通知。
#[derive(Debug, Clone)]
pub struct DecryptedNotification<T> {
    pub envelope: NotificationEnvelope,
    pub data: T,
}

/// 回调的应答。处理失败时，微信支付会按其策略重新发送通知。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAck {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl NotificationAck {
    pub fn success() -> Self {
        NotificationAck {
            code: "SUCCESS".to_string(),
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        NotificationAck {
            code: "FAIL".to_string(),
            message: Some(message.into()),
        }
    }
}
