//! 敏感信息的加解密。
//! - 小程序加密数据(如手机号、用户信息)：AES-128-CBC，PKCS#7 填充，密钥为 session_key。
//! - 上送的敏感字段(如银行卡号、姓名)：使用平台公钥 RSA-OAEP 加密。
//!
//! 参见 <https://developers.weixin.qq.com/miniprogram/dev/framework/open-ability/signature.html>
//! 及 <https://pay.weixin.qq.com/wiki/doc/apiv3/wechatpay/wechatpay4_3.shtml>

use crate::error::{Result, WechatPayError};
use aes::Aes128;
use base64::prelude::*;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

/// AES 分组长度。
pub const BLOCK_SIZE: usize = 16;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size > u8::MAX as usize {
        return Err(WechatPayError::DecodeFailed(format!(
            "pkcs7: block size {} is out of range 1..=255",
            block_size
        )));
    }
    Ok(())
}

/// PKCS#7 填充。`block_size` 须在 1..=255 之间。
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    check_block_size(block_size)?;
    let pad = block_size - data.len() % block_size;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    Ok(out)
}

/// 去除 PKCS#7 填充。填充值必须在 1..=block_size 之间，不超过数据长度，且所有填充字节一致。
pub fn pkcs7_unpad(data: &[u8], block_size: usize) -> Result<&[u8]> {
    check_block_size(block_size)?;
    if data.is_empty() || data.len() % block_size != 0 {
        return Err(WechatPayError::DecodeFailed(format!(
            "pkcs7: length {} is not a positive multiple of {}",
            data.len(),
            block_size
        )));
    }
    let pad = data[data.len() - 1] as usize;
    if pad == 0 || pad > block_size || pad > data.len() {
        return Err(WechatPayError::DecodeFailed(format!(
            "pkcs7: invalid padding length {}",
            pad
        )));
    }
    let (plain, padding) = data.split_at(data.len() - pad);
    if padding.iter().any(|&b| b as usize != pad) {
        return Err(WechatPayError::DecodeFailed(
            "pkcs7: inconsistent padding bytes".to_string(),
        ));
    }
    Ok(plain)
}

fn decode_fixed(name: &str, b64: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = BASE64_STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| WechatPayError::DecodeFailed(format!("{}: {}", name, e)))?;
    if bytes.len() != len {
        return Err(WechatPayError::DecodeFailed(format!(
            "{} must be {} bytes, got {}",
            name,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// 解密小程序加密数据。三个参数均为 base64 编码。
pub fn decrypt_user_payload(encrypted_data: &str, session_key: &str, iv: &str) -> Result<Vec<u8>> {
    let key = decode_fixed("session_key", session_key, BLOCK_SIZE)?;
    let iv = decode_fixed("iv", iv, BLOCK_SIZE)?;
    let mut buf = BASE64_STANDARD
        .decode(encrypted_data.as_bytes())
        .map_err(|e| WechatPayError::DecodeFailed(format!("encrypted_data: {}", e)))?;
    if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
        return Err(WechatPayError::DecodeFailed(format!(
            "encrypted_data length {} is not a positive multiple of {}",
            buf.len(),
            BLOCK_SIZE
        )));
    }

    let decryptor = Aes128CbcDec::new_from_slices(&key, &iv).map_err(WechatPayError::decode)?;
    let decrypted = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| WechatPayError::DecodeFailed(format!("aes-128-cbc: {:?}", e)))?;
    Ok(pkcs7_unpad(decrypted, BLOCK_SIZE)?.to_vec())
}

/// 数据水印。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    pub appid: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// 解密后的小程序数据。
#[derive(Debug, Clone, Deserialize)]
pub struct UserData<T> {
    #[serde(flatten)]
    pub data: T,
    pub watermark: Watermark,
}

/// 解密小程序加密数据并解析为 `T`，同时校验水印中的 appid，防止使用其他小程序的数据。
pub fn decrypt_user_data<T: DeserializeOwned>(
    encrypted_data: &str,
    session_key: &str,
    iv: &str,
    expected_app_id: &str,
) -> Result<UserData<T>> {
    let plain = decrypt_user_payload(encrypted_data, session_key, iv)?;
    let user_data: UserData<T> = serde_json::from_slice(&plain)?;
    if user_data.watermark.appid != expected_app_id {
        return Err(WechatPayError::SignatureMismatch(format!(
            "watermark appid mismatch: expected {}, got {}",
            expected_app_id, user_data.watermark.appid
        )));
    }
    Ok(user_data)
}

/// 使用平台公钥加密敏感字段 (RSA-OAEP, SHA-1)，返回 base64 编码的密文。
pub fn encrypt_sensitive_field(plaintext: &str, public_key: &RsaPublicKey) -> Result<String> {
    let mut rng = rand::thread_rng();
    let ciphertext = public_key
        .encrypt(&mut rng, Oaep::new::<Sha1>(), plaintext.as_bytes())
        .map_err(|e| WechatPayError::DecodeFailed(format!("rsa-oaep encrypt: {}", e)))?;
    Ok(BASE64_STANDARD.encode(ciphertext))
}

/// 使用商户私钥解密平台返回的敏感字段 (RSA-OAEP, SHA-1)。
pub fn decrypt_sensitive_field(ciphertext: &str, private_key: &RsaPrivateKey) -> Result<String> {
    let ciphertext = BASE64_STANDARD.decode(ciphertext.as_bytes())?;
    let plain = private_key
        .decrypt(Oaep::new::<Sha1>(), &ciphertext)
        .map_err(|e| WechatPayError::DecodeFailed(format!("rsa-oaep decrypt: {}", e)))?;
    String::from_utf8(plain).map_err(WechatPayError::decode)
}
