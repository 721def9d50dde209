//! 微信支付的请求签名与回调验签。
//!
//! - 旧版(v2)接口：参数规范化，MD5 / HMAC-SHA256 签名，XML 报文。
//! - v3 接口：商户私钥 RSA-SHA256 签名，平台证书验签，AES-256-GCM 解密回调资源。
//! - 小程序加密数据解密，敏感字段 RSA-OAEP 加密。

pub mod client;
pub mod credential;
pub mod error;
pub mod legacy;
pub mod notify;
pub mod params;
pub mod platform_certificate;
pub mod schema;
pub mod sensitive;
pub mod signer;
pub mod transport;
pub mod util;
pub mod verifier;

#[cfg(test)]
mod testutil;

pub use client::WechatPayClient;
pub use credential::MchCredential;
pub use error::{Result, WechatPayError};
pub use params::ParamSet;
pub use platform_certificate::{CertificateStore, PlatformCertificate};
