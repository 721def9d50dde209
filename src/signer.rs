//! v3 接口的请求签名。
//! <https://pay.weixin.qq.com/wiki/doc/apiv3/wechatpay/wechatpay4_0.shtml>

use crate::credential::MchCredential;
use crate::error::{Result, WechatPayError};
use crate::util::{generate_nonce_str, unix_timestamp};
use base64::prelude::*;
use bytes::{BufMut, BytesMut};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use serde::{Deserialize, Serialize};

/// Authorization header 中的签名类型。
pub const SIGNATURE_TYPE: &str = "WECHATPAY2-SHA256-RSA2048";

/// 签名算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgorithm {
    Md5,
    HmacSha256,
    RsaSha256,
}

/// 签名结果：参与签名的原文、算法与签名值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub payload: Vec<u8>,
    pub algorithm: SignAlgorithm,
    pub signature: String,
}

/// 构造请求签名原文：`method\nurl\ntimestamp\nnonce\nbody\n`。
pub fn build_message(method: &str, url: &str, timestamp: i64, nonce: &str, body: &[u8]) -> BytesMut {
    let mut msg = BytesMut::new();
    msg.put_slice(method.as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(url.as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(timestamp.to_string().as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(nonce.as_bytes());
    msg.put_u8(b'\n');
    msg.put_slice(body);
    msg.put_u8(b'\n');
    msg
}

/// 使用商户 RSA 私钥签名。构造时即检查商户号、证书序列号与私钥是否齐全。
pub struct RsaSigner<'a> {
    mch_id: &'a str,
    serial_no: &'a str,
    signing_key: SigningKey<Sha256>,
}

impl<'a> RsaSigner<'a> {
    pub fn new(credential: &'a MchCredential) -> Result<Self> {
        let mch_id = credential.mch_id();
        if mch_id.is_empty() {
            return Err(WechatPayError::ConfigMissing("mch_id"));
        }
        let serial_no = credential.mch_certificate_serial_no()?;
        let private_key = credential.mch_rsa_private_key()?;
        Ok(RsaSigner {
            mch_id,
            serial_no,
            signing_key: SigningKey::<Sha256>::new(private_key.clone()),
        })
    }

    /// SHA256withRSA 签名，返回 base64 编码的签名值。
    pub fn sign_bytes(&self, msg: &[u8]) -> String {
        let mut rng = rand::thread_rng();
        let signature = self.signing_key.sign_with_rng(&mut rng, msg).to_bytes();
        BASE64_STANDARD.encode(signature)
    }

    /// 对请求签名。
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        timestamp: i64,
        nonce: &str,
        body: &[u8],
    ) -> SignedEnvelope {
        let msg = build_message(method, url, timestamp, nonce, body);
        let signature = self.sign_bytes(&msg);
        SignedEnvelope {
            payload: msg.to_vec(),
            algorithm: SignAlgorithm::RsaSha256,
            signature,
        }
    }

    /// 生成 Authorization header 的值。
    pub fn authorization(&self, method: &str, url: &str, body: &[u8]) -> String {
        let timestamp = unix_timestamp();
        let nonce_str = generate_nonce_str(32);
        let envelope = self.sign(method, url, timestamp, &nonce_str, body);
        self.authorization_value(&nonce_str, timestamp, &envelope.signature)
    }

    fn authorization_value(&self, nonce_str: &str, timestamp: i64, signature: &str) -> String {
        format!(
            r#"{} mchid="{}",nonce_str="{}",signature="{}",timestamp="{}",serial_no="{}""#,
            SIGNATURE_TYPE, self.mch_id, nonce_str, signature, timestamp, self.serial_no
        )
    }

    /// 对 reqwest 请求签名，并写入 Authorization header。
    pub fn sign_request(&self, mut req: Request) -> Result<Request> {
        let url = if let Some(query) = req.url().query() {
            format!("{}?{}", req.url().path(), query)
        } else {
            req.url().path().to_string()
        };

        let body = match req.body() {
            // 流式 body 无法参与签名。
            Some(body) => body.as_bytes().ok_or_else(|| {
                WechatPayError::DecodeFailed("streaming request body cannot be signed".to_string())
            })?,
            None => b"".as_slice(),
        };

        let authorization = self.authorization(req.method().as_str(), &url, body);
        log::debug!("signed {} {}", req.method(), url);
        let value = HeaderValue::from_str(&authorization).map_err(WechatPayError::decode)?;
        req.headers_mut().insert(AUTHORIZATION, value);
        Ok(req)
    }

    /// 对 JSAPI / 小程序下单返回的 prepay_id 进行签名。
    /// 前端在调起微信支付时，需要这些参数。
    /// 参见 <https://pay.weixin.qq.com/wiki/doc/apiv3/apis/chapter3_1_4.shtml>
    pub fn sign_jsapi_pay(&self, app_id: &str, prepay_id: &str) -> JsApiPaySignature {
        let timestamp = unix_timestamp();
        let nonce_str = generate_nonce_str(32);
        let package = format!("prepay_id={}", prepay_id);
        let msg = format!("{}\n{}\n{}\n{}\n", app_id, timestamp, nonce_str, package);

        JsApiPaySignature {
            app_id: app_id.to_string(),
            timestamp: timestamp.to_string(),
            nonce_str,
            package,
            sign_type: "RSA".to_string(),
            pay_sign: self.sign_bytes(msg.as_bytes()),
        }
    }
}

/// JSAPI 下单时，针对返回的 prepay_id 生成的签名，
/// 前端在调起微信支付时，需要这些参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsApiPaySignature {
    pub app_id: String,
    pub timestamp: String, // 注意，单位为秒。类型为 string。
    pub nonce_str: String,
    // 须形如 `prepay_id=xxxxx`。注意 xxxx 前后无引号。
    pub package: String,
    // 统一为 RSA
    pub sign_type: String,
    pub pay_sign: String,
}
