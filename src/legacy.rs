//! 旧版(v2)接口的签名与验签。
//! 参见 <https://pay.weixin.qq.com/wiki/doc/api/jsapi.php?chapter=4_3>

use crate::error::{Result, WechatPayError};
use crate::params::{ParamSet, SIGN_FIELD};
use crate::signer::{SignAlgorithm, SignedEnvelope};
use crate::util::{constant_time_eq, generate_nonce_str, unix_timestamp};
use hmac::{Hmac, Mac};
use rsa::sha2::Sha256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 旧版接口的返回码。
pub const SUCCESS: &str = "SUCCESS";

/// 旧版接口的签名类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignType {
    #[default]
    Md5,
    HmacSha256,
}

impl SignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignType::Md5 => "MD5",
            SignType::HmacSha256 => "HMAC-SHA256",
        }
    }
}

impl fmt::Display for SignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignType {
    type Err = WechatPayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MD5" => Ok(SignType::Md5),
            "HMAC-SHA256" => Ok(SignType::HmacSha256),
            _ => Err(WechatPayError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl From<SignType> for SignAlgorithm {
    fn from(t: SignType) -> Self {
        match t {
            SignType::Md5 => SignAlgorithm::Md5,
            SignType::HmacSha256 => SignAlgorithm::HmacSha256,
        }
    }
}

/// 计算签名：待签名串后拼接 `&key=<secret>`，再做 MD5 或 HMAC-SHA256，结果转为大写十六进制。
pub fn sign(params: &ParamSet, secret: &str, sign_type: SignType) -> Result<String> {
    if secret.is_empty() {
        return Err(WechatPayError::ConfigMissing("mch_api_key"));
    }
    let msg = string_to_sign(params, secret);

    let signature = match sign_type {
        SignType::Md5 => hex::encode_upper(md5::compute(msg.as_bytes()).0),
        SignType::HmacSha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .map_err(|e| WechatPayError::DecodeFailed(format!("hmac key: {}", e)))?;
            mac.update(msg.as_bytes());
            hex::encode_upper(mac.finalize().into_bytes())
        }
    };
    Ok(signature)
}

/// 实际参与摘要的字符串：`k1=v1&k2=v2&key=<secret>`。
pub(crate) fn string_to_sign(params: &ParamSet, secret: &str) -> String {
    let mut msg = params.canonical_string();
    msg.push_str("&key=");
    msg.push_str(secret);
    msg
}

/// 与 `sign` 相同，但同时返回参与签名的原文。
pub fn sign_envelope(params: &ParamSet, secret: &str, sign_type: SignType) -> Result<SignedEnvelope> {
    let signature = sign(params, secret, sign_type)?;
    Ok(SignedEnvelope {
        payload: params.canonical_string().into_bytes(),
        algorithm: sign_type.into(),
        signature,
    })
}

/// 校验签名。参数中已有的 `sign` 字段不参与计算。
pub fn verify(params: &ParamSet, claimed: &str, secret: &str, sign_type: SignType) -> Result<bool> {
    let expected = sign(params, secret, sign_type)?;
    Ok(constant_time_eq(&expected, claimed))
}

/// 校验响应或回调中的 `sign` 字段。
pub fn verify_response(params: &ParamSet, secret: &str, sign_type: SignType) -> Result<()> {
    let claimed = params
        .get(SIGN_FIELD)
        .ok_or_else(|| WechatPayError::SignatureMismatch("missing `sign` field".to_string()))?;
    if verify(params, claimed, secret, sign_type)? {
        Ok(())
    } else {
        log::warn!("legacy signature mismatch");
        Err(WechatPayError::SignatureMismatch(
            "legacy signature does not match".to_string(),
        ))
    }
}

/// 检查通信标识 `return_code`。为 FAIL 时响应通常没有签名。
pub fn check_return_code(params: &ParamSet) -> Result<()> {
    let code = params.require("return_code")?;
    if code != SUCCESS {
        return Err(WechatPayError::Protocol {
            code: code.to_string(),
            message: params.get("return_msg").unwrap_or_default().to_string(),
        });
    }
    Ok(())
}

/// 检查业务结果 `result_code`。不存在时视为成功(部分接口无此字段)。
pub fn check_result_code(params: &ParamSet) -> Result<()> {
    match params.get("result_code") {
        Some(code) if code != SUCCESS => Err(WechatPayError::Protocol {
            code: params.get("err_code").unwrap_or(code).to_string(),
            message: params.get("err_code_des").unwrap_or_default().to_string(),
        }),
        _ => Ok(()),
    }
}

/// 旧版 JSAPI / 小程序调起支付所需参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyJsApiPayParams {
    pub app_id: String,
    /// 注意，单位为秒。类型为 string。
    pub time_stamp: String,
    pub nonce_str: String,
    /// 形如 `prepay_id=xxxxx`
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

/// 对统一下单返回的 prepay_id 签名，生成前端调起支付的参数。
pub fn sign_jsapi_pay(
    app_id: &str,
    prepay_id: &str,
    secret: &str,
    sign_type: SignType,
) -> Result<LegacyJsApiPayParams> {
    let time_stamp = unix_timestamp().to_string();
    let nonce_str = generate_nonce_str(32);
    let package = format!("prepay_id={}", prepay_id);

    let mut params = ParamSet::new();
    params
        .insert("appId", app_id)
        .insert("timeStamp", &time_stamp)
        .insert("nonceStr", &nonce_str)
        .insert("package", &package)
        .insert("signType", sign_type);
    let pay_sign = sign(&params, secret, sign_type)?;

    Ok(LegacyJsApiPayParams {
        app_id: app_id.to_string(),
        time_stamp,
        nonce_str,
        package,
        sign_type: sign_type.to_string(),
        pay_sign,
    })
}

/// 旧版接口的 XML 报文：`<xml><k>v</k>...</xml>`。
pub mod xml {
    use super::*;
    use quick_xml::escape::escape;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    pub const CONTENT_TYPE: &str = "application/xml;charset=utf-8";

    /// 序列化为 XML。值会被转义。
    pub fn to_xml(params: &ParamSet) -> String {
        let mut s = String::from("<xml>");
        for (k, v) in params.iter() {
            s.push('<');
            s.push_str(k);
            s.push('>');
            s.push_str(&escape(v));
            s.push_str("</");
            s.push_str(k);
            s.push('>');
        }
        s.push_str("</xml>");
        s
    }

    /// 解析 XML。只接受一层子元素，子元素的内容为文本或 CDATA。
    pub fn from_xml(xml: &str) -> Result<ParamSet> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut params = ParamSet::new();
        let mut depth = 0usize;
        let mut field: Option<(String, String)> = None;
        let mut seen_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    match depth {
                        1 => seen_root = true,
                        2 => {
                            let name = String::from_utf8(e.name().as_ref().to_vec())
                                .map_err(WechatPayError::decode)?;
                            field = Some((name, String::new()));
                        }
                        _ => {
                            return Err(WechatPayError::DecodeFailed(
                                "xml: nested elements are not supported".to_string(),
                            ))
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    if depth == 1 {
                        let name = String::from_utf8(e.name().as_ref().to_vec())
                            .map_err(WechatPayError::decode)?;
                        params.insert(name, "");
                    } else if depth == 0 {
                        seen_root = true;
                    } else {
                        return Err(WechatPayError::DecodeFailed(
                            "xml: nested elements are not supported".to_string(),
                        ));
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some((_, value)) = field.as_mut() {
                        let text = e.unescape().map_err(WechatPayError::decode)?;
                        value.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some((_, value)) = field.as_mut() {
                        let text = std::str::from_utf8(&e).map_err(WechatPayError::decode)?;
                        value.push_str(text);
                    }
                }
                Ok(Event::End(_)) => {
                    if depth == 2 {
                        if let Some((name, value)) = field.take() {
                            params.insert(name, value);
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(WechatPayError::DecodeFailed(format!("xml: {}", e))),
            }
        }

        if !seen_root || depth != 0 {
            return Err(WechatPayError::DecodeFailed(
                "xml: missing or unterminated root element".to_string(),
            ));
        }
        Ok(params)
    }

    /// 旧版回调通知的应答报文。
    pub fn ack_xml(return_code: &str, return_msg: &str) -> String {
        let mut params = ParamSet::new();
        params
            .insert("return_code", return_code)
            .insert("return_msg", return_msg);
        to_xml(&params)
    }
}
