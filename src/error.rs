use serde::{Deserialize, Serialize};

pub type Result<T, E = WechatPayError> = std::result::Result<T, E>;

/// 签名、验签、解密过程中的错误。
/// 所有错误都直接返回给调用方，内部不做任何重试。
#[derive(Debug, thiserror::Error)]
pub enum WechatPayError {
    /// 缺少必要的配置，比如商户号、密钥、证书序列号等。
    #[error("missing configuration: {0}")]
    ConfigMissing(&'static str),

    /// 不支持的签名或加密算法。
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// 签名校验失败。
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// 缺少验签所需的 header。
    #[error("missing `{0}` header")]
    MissingHeader(&'static str),

    /// 时间戳与本地时间相差过大。
    #[error("timestamp {timestamp} is out of the allowed window ({skew_secs}s)")]
    StaleTimestamp { timestamp: i64, skew_secs: u64 },

    /// 找不到序列号对应的平台证书。
    #[error("no platform certificate found for serial_no: {serial_no}")]
    CertificateMismatch { serial_no: String },

    /// 平台证书不在有效期内。
    #[error("platform certificate {serial_no} is not within its validity period")]
    CertificateExpired { serial_no: String },

    /// AEAD 认证失败：密文、附加数据或随机串被篡改，或密钥错误。
    #[error("AEAD authentication failed")]
    AuthenticationFailed,

    /// base64 / XML / JSON / PEM 等格式错误。
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// 请求参数不符合接口要求，请求不会被发送。
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// 旧版接口返回了非 2xx 的 HTTP 状态码。
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// 网络错误。
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// v3 接口返回的非 2xx 错误。
    #[error(transparent)]
    Api(#[from] WechatPayApiError),

    /// 旧版接口 return_code / result_code 不为 SUCCESS。
    #[error("微信支付错误: code={code}, message={message}")]
    Protocol { code: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WechatPayError {
    pub(crate) fn decode(e: impl std::fmt::Display) -> Self {
        WechatPayError::DecodeFailed(e.to_string())
    }
}

impl From<serde_json::Error> for WechatPayError {
    fn from(e: serde_json::Error) -> Self {
        WechatPayError::DecodeFailed(format!("json: {}", e))
    }
}

impl From<base64::DecodeError> for WechatPayError {
    fn from(e: base64::DecodeError) -> Self {
        WechatPayError::DecodeFailed(format!("base64: {}", e))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, thiserror::Error)]
#[serde(default)]
#[error("微信支付错误: {code} {message}")]
pub struct WechatPayApiError {
    /// 错误码
    pub code: String,
    /// 错误描述
    pub message: String,
    /// 错误详情
    pub detail: WechatPayErrorDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WechatPayErrorDetail {
    /// 指示错误参数的位置
    pub field: String,
    /// 错误的值
    pub value: String,
    /// 具体错误原因
    pub issue: String,
    /// 出错的位置
    pub location: String,
}
