use crate::credential::MchCredential;
use crate::error::{Result, WechatPayApiError, WechatPayError};
use crate::legacy::{self, xml, SignType};
use crate::notify::{DecryptedNotification, VerifiedNotification};
use crate::params::{ParamSet, SIGN_FIELD};
use crate::platform_certificate::{
    download_platform_certificates, CertificateStore, PlatformCertificate,
};
use crate::schema::{EndpointSchema, AUTO_FIELDS};
use crate::sensitive::encrypt_sensitive_field;
use crate::signer::{JsApiPaySignature, RsaSigner};
use crate::transport::HttpTransport;
use crate::util::generate_nonce_str;
use crate::verifier::{ResponseVerifier, SignatureHeaders};
use http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT as USER_AGENT_HEADER};
use http::HeaderMap;
use reqwest::{Client, Method, Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const BASE_URL: &str = "https://api.mch.weixin.qq.com";

pub(crate) const USER_AGENT: &str = "wechatpay Rust client";

#[derive(Clone)]
pub struct WechatPayClient {
    client: Client,
    transport: Arc<dyn HttpTransport>,
    mch_credential: Arc<MchCredential>,
    platform_certificates: Arc<CertificateStore>,
    base_url: String,
    user_agent: String,
    legacy_sign_type: SignType,
    max_clock_skew: Option<Duration>,
    certificate_dir: Option<PathBuf>,
}

impl fmt::Debug for WechatPayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WechatPayClient")
            .field("mch_credential", &self.mch_credential)
            .field("platform_certificates", &self.platform_certificates.len())
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("legacy_sign_type", &self.legacy_sign_type)
            .field("max_clock_skew", &self.max_clock_skew)
            .field("certificate_dir", &self.certificate_dir)
            .finish()
    }
}

impl WechatPayClient {
    pub fn builder() -> WechatPayClientBuilder {
        WechatPayClientBuilder::new()
    }

    pub fn mch_credential(&self) -> &MchCredential {
        &self.mch_credential
    }

    pub fn platform_certificates(&self) -> &CertificateStore {
        &self.platform_certificates
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn verifier(&self) -> ResponseVerifier<'_> {
        ResponseVerifier::new(&self.platform_certificates).max_clock_skew(self.max_clock_skew)
    }

    /// 构造一个 v3 请求，`path` 形如 `/v3/pay/transactions/jsapi`。
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// 执行 HTTP 请求
    /// 请求发送时，先进行签名；收到响应时，先进行验签，通过后再返回。
    /// (本 crate 未实现的接口，可以通过此方法访问)
    pub async fn execute(&self, mut req: Request) -> Result<Response> {
        // 根据 https://pay.weixin.qq.com/wiki/doc/apiv3/wechatpay/wechatpay2_0.shtml#part-1
        // 给所有请求都加上 accept header。
        let headers = req.headers_mut();
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, "application/json".parse().map_err(WechatPayError::decode)?);
        }
        if !headers.contains_key(USER_AGENT_HEADER) {
            headers.insert(
                USER_AGENT_HEADER,
                self.user_agent.parse().map_err(WechatPayError::decode)?,
            );
        }

        let req = RsaSigner::new(&self.mch_credential)?.sign_request(req)?;
        log::debug!("{} {}", req.method(), req.url().path());
        let res = self.transport.execute(req).await?;

        // 请求出错时，响应中可能不存在验签相关的字段。因此直接返回 error。
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.bytes().await?;
            return match serde_json::from_slice::<WechatPayApiError>(&body) {
                Ok(e) => Err(e.into()),
                Err(_) => Err(WechatPayError::HttpStatus {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                }),
            };
        }
        self.verify_response(res).await
    }

    /// 对响应进行数字签名验证。验签需要读取完整的 body，因此返回的是重新组装的响应。
    pub(crate) async fn verify_response(&self, res: Response) -> Result<Response> {
        let status = res.status();
        let version = res.version();
        let headers = res.headers().clone();
        let body = res.bytes().await?;

        self.verifier()
            .verify(&SignatureHeaders::from_header_map(&headers)?, &body)?;

        let mut verified = http::Response::new(body.to_vec());
        *verified.status_mut() = status;
        *verified.version_mut() = version;
        *verified.headers_mut() = headers;
        Ok(verified.into())
    }

    /// GET 请求，并将响应解析为 `T`。
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.request(Method::GET, path).build()?;
        let res = self.execute(req).await?;
        Ok(serde_json::from_slice(&res.bytes().await?)?)
    }

    /// 以 JSON 为 body 的 POST 请求，并将响应解析为 `T`。
    /// 对于无 body 的响应(204)，`T` 可以是 `()`。
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let req = self
            .request(Method::POST, path)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?)
            .build()?;
        let res = self.execute(req).await?;
        let bytes = res.bytes().await?;
        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        Ok(serde_json::from_slice(bytes)?)
    }

    /// 下载平台证书，更新到证书库。
    /// 已有的证书保留，以便继续验证使用旧证书签名的响应；如配置了 certificate_dir，同时保存为 PEM 文件。
    pub async fn refresh_platform_certificates(&self) -> Result<Vec<PlatformCertificate>> {
        let platform_certificates = download_platform_certificates(
            self.transport.as_ref(),
            &self.base_url,
            &self.user_agent,
            &self.mch_credential,
        )
        .await?;
        if let Some(dir) = &self.certificate_dir {
            for c in &platform_certificates {
                c.save_pem(dir)?;
            }
        }
        self.platform_certificates
            .extend(platform_certificates.iter().cloned());
        log::info!(
            "platform certificates refreshed, {} in store",
            self.platform_certificates.len()
        );
        Ok(platform_certificates)
    }

    /// 验证回调通知的签名。`headers` 与 `body` 均为原始的 HTTP 请求内容。
    pub fn verify_notification(&self, headers: &HeaderMap, body: &[u8]) -> Result<VerifiedNotification> {
        let headers = SignatureHeaders::from_header_map(headers)?;
        VerifiedNotification::verify(&self.verifier(), &headers, body)
    }

    /// 验签，并解密通知中的资源数据。
    pub fn parse_notification<T: DeserializeOwned>(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<DecryptedNotification<T>> {
        let notification = self.verify_notification(headers, body)?;
        let data = notification.decrypt_json(self.mch_credential.mch_api_v3_key()?)?;
        Ok(DecryptedNotification {
            envelope: notification.envelope().clone(),
            data,
        })
    }

    /// 使用当前有效的最新平台证书加密敏感字段。
    /// 返回 (证书序列号, 密文)。请求时需将序列号放入 `Wechatpay-Serial` header。
    pub fn encrypt_sensitive_field(&self, plaintext: &str) -> Result<(String, String)> {
        let certificate = self.platform_certificates.newest().ok_or_else(|| {
            WechatPayError::CertificateMismatch {
                serial_no: String::new(),
            }
        })?;
        let ciphertext = encrypt_sensitive_field(plaintext, certificate.public_key())?;
        Ok((certificate.serial_no, ciphertext))
    }

    /// 生成 v3 JSAPI 调起支付的参数。
    pub fn sign_jsapi_pay(&self, prepay_id: &str) -> Result<JsApiPaySignature> {
        let app_id = self.mch_credential.app_id()?;
        Ok(RsaSigner::new(&self.mch_credential)?.sign_jsapi_pay(app_id, prepay_id))
    }

    /// 生成旧版 JSAPI 调起支付的参数。
    pub fn sign_legacy_jsapi_pay(&self, prepay_id: &str) -> Result<legacy::LegacyJsApiPayParams> {
        legacy::sign_jsapi_pay(
            self.mch_credential.app_id()?,
            prepay_id,
            self.mch_credential.mch_api_key()?,
            self.legacy_sign_type,
        )
    }

    /// 调用旧版接口。
    /// 依次：校验参数，填入 appid/mch_id/nonce_str/sign_type，签名，以 XML 发送；
    /// 收到响应后检查 return_code，验签，再检查 result_code。
    pub async fn legacy_call(&self, schema: &EndpointSchema, params: ParamSet) -> Result<ParamSet> {
        schema.validate(&params)?;
        let mut params = params;
        for name in AUTO_FIELDS {
            params.remove(name);
        }
        let secret = self.mch_credential.mch_api_key()?;
        params
            .insert("appid", self.mch_credential.app_id()?)
            .insert("mch_id", self.mch_credential.mch_id())
            .insert("nonce_str", generate_nonce_str(32))
            .insert("sign_type", self.legacy_sign_type);
        let signature = legacy::sign(&params, secret, self.legacy_sign_type)?;
        params.insert(SIGN_FIELD, signature);

        let req = self
            .client
            .post(self.url(schema.path))
            .header(CONTENT_TYPE, xml::CONTENT_TYPE)
            .header(USER_AGENT_HEADER, &self.user_agent)
            .body(xml::to_xml(&params))
            .build()?;
        log::debug!("legacy {} {}", schema.name, req.url().path());
        let res = self.transport.execute(req).await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(WechatPayError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let response = xml::from_xml(&text)?;
        legacy::check_return_code(&response)?;
        // 部分接口的响应用 sign_type 字段声明了签名类型
        let sign_type = match response.get("sign_type") {
            Some(t) => t.parse()?,
            None => self.legacy_sign_type,
        };
        legacy::verify_response(&response, secret, sign_type)?;
        legacy::check_result_code(&response)?;
        Ok(response)
    }

    /// 解析并验证旧版回调通知(XML)。
    pub fn parse_legacy_notification(&self, body: &str) -> Result<ParamSet> {
        let params = xml::from_xml(body)?;
        legacy::check_return_code(&params)?;
        let sign_type = match params.get("sign_type") {
            Some(t) => t.parse()?,
            None => self.legacy_sign_type,
        };
        legacy::verify_response(&params, self.mch_credential.mch_api_key()?, sign_type)?;
        Ok(params)
    }
}

/// builder for `WechatPayClient`.
#[derive(Default)]
pub struct WechatPayClientBuilder {
    mch_credential: Option<MchCredential>,
    platform_certificates: Option<Vec<PlatformCertificate>>,
    fetch_platform_certificates: bool,

    user_agent: Option<String>,
    base_url: Option<String>,
    transport: Option<Arc<dyn HttpTransport>>,
    legacy_sign_type: SignType,
    max_clock_skew: Option<Duration>,
    certificate_dir: Option<PathBuf>,
}

impl WechatPayClientBuilder {
    fn new() -> WechatPayClientBuilder {
        WechatPayClientBuilder {
            ..Default::default()
        }
    }

    pub fn mch_credential(&mut self, mch_credential: MchCredential) -> &mut Self {
        self.mch_credential = Some(mch_credential);
        self
    }

    /// 初始的平台证书列表。如果指定 fetch_platform_certificates，则 build 时会再下载并合并。
    pub fn platform_certificates(
        &mut self,
        platform_certificates: Vec<PlatformCertificate>,
    ) -> &mut Self {
        self.platform_certificates = Some(platform_certificates);
        self
    }

    /// build 时是否获取最新的平台证书列表。
    pub fn fetch_platform_certificates(&mut self) -> &mut Self {
        self.fetch_platform_certificates = true;
        self
    }

    /// 指定 User Agent。
    /// 如果未指定，将默认使用 "wechatpay Rust client"。
    /// 对于未指定 User Agent header 的请求，微信支付可能会拒绝。
    /// 参见 <https://pay.weixin.qq.com/wiki/doc/apiv3/wechatpay/wechatpay2_0.shtml#part-8>
    pub fn user_agent(&mut self, ua: impl Into<String>) -> &mut Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// 接口域名，默认为 `https://api.mch.weixin.qq.com`。末尾的 `/` 会被去掉。
    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// 自定义传输层，默认使用 `reqwest::Client`。
    pub fn transport(&mut self, transport: impl HttpTransport + 'static) -> &mut Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// 旧版接口的签名类型，默认为 MD5。
    pub fn legacy_sign_type(&mut self, sign_type: SignType) -> &mut Self {
        self.legacy_sign_type = sign_type;
        self
    }

    /// 验签时允许的最大时间偏差。默认不检查。
    pub fn max_clock_skew(&mut self, skew: Duration) -> &mut Self {
        self.max_clock_skew = Some(skew);
        self
    }

    /// 下载的平台证书保存到此目录。
    pub fn certificate_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.certificate_dir = Some(dir.into());
        self
    }

    pub async fn build(&mut self) -> Result<WechatPayClient> {
        let mch_credential = self
            .mch_credential
            .take()
            .ok_or(WechatPayError::ConfigMissing("mch_credential"))?;

        let ua = self.user_agent.take().unwrap_or_else(|| USER_AGENT.to_string());
        let client = Client::builder().user_agent(ua.as_str()).build()?;
        let transport = self
            .transport
            .take()
            .unwrap_or_else(|| Arc::new(client.clone()) as Arc<dyn HttpTransport>);
        let base_url = self
            .base_url
            .take()
            .unwrap_or_else(|| BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let wechatpay_client = WechatPayClient {
            client,
            transport,
            mch_credential: Arc::new(mch_credential),
            platform_certificates: Arc::new(CertificateStore::new(
                self.platform_certificates.take().unwrap_or_default(),
            )),
            base_url,
            user_agent: ua,
            legacy_sign_type: self.legacy_sign_type,
            max_clock_skew: self.max_clock_skew,
            certificate_dir: self.certificate_dir.take(),
        };

        if self.fetch_platform_certificates {
            wechatpay_client.refresh_platform_certificates().await?;
        }
        if wechatpay_client.platform_certificates.is_empty() {
            log::warn!("no platform certificates, v3 responses cannot be verified");
        }
        Ok(wechatpay_client)
    }
}
