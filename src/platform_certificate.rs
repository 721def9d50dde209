//! 微信支付平台证书。

use crate::credential::MchCredential;
use crate::error::{Result, WechatPayError, WechatPayApiError};
use crate::notify::aes_256_gcm_decrypt;
use crate::signer::RsaSigner;
use crate::transport::HttpTransport;
use crate::util::datetime_fmt;
use crate::verifier::{verify_rsa_sha256, ResponseVerifier, SignatureHeaders};
use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, Request, Url};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::{DecodePem, EncodePem};
use x509_cert::time::Time;
use x509_cert::Certificate;

/// 下载平台证书的接口路径。
pub const CERTIFICATES_PATH: &str = "/v3/certificates";

/// 微信支付平台证书。
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PlatformCertificate {
    pub serial_no: String,
    pub effective_time: DateTime<Local>,
    pub expire_time: DateTime<Local>,
    pub certificate: Certificate,
    public_key: RsaPublicKey,
}

impl PlatformCertificate {
    /// 解析 PEM 格式的平台证书。序列号与有效期均取自证书本身。
    pub fn from_pem(pem: impl AsRef<[u8]>) -> Result<Self> {
        let certificate = Certificate::from_pem(pem)
            .map_err(|e| WechatPayError::DecodeFailed(format!("x509 certificate: {}", e)))?;
        let public_key = extract_public_key(&certificate)?;
        let tbs = &certificate.tbs_certificate;
        let serial_no = serial_to_hex(tbs.serial_number.as_bytes());
        let effective_time = x509_time(&tbs.validity.not_before)?;
        let expire_time = x509_time(&tbs.validity.not_after)?;

        Ok(PlatformCertificate {
            serial_no,
            effective_time,
            expire_time,
            certificate,
            public_key,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// 是否处于有效期内。
    pub fn is_valid_at(&self, now: DateTime<Local>) -> bool {
        self.effective_time <= now && now < self.expire_time
    }

    /// 重新编码为 PEM。
    pub fn to_pem(&self) -> Result<String> {
        self.certificate
            .to_pem(LineEnding::LF)
            .map_err(WechatPayError::decode)
    }

    /// 使用平台公钥验证 SHA256withRSA 签名。`signature` 为 base64 编码。
    pub fn verify_signature(&self, msg: &[u8], signature: &str) -> Result<()> {
        verify_rsa_sha256(&self.public_key, msg, signature).map_err(|e| match e {
            WechatPayError::SignatureMismatch(_) => WechatPayError::SignatureMismatch(format!(
                "signature verification failed with certificate {}",
                self.serial_no
            )),
            e => e,
        })
    }

    /// 将 PEM 保存到 `dir/<serial_no>.pem`。
    pub fn save_pem(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.pem", self.serial_no));
        std::fs::write(&path, self.to_pem()?)?;
        log::debug!("saved platform certificate to {}", path.display());
        Ok(())
    }
}

fn extract_public_key(certificate: &Certificate) -> Result<RsaPublicKey> {
    let bytes = certificate
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();

    RsaPublicKey::from_pkcs1_der(bytes)
        .map_err(|e| WechatPayError::DecodeFailed(format!("public key from certificate: {}", e)))
}

/// 证书序列号的十六进制大写形式，去掉 DER 编码为保持正数而补的前导 0。
fn serial_to_hex(bytes: &[u8]) -> String {
    let mut bytes = bytes;
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes = &bytes[1..];
    }
    hex::encode_upper(bytes)
}

fn x509_time(t: &Time) -> Result<DateTime<Local>> {
    let secs = t.to_unix_duration().as_secs() as i64;
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.with_timezone(&Local))
        .ok_or_else(|| WechatPayError::DecodeFailed(format!("invalid certificate time: {}", secs)))
}

/// 平台证书存储，以序列号为键。
/// 读多写少：读取时克隆当前快照的 `Arc`，写入时整体替换快照。
#[derive(Debug, Default)]
pub struct CertificateStore {
    certificates: RwLock<Arc<HashMap<String, PlatformCertificate>>>,
}

impl CertificateStore {
    pub fn new(certificates: impl IntoIterator<Item = PlatformCertificate>) -> Self {
        let store = CertificateStore::default();
        store.extend(certificates);
        store
    }

    /// 当前快照。
    pub fn snapshot(&self) -> Arc<HashMap<String, PlatformCertificate>> {
        self.certificates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 根据 serial_no 获取平台证书。
    pub fn get(&self, serial_no: &str) -> Option<PlatformCertificate> {
        self.snapshot().get(serial_no).cloned()
    }

    /// 新增或更新一个证书。
    pub fn put(&self, certificate: PlatformCertificate) {
        self.extend(std::iter::once(certificate));
    }

    /// 批量新增或更新。
    pub fn extend(&self, certificates: impl IntoIterator<Item = PlatformCertificate>) {
        let mut guard = self
            .certificates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut map = HashMap::clone(&guard);
        for c in certificates {
            map.insert(c.serial_no.clone(), c);
        }
        *guard = Arc::new(map);
    }

    /// 用给定的证书替换全部证书。
    pub fn replace_all(&self, certificates: impl IntoIterator<Item = PlatformCertificate>) {
        let map = certificates
            .into_iter()
            .map(|c| (c.serial_no.clone(), c))
            .collect();
        *self
            .certificates
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
    }

    /// 当前有效、且生效时间最晚的证书。加密敏感信息时使用。
    pub fn newest(&self) -> Option<PlatformCertificate> {
        let now = Local::now();
        self.snapshot()
            .values()
            .filter(|c| c.is_valid_at(now))
            .max_by_key(|c| c.effective_time)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 下载并解密平台证书。
/// 此接口与其他接口不同：需要先解密响应中的证书，再用其中的证书对响应验签。
pub async fn download_platform_certificates(
    transport: &dyn HttpTransport,
    base_url: &str,
    user_agent: &str,
    mch_credential: &MchCredential,
) -> Result<Vec<PlatformCertificate>> {
    #[derive(Deserialize)]
    struct EncryptedCertificate {
        algorithm: String,
        nonce: String,
        associated_data: String,
        ciphertext: String,
    }

    #[derive(Deserialize)]
    struct PlatformCertificateItem {
        serial_no: String,
        #[serde(with = "datetime_fmt")]
        effective_time: DateTime<Local>,
        #[serde(with = "datetime_fmt")]
        expire_time: DateTime<Local>,
        encrypt_certificate: EncryptedCertificate,
    }

    #[derive(Deserialize)]
    struct GetPlatformCertificatesRes {
        data: Vec<PlatformCertificateItem>,
    }

    // 签名所需的配置先于任何网络请求检查。
    let signer = RsaSigner::new(mch_credential)?;
    let api_v3_key = mch_credential.mch_api_v3_key()?;

    let url = Url::parse(&format!("{}{}", base_url, CERTIFICATES_PATH))
        .map_err(WechatPayError::decode)?;
    let mut req = Request::new(Method::GET, url);
    req.headers_mut()
        .insert(ACCEPT, "application/json".parse().map_err(WechatPayError::decode)?);
    req.headers_mut()
        .insert(USER_AGENT, user_agent.parse().map_err(WechatPayError::decode)?);
    let req = signer.sign_request(req)?;

    log::debug!("downloading platform certificates");
    let res = transport.execute(req).await?;
    if !res.status().is_success() {
        let e: WechatPayApiError = res.json().await?;
        return Err(e.into());
    }

    let headers = SignatureHeaders::from_header_map(res.headers())?;
    let body = res.bytes().await?;

    let mut platform_certificates = vec![];
    for item in serde_json::from_slice::<GetPlatformCertificatesRes>(&body)?.data {
        let enc = &item.encrypt_certificate;
        if enc.algorithm != crate::notify::AEAD_AES_256_GCM {
            return Err(WechatPayError::UnsupportedAlgorithm(enc.algorithm.clone()));
        }
        let pem = aes_256_gcm_decrypt(
            api_v3_key,
            enc.associated_data.as_bytes(),
            enc.nonce.as_bytes(),
            &enc.ciphertext,
        )?;
        let mut certificate = PlatformCertificate::from_pem(&pem)?;
        if certificate.serial_no != item.serial_no {
            return Err(WechatPayError::CertificateMismatch {
                serial_no: item.serial_no,
            });
        }
        certificate.effective_time = item.effective_time;
        certificate.expire_time = item.expire_time;
        platform_certificates.push(certificate);
    }

    // 用刚解密出的证书对下载响应本身验签。
    let downloaded = CertificateStore::new(platform_certificates.clone());
    ResponseVerifier::new(&downloaded).verify(&headers, &body)?;

    log::info!(
        "downloaded {} platform certificates",
        platform_certificates.len()
    );
    Ok(platform_certificates)
}
