//! HTTP 传输层。连接池、超时、重试等均由实现方负责。

use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Request, Response};

/// 执行一个已签名的 HTTP 请求。
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, req: Request) -> Result<Response>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, req: Request) -> Result<Response> {
        Ok(reqwest::Client::execute(self, req).await?)
    }
}
