//! 旧版接口的参数集合及其规范化(待签名串)。

use crate::error::{Result, WechatPayError};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// 签名字段名。规范化时总是排除。
pub const SIGN_FIELD: &str = "sign";

/// 参数集合。按字段名字节序升序保存，因此与插入顺序无关。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    fields: BTreeMap<String, String>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖一个字段。值通过 `Display` 转为字符串，整数即十进制，无本地化格式。
    pub fn insert(&mut self, name: impl Into<String>, value: impl Display) -> &mut Self {
        self.fields.insert(name.into(), value.to_string());
        self
    }

    /// 仅当 `value` 为 `Some` 时插入。
    pub fn insert_opt<V: Display>(&mut self, name: impl Into<String>, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.insert(name, value);
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// 获取必填字段，缺失时返回 `DecodeFailed`。
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| WechatPayError::DecodeFailed(format!("missing field `{}`", name)))
    }

    /// 获取必填字段并解析为 `T`，缺失或类型不符时返回 `DecodeFailed`。
    pub fn require_parsed<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.require(name)?;
        raw.parse::<T>().map_err(|e| {
            WechatPayError::DecodeFailed(format!("field `{}` = {:?}: {}", name, raw, e))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 待签名串：`k1=v1&k2=v2...`。
    /// 排除 `sign` 字段；值为空的字段不参与签名。
    pub fn canonical_string(&self) -> String {
        let mut s = String::new();
        for (k, v) in self.iter() {
            if k == SIGN_FIELD || v.is_empty() {
                continue;
            }
            if !s.is_empty() {
                s.push('&');
            }
            s.push_str(k);
            s.push('=');
            s.push_str(v);
        }
        s
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = ParamSet::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}
