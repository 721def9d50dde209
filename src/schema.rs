//! 旧版接口的参数表。每个接口声明必填与可选字段，外加可选的校验钩子，
//! 由 `WechatPayClient::legacy_call` 统一完成校验、签名、发送与验签。

use crate::error::{Result, WechatPayError};
use crate::params::{ParamSet, SIGN_FIELD};

/// 由请求流程自动填入的字段，调用方无需也不应传入。
pub const AUTO_FIELDS: &[&str] = &["appid", "mch_id", "nonce_str", "sign_type", SIGN_FIELD];

/// 接口参数表。
#[derive(Debug, Clone, Copy)]
pub struct EndpointSchema {
    pub name: &'static str,
    /// 接口路径，例如 `/pay/unifiedorder`。
    pub path: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    /// 接口特有的校验，例如“transaction_id 与 out_trade_no 二选一”。
    pub check: Option<fn(&ParamSet) -> Result<()>>,
}

impl EndpointSchema {
    /// 校验调用方传入的参数：必填字段齐全且非空，没有未声明的字段。
    pub fn validate(&self, params: &ParamSet) -> Result<()> {
        for name in self.required {
            match params.get(name) {
                Some(v) if !v.is_empty() => {}
                _ => {
                    return Err(WechatPayError::InvalidParams(format!(
                        "{}: missing required field `{}`",
                        self.name, name
                    )))
                }
            }
        }
        for (name, _) in params.iter() {
            if !self.required.contains(&name) && !self.optional.contains(&name) {
                return Err(WechatPayError::InvalidParams(format!(
                    "{}: unexpected field `{}`",
                    self.name, name
                )));
            }
        }
        if let Some(check) = self.check {
            check(params)?;
        }
        Ok(())
    }
}

/// 给定字段中恰好出现一个。
pub fn exactly_one_of(params: &ParamSet, fields: &[&str]) -> Result<()> {
    let n = fields
        .iter()
        .filter(|f| params.get(f).map_or(false, |v| !v.is_empty()))
        .count();
    if n != 1 {
        return Err(WechatPayError::InvalidParams(format!(
            "exactly one of {:?} is required, got {}",
            fields, n
        )));
    }
    Ok(())
}

fn check_trade_id(params: &ParamSet) -> Result<()> {
    exactly_one_of(params, &["transaction_id", "out_trade_no"])
}

fn check_unified_order(params: &ParamSet) -> Result<()> {
    let required = match params.get("trade_type") {
        Some("JSAPI") => Some("openid"),
        Some("NATIVE") => Some("product_id"),
        _ => None,
    };
    if let Some(field) = required {
        if params.get(field).map_or(true, str::is_empty) {
            return Err(WechatPayError::InvalidParams(format!(
                "unifiedorder: `{}` is required for this trade_type",
                field
            )));
        }
    }
    Ok(())
}

fn check_refund_query(params: &ParamSet) -> Result<()> {
    exactly_one_of(
        params,
        &["transaction_id", "out_trade_no", "out_refund_no", "refund_id"],
    )
}

/// 统一下单
pub const UNIFIED_ORDER: EndpointSchema = EndpointSchema {
    name: "unifiedorder",
    path: "/pay/unifiedorder",
    required: &[
        "body",
        "out_trade_no",
        "total_fee",
        "spbill_create_ip",
        "notify_url",
        "trade_type",
    ],
    optional: &[
        "device_info",
        "detail",
        "attach",
        "fee_type",
        "time_start",
        "time_expire",
        "goods_tag",
        "product_id",
        "limit_pay",
        "openid",
        "receipt",
        "profit_sharing",
        "scene_info",
    ],
    check: Some(check_unified_order),
};

/// 查询订单
pub const ORDER_QUERY: EndpointSchema = EndpointSchema {
    name: "orderquery",
    path: "/pay/orderquery",
    required: &[],
    optional: &["transaction_id", "out_trade_no"],
    check: Some(check_trade_id),
};

/// 关闭订单
pub const CLOSE_ORDER: EndpointSchema = EndpointSchema {
    name: "closeorder",
    path: "/pay/closeorder",
    required: &["out_trade_no"],
    optional: &[],
    check: None,
};

/// 申请退款。此接口需要商户证书双向认证，由传输层负责。
pub const REFUND: EndpointSchema = EndpointSchema {
    name: "refund",
    path: "/secapi/pay/refund",
    required: &["out_refund_no", "total_fee", "refund_fee"],
    optional: &[
        "transaction_id",
        "out_trade_no",
        "refund_fee_type",
        "refund_desc",
        "refund_account",
        "notify_url",
    ],
    check: Some(check_trade_id),
};

/// 查询退款
pub const REFUND_QUERY: EndpointSchema = EndpointSchema {
    name: "refundquery",
    path: "/pay/refundquery",
    required: &[],
    optional: &[
        "transaction_id",
        "out_trade_no",
        "out_refund_no",
        "refund_id",
        "offset",
    ],
    check: Some(check_refund_query),
};
