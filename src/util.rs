use rand::Rng;
use subtle::ConstantTimeEq;

/// 日期时间格式，形如 `2018-06-08T10:34:56+08:00`。
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// 根据 DATETIME_FORMAT 格式序列化/反序列化日期时间。
pub mod datetime_fmt {
    use super::DATETIME_FORMAT;
    use chrono::{DateTime, FixedOffset, Local};
    use serde::{Deserialize, Deserializer, Serializer};

    /// 根据 DATETIME_FORMAT 格式解析日期时间字符串。形如 `2018-06-08T10:34:56+08:00`。
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let dt = DateTime::<FixedOffset>::parse_from_str(&s, DATETIME_FORMAT)
            .map_err(serde::de::Error::custom)?;
        Ok(dt.with_timezone(&Local))
    }

    /// 根据 DATETIME_FORMAT 格式格式化日期时间字符串。形如 `2018-06-08T10:34:56+08:00`。
    pub fn serialize<S>(dt: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = format!("{}", dt.format(DATETIME_FORMAT));
        serializer.serialize_str(&s)
    }
}

/// 生成随机的 nonce_str
pub fn generate_nonce_str(n: usize) -> String {
    // 去掉了符号及容易混淆的字符等，比如 0, o, O, 1, l, i, I。
    const ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect::<String>()
}

/// 常量时间比较两个签名字符串。
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// 当前 Unix 时间戳(秒)。
pub(crate) fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
