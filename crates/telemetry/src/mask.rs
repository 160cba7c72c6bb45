//! 日志脱敏

/// 需要脱敏的参数名（小写比较）
pub const SENSITIVE_KEYS: &[&str] = &["password", "password_hash", "token", "secret"];

const MASK: &str = "***";

/// 按参数名脱敏，返回可直接写入日志的 `name=value` 列表
pub fn mask_sensitive<'a, I>(params: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    params
        .into_iter()
        .map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            if SENSITIVE_KEYS.iter().any(|k| lowered.contains(k)) {
                format!("{}={}", name, MASK)
            } else {
                format!("{}={}", name, value)
            }
        })
        .collect()
}
