//! 错误类型
//!
//! 大部分 IO / 存储错误直接用 anyhow 向上传递，这里只定义需要被调用方区分的错误。

use thiserror::Error;

/// 配置错误（在任何 IO 之前报告）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("不支持的协议 `{0}`，仅支持 file:// 和 s3://")]
    UnsupportedScheme(String),

    #[error("无效的同步地址 `{0}`")]
    InvalidUri(String),

    #[error("s3 同步需要 --access-key 和 --access-secret")]
    MissingCredentials,
}

/// 索引文件解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("索引第 {line_number} 行格式错误: {line:?}")]
    MalformedLine { line_number: usize, line: String },
}
