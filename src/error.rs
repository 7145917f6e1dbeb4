use std::io;
use thiserror::Error;

/// 代理统一的错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 配置错误（服务启动时致命）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 协议解析错误（只影响单个连接）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 拨号后端失败
    #[error("Failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    /// 超时
    #[error("Timed out while {0}")]
    Timeout(&'static str),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ProxyError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        ProxyError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Config(format!("JSON parse error: {}", err))
    }
}
