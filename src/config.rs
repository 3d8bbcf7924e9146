//! 客户端配置。

use std::time::Duration;

use crate::DEFAULT_PORT;

/// 连接故障后，等待多久再重新连接。
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// 建立连接加上握手的总时限。
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 每个回复的数据流最多缓存的片段个数。
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// 调用者读得慢时，正在接收的回复最多在客户端暂存多少字节，超过后停止读取 socket。
pub const DEFAULT_MAX_PARKED_BYTES: usize = 4 * 1024 * 1024;

/// 客户端配置。
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 服务器地址，例如`127.0.0.1:6379`。
    pub addr: String,

    /// 连接建立后立即发送的握手命令，`None`表示不握手。
    pub handshake: Option<Vec<String>>,

    pub reconnect_delay: Duration,

    pub connect_timeout: Duration,

    /// 连接空闲（没有任何读写）超过这个时间视为故障。
    pub idle_timeout: Option<Duration>,

    pub stream_capacity: usize,

    /// 正在接收的回复最多暂存多少字节。
    ///
    /// 在读完一个回复之前发出的新命令，只有在这个回复剩下的部分能被暂存时才能得到回复。
    pub max_parked_bytes: usize,
}

impl ClientConfig {
    /// 使用默认配置连接指定地址。
    pub fn new(addr: impl Into<String>) -> ClientConfig {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            handshake: Some(vec!["HELLO".to_string(), "3".to_string()]),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            max_parked_bytes: DEFAULT_MAX_PARKED_BYTES,
        }
    }
}
