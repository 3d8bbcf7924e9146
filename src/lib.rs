//! 一个流水线式的 RESP 客户端。
//!
//! 所有命令都写入同一个长连接，回复按命令发出的顺序逐个片段地交给调用者，
//! 很大的回复不需要完整地缓存在内存里。连接故障后会在一段延时之后自动重连。

pub mod client;
pub use client::Client;

pub mod cmd;
pub use cmd::Command;

pub mod codec;
pub use codec::{Decoder, Fragment};

pub mod config;
pub use config::ClientConfig;

mod connection;
pub use connection::State;

mod dispatcher;

mod error;
pub use error::{Error, Result};

pub mod frame;
pub use frame::Frame;

mod shutdown;
use shutdown::Shutdown;

pub mod stream;
pub use stream::ReplyStream;

/// 默认端口。
pub const DEFAULT_PORT: u16 = 6379;
