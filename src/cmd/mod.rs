mod get;
pub use get::Get;

mod set;
pub use set::{Set, MAX_FRAME_BYTES};

mod del;
pub use del::Del;

mod keys;
pub use keys::Keys;

mod getdel;
pub use getdel::GetDel;

mod publish;
pub use publish::Publish;

mod ping;
pub use ping::Ping;

use crate::Frame;

/// 支持的命令的枚举。
#[derive(Debug)]
pub enum Command {
    Get(Get),
    Set(Set),
    Del(Del),
    Keys(Keys),
    GetDel(GetDel),
    Publish(Publish),
    Ping(Ping),
}

impl Command {
    /// 将命令转换为等价的`Frame`，发送的命令都是由`Bulk`组成的`Array`。
    pub fn into_frame(self) -> Frame {
        use Command::*;
        match self {
            Get(cmd) => cmd.into_frame(),
            Set(cmd) => cmd.into_frame(),
            Del(cmd) => cmd.into_frame(),
            Keys(cmd) => cmd.into_frame(),
            GetDel(cmd) => cmd.into_frame(),
            Publish(cmd) => cmd.into_frame(),
            Ping(cmd) => cmd.into_frame(),
        }
    }

    /// 命令操作的 key，`KEYS`返回匹配模式。
    pub(crate) fn key(&self) -> Option<&str> {
        match self {
            Command::Get(cmd) => Some(cmd.key()),
            Command::Set(cmd) => Some(cmd.key()),
            Command::Del(cmd) => Some(cmd.key()),
            Command::Keys(cmd) => Some(cmd.pattern()),
            Command::GetDel(cmd) => Some(cmd.key()),
            Command::Publish(_) | Command::Ping(_) => None,
        }
    }

        pub(crate) fn get_name(&self) -> &str {
        match self {
            Command::Get(_) => "get",
            Command::Set(_) => "set",
            Command::Del(_) => "del",
            Command::Keys(_) => "keys",
            Command::GetDel(_) => "getdel",
            Command::Publish(_) => "publish",
            Command::Ping(_) => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_of_each_command() {
        assert_eq!(Command::Get(Get::new("a")).key(), Some("a"));
        assert_eq!(Command::GetDel(GetDel::new("b")).key(), Some("b"));
        assert_eq!(Command::Keys(Keys::new("user:*")).key(), Some("user:*"));
        assert_eq!(Command::Ping(Ping::new(None)).key(), None);
    }
}
