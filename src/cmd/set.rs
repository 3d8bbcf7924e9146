use bytes::Bytes;

use crate::{codec::encode_command, Error, Frame};

/// 单个帧的大小上限。
pub const MAX_FRAME_BYTES: usize = 512 * 1023 * 1024;

/// 为值的长度标记预留的字节数。
const SIZE_MARKER_LEN: usize = 10;

/// 设置 key-value 对
///
/// 格式：SET <key> <value> [NX] [GET]
///
/// `NX`表示只在 key 不存在时设置；`GET`表示回复原有的值（不存在时为空值），
/// 否则成功时回复`OK`。
#[derive(Debug)]
pub struct Set {
    key: String,
    value: Bytes,
    // 只在 key 不存在时设置。
    nx: bool,
    // 回复原有的值。
    get: bool,
}

impl Set {
    /// 创建一个`Set`命令。
    pub fn new(key: impl ToString, value: Bytes) -> Set {
        Set {
            key: key.to_string(),
            value,
            nx: false,
            get: false,
        }
    }

    /// 只在 key 不存在时设置，并回复原有的值。
    pub fn if_absent_get(mut self) -> Set {
        self.nx = true;
        self.get = true;
        self
    }

    /// 获取 key。
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 给定 key 时，value 允许的最大字节数。
    ///
    /// 上限是`MAX_FRAME_BYTES`减去命令中除 value 以外的部分，再减去长度标记预留的字节。
    pub fn max_value_len(key: &str) -> usize {
        let prefix = encode_command(&[&b"SET"[..], key.as_bytes(), &b""[..]]).len();
        MAX_FRAME_BYTES.saturating_sub(prefix + SIZE_MARKER_LEN)
    }

    /// 在发送前检查 value 的长度。
    ///
    /// # Errors
    /// 超过上限时返回`Error::ValueTooLarge`。
    pub fn check(&self) -> crate::Result<()> {
        let max = Set::max_value_len(&self.key);
        if self.value.len() > max {
            return Err(Error::ValueTooLarge {
                len: self.value.len(),
                max,
            });
        }
        Ok(())
    }

    /// 将命令转换为等价的`Frame`
    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"SET"));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(self.value);
        if self.nx {
            frame.push_bulk(Bytes::from_static(b"NX"));
        }
        if self.get {
            frame.push_bulk(Bytes::from_static(b"GET"));
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_value_len_subtracts_prefix_and_marker() {
        // *3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n
        let prefix = 4 + 9 + 7 + 6;
        assert_eq!(Set::max_value_len("k"), MAX_FRAME_BYTES - prefix - 10);
    }

    #[test]
    fn value_at_limit_passes_and_one_more_fails() {
        let max = Set::max_value_len("big");
        assert!(Set::new("big", Bytes::from(vec![0u8; max])).check().is_ok());
        assert!(matches!(
            Set::new("big", Bytes::from(vec![0u8; max + 1])).check(),
            Err(Error::ValueTooLarge { len, max: m }) if len == max + 1 && m == max
        ));
    }

    #[test]
    fn conditional_set_frame() {
        let frame = Set::new("k", Bytes::from_static(b"v")).if_absent_get().into_frame();
        assert_eq!(frame.to_string(), "SET k v NX GET");
    }
}
