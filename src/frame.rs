//! 提供表示 Redis 协议帧的类型，以及帧的编码和由片段重组帧的工具。

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Fragment;

/// Redis 协议帧
/// 官方文档：https://redis.io/docs/reference/protocol-spec/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    // 简单字符串，通常用于表示响应，比如返回“OK”表示成功。
    // 例子：+OK\r\n
    Simple(Bytes),

    // 错误，通常用于返回错误信息。
    // 格式：-<message>\r\n
    Error(Bytes),

    // 整数，保留线上的十进制文本，需要时再解析。
    // 格式：:<value>\r\n
    Integer(Bytes),

    // 大型字符串，长度任意，二进制安全。
    // 格式：$<length>\r\n<data>\r\n
    Bulk(Bytes),

    // 数组类型。客户端发送的命令都是`Array`类型的`Frame`。
    // 格式：*<number-of-elements>\r\n<element-1>...<element-n>
    // 服务端推送的`>`帧也重组为`Array`。
    Array(Vec<Frame>),

    // 空值。`$-1\r\n`、`*-1\r\n`与`_\r\n`对调用者来说是同一个值。
    Null,
}

impl Frame {
    /// 返回一个空的帧数组，每个合法的命令都是一个帧数组。
    pub(crate) fn array() -> Frame {
        Frame::Array(vec![])
    }

    /// 往帧数组中加入`Bulk`帧。
    ///
    /// # Panics
    ///
    /// 如果`self`不是一个数组，程序崩溃。
    pub(crate) fn push_bulk(&mut self, bytes: Bytes) {
        match self {
            Frame::Array(vec) => {
                vec.push(Frame::Bulk(bytes));
            }
            _ => panic!("这不是一个帧数组"),
        }
    }

    /// 将`Frame`编码后写入`dst`。
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(val) => {
                dst.put_u8(b'+');
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Error(val) => {
                dst.put_u8(b'-');
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(val) => {
                dst.put_u8(b':');
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(val) => {
                dst.put_u8(b'$');
                put_decimal(dst, val.len());
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(parts) => {
                dst.put_u8(b'*');
                put_decimal(dst, parts.len());
                for part in parts {
                    part.encode(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
        }
    }

    /// 将片段序列重组为完整的`Frame`序列。
    ///
    /// 被拆开的`Bulk`片段会被拼接，数组头之后的片段按先序归入数组。
    ///
    /// # Errors
    /// 如果片段序列在某个值的中间结束，返回`Error::Protocol`。
    pub fn assemble<I>(fragments: I) -> crate::Result<Vec<Frame>>
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut out = Vec::new();
        // 尚未填满的数组：(已有元素, 还差的元素个数)。
        let mut stack: Vec<(Vec<Frame>, usize)> = Vec::new();
        let mut pending_bulk: Option<BytesMut> = None;

        for fragment in fragments {
            let value = match fragment {
                Fragment::Bulk { data, last: false } => {
                    pending_bulk
                        .get_or_insert_with(BytesMut::new)
                        .extend_from_slice(&data);
                    continue;
                }
                Fragment::Bulk { data, last: true } => match pending_bulk.take() {
                    Some(mut buf) => {
                        buf.extend_from_slice(&data);
                        Frame::Bulk(buf.freeze())
                    }
                    None => Frame::Bulk(data),
                },
                Fragment::Array(0) | Fragment::Push(0) => Frame::Array(vec![]),
                Fragment::Array(len) | Fragment::Push(len) => {
                    stack.push((Vec::with_capacity(len.min(1024)), len));
                    continue;
                }
                Fragment::Simple(s) => Frame::Simple(s),
                Fragment::Error(s) => Frame::Error(s),
                Fragment::Integer(s) => Frame::Integer(s),
                Fragment::Null => Frame::Null,
            };
            push_value(&mut out, &mut stack, value);
        }

        if !stack.is_empty() || pending_bulk.is_some() {
            return Err(crate::Error::Protocol("片段序列不完整".into()));
        }
        Ok(out)
    }
}

/// 把一个完整的值放入最内层的数组，数组填满后逐层向外归并。
fn push_value(out: &mut Vec<Frame>, stack: &mut Vec<(Vec<Frame>, usize)>, mut value: Frame) {
    loop {
        match stack.last_mut() {
            None => {
                out.push(value);
                return;
            }
            Some((items, remaining)) => {
                items.push(value);
                *remaining -= 1;
                if *remaining > 0 {
                    return;
                }
            }
        }
        // 最内层的数组已经填满。
        let (items, _) = stack.pop().unwrap_or_default();
        value = Frame::Array(items);
    }
}

/// 写入十进制数以及`\r\n`。
pub(crate) fn put_decimal(dst: &mut BytesMut, val: usize) {
    dst.put_slice(val.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

// 方便进行比较。
impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Frame::Simple(s) | Frame::Bulk(s) => s == other.as_bytes(),
            _ => false,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use std::str;

        match self {
            Frame::Simple(msg) | Frame::Bulk(msg) => match str::from_utf8(msg) {
                Ok(string) => string.fmt(fmt),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Frame::Error(msg) => write!(fmt, "error: {}", String::from_utf8_lossy(msg)),
            Frame::Integer(num) => String::from_utf8_lossy(num).fmt(fmt),
            Frame::Null => "(nil)".fmt(fmt),
            Frame::Array(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        // 使用空格作为分隔符。
                        write!(fmt, " ")?;
                    }

                    part.fmt(fmt)?;
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_command_array() {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from_static(b"GET"));
        frame.push_bulk(Bytes::from_static(b"key"));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn assembles_split_bulk_inside_array() {
        let fragments = vec![
            Fragment::Array(2),
            Fragment::Bulk {
                data: Bytes::from_static(b"he"),
                last: false,
            },
            Fragment::Bulk {
                data: Bytes::from_static(b"llo"),
                last: true,
            },
            Fragment::Null,
            Fragment::Integer(Bytes::from_static(b"7")),
        ];
        let frames = Frame::assemble(fragments).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"hello")), Frame::Null]),
                Frame::Integer(Bytes::from_static(b"7")),
            ]
        );
    }

    #[test]
    fn assembles_nested_arrays() {
        let fragments = vec![
            Fragment::Array(2),
            Fragment::Array(1),
            Fragment::Simple(Bytes::from_static(b"a")),
            Fragment::Array(0),
        ];
        let frames = Frame::assemble(fragments).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Array(vec![
                Frame::Array(vec![Frame::Simple(Bytes::from_static(b"a"))]),
                Frame::Array(vec![]),
            ])]
        );
    }

    #[test]
    fn unfinished_array_is_rejected() {
        let fragments = vec![Fragment::Array(2), Fragment::Null];
        assert!(matches!(
            Frame::assemble(fragments),
            Err(crate::Error::Protocol(_))
        ));
    }

    #[test]
    fn compares_with_str() {
        assert_eq!(Frame::Simple(Bytes::from_static(b"OK")), "OK");
        assert_ne!(Frame::Integer(Bytes::from_static(b"1")), "1");
    }
}
