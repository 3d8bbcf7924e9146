//! 命令的编码与回复的增量解码。
//!
//! 网络上收到的字节块与回复的边界没有任何关系：一个块可能只含有某个大型字符串的一小段，
//! 也可能在一个回复的结尾之后紧接着下一个回复的开头。`Decoder`在多次调用之间保存
//! 未完成的状态，每次只需要把新到达的块交给它。
//!
//! 解码结果是一串`Fragment`，数组被展开为先序的片段序列，大型字符串可能被拆成多段。
//! 用`Frame::assemble`可以把片段重组为完整的`Frame`。

use bytes::{Buf, Bytes, BytesMut};

use crate::frame::put_decimal;
use crate::Error;

/// 头部行的最大长度，超过后仍找不到`\r\n`视为协议错误。
const MAX_LINE: usize = 64 * 1024;

/// 回复中一个可以立即交给调用者的片段。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    Simple(Bytes),
    /// 数组内部的错误元素。顶层的错误回复以`Status::ServerError`返回。
    Error(Bytes),
    /// 十进制文本。
    Integer(Bytes),
    /// 大型字符串的一段数据，`last`为`true`表示该字符串已经完整。
    Bulk { data: Bytes, last: bool },
    /// 空值，`$-1`、`*-1`与`_`都解码为它。
    Null,
    /// 数组头，之后紧跟着它的元素。
    Array(usize),
    /// 推送帧头，之后紧跟着它的元素。
    Push(usize),
}

impl Fragment {
    /// 返回标量片段携带的数据。
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Fragment::Simple(data)
            | Fragment::Error(data)
            | Fragment::Integer(data)
            | Fragment::Bulk { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Fragment::Null)
    }

    /// 把`Integer`片段解析为`i64`。
    ///
    /// # Errors
    /// 如果片段不是整数或文本无法解析，返回`Err`。
    pub fn to_integer(&self) -> crate::Result<i64> {
        match self {
            Fragment::Integer(text) => parse_integer(text),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }
}

/// 一次`decode`调用的结果。
#[derive(Debug)]
pub struct Decoded {
    pub fragments: Vec<Fragment>,
    pub status: Status,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Status {
    /// 回复还没有结束，需要更多字节。
    Incomplete,
    /// 回复已经完整，`rest`属于之后的回复。
    Complete { rest: Bytes },
    /// 服务器返回了错误回复，`rest`属于之后的回复。
    ServerError { message: Bytes, rest: Bytes },
}

/// 一个回复的增量解码器，也就是这个回复的部分解码状态。
///
/// 解码器按回复独占：每个等待中的请求持有自己的`Decoder`，
/// 只有队首的请求会真正被喂入字节。
#[derive(Debug, Default)]
pub struct Decoder {
    // 还没有凑成完整头部行的字节。
    line: BytesMut,

    // 进行中的数组还差的元素个数，栈底是最外层。
    stack: Vec<usize>,

    // 进行中的大型字符串还差的数据字节数。
    bulk: Option<usize>,

    // 大型字符串数据之后还没读到的`\r\n`字节数。
    trailer: usize,

    // 顶层是`>`推送帧，这样的回复在这一层永远不会结束。
    push: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// 尚未收到这个回复的任何字节。
    pub fn is_fresh(&self) -> bool {
        self.line.is_empty()
            && self.stack.is_empty()
            && self.bulk.is_none()
            && self.trailer == 0
            && !self.push
    }

    /// 解码新到达的字节块。
    ///
    /// 把一个合法的回复任意拆成若干块依次传入，得到的片段经过`Frame::assemble`
    /// 重组后，与一次性传入整个回复的结果相同。
    ///
    /// # Errors
    /// 遇到不合法的类型符、头部行或者大型字符串结尾时返回`Error::Protocol`，
    /// 之后这个解码器不应再被使用。
    pub fn decode(&mut self, mut chunk: Bytes) -> crate::Result<Decoded> {
        let mut fragments = Vec::new();

        if !self.line.is_empty() {
            // 上次残留的半行只拼接到行尾为止，之后的字节仍然直接从块上切片。
            let Some(end) = self.line_end(&chunk) else {
                if self.line.len() + chunk.len() > MAX_LINE {
                    return Err(Error::Protocol("头部行过长".into()));
                }
                self.line.extend_from_slice(&chunk);
                return Ok(Decoded {
                    fragments,
                    status: Status::Incomplete,
                });
            };
            self.line.extend_from_slice(&chunk[..end]);
            chunk.advance(end);
            let line = self.line.split().freeze();

            // 整行以`\r\n`结尾，回复若在这一行结束，剩下的字节都在`chunk`里。
            match self.run(line, &mut fragments)? {
                Status::Incomplete => {}
                Status::Complete { .. } => {
                    return Ok(Decoded {
                        fragments,
                        status: Status::Complete { rest: chunk },
                    });
                }
                Status::ServerError { message, .. } => {
                    return Ok(Decoded {
                        fragments,
                        status: Status::ServerError {
                            message,
                            rest: chunk,
                        },
                    });
                }
            }
        }

        let status = self.run(chunk, &mut fragments)?;
        Ok(Decoded { fragments, status })
    }

    /// 残留的半行在`chunk`中的结尾位置（`\r\n`之后的下标）。
    fn line_end(&self, chunk: &[u8]) -> Option<usize> {
        if self.line.last() == Some(&b'\r') && chunk.first() == Some(&b'\n') {
            return Some(1);
        }
        find_crlf(chunk).map(|at| at + 2)
    }

    fn run(&mut self, mut src: Bytes, fragments: &mut Vec<Fragment>) -> crate::Result<Status> {
        while !src.is_empty() {
            if let Some(remaining) = self.bulk {
                let n = remaining.min(src.len());
                let data = src.split_to(n);
                if remaining > n {
                    self.bulk = Some(remaining - n);
                    fragments.push(Fragment::Bulk { data, last: false });
                } else {
                    self.bulk = None;
                    self.trailer = 2;
                    fragments.push(Fragment::Bulk { data, last: true });
                }
                continue;
            }

            if self.trailer > 0 {
                if src[0] != b"\r\n"[2 - self.trailer] {
                    return Err(Error::Protocol("大型字符串之后缺少\\r\\n".into()));
                }
                src.advance(1);
                self.trailer -= 1;
                if self.trailer == 0 && self.finish_value() {
                    return Ok(Status::Complete { rest: src });
                }
                continue;
            }

            let end = match find_crlf(&src) {
                Some(end) => end,
                None => {
                    if !is_tag(src[0]) {
                        return Err(invalid_tag(src[0]));
                    }
                    if src.len() > MAX_LINE {
                        return Err(Error::Protocol("头部行过长".into()));
                    }
                    self.line.extend_from_slice(&src);
                    break;
                }
            };
            let line = src.split_to(end + 2);
            let body = line.slice(1..end);

            match line[0] {
                // 没有任何未完成状态时的错误回复：直接结束这个请求。
                b'-' if self.stack.is_empty() => {
                    return Ok(Status::ServerError { message: body, rest: src });
                }
                b'-' => fragments.push(Fragment::Error(body)),
                b'+' => fragments.push(Fragment::Simple(body)),
                b':' => {
                    parse_integer(&body)?;
                    fragments.push(Fragment::Integer(body));
                }
                b'_' => {
                    if !body.is_empty() {
                        return Err(Error::Protocol("不合法的空值".into()));
                    }
                    fragments.push(Fragment::Null);
                }
                b'$' => match parse_integer(&body)? {
                    -1 => fragments.push(Fragment::Null),
                    0 => {
                        fragments.push(Fragment::Bulk {
                            data: Bytes::new(),
                            last: true,
                        });
                        self.trailer = 2;
                        continue;
                    }
                    len if len > 0 => {
                        self.bulk = Some(len as usize);
                        continue;
                    }
                    len => return Err(Error::Protocol(format!("不合法的字符串长度：{}", len))),
                },
                tag @ (b'*' | b'>') => match parse_integer(&body)? {
                    -1 if tag == b'*' => fragments.push(Fragment::Null),
                    len if len >= 0 => {
                        let len = len as usize;
                        if tag == b'>' {
                            fragments.push(Fragment::Push(len));
                            if self.stack.is_empty() {
                                self.push = true;
                            }
                        } else {
                            fragments.push(Fragment::Array(len));
                        }
                        if len > 0 {
                            self.stack.push(len);
                            continue;
                        }
                    }
                    len => return Err(Error::Protocol(format!("不合法的元素个数：{}", len))),
                },
                tag => return Err(invalid_tag(tag)),
            }

            // 到这里说明刚刚解码出了一个完整的值。
            if self.finish_value() {
                return Ok(Status::Complete { rest: src });
            }
        }

        Ok(Status::Incomplete)
    }

    /// 记录一个值已经完整，逐层更新数组的剩余元素个数。
    ///
    /// 返回`true`表示整个回复已经完整。
    fn finish_value(&mut self) -> bool {
        while let Some(remaining) = self.stack.last_mut() {
            *remaining -= 1;
            if *remaining > 0 {
                return false;
            }
            self.stack.pop();
        }
        !self.push
    }
}

/// 将命令编码为由`Bulk`组成的数组。
///
/// # Output
/// `encode_command(&["SET", "k", "v"])`返回`*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n`。
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let size: usize = args.iter().map(|arg| arg.as_ref().len() + 16).sum();
    let mut dst = BytesMut::with_capacity(size + 16);
    dst.extend_from_slice(b"*");
    put_decimal(&mut dst, args.len());
    for arg in args {
        let arg = arg.as_ref();
        dst.extend_from_slice(b"$");
        put_decimal(&mut dst, arg.len());
        dst.extend_from_slice(arg);
        dst.extend_from_slice(b"\r\n");
    }
    dst.freeze()
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|w| w == b"\r\n")
}

fn is_tag(byte: u8) -> bool {
    matches!(byte, b'+' | b'-' | b':' | b'$' | b'*' | b'>' | b'_')
}

fn invalid_tag(tag: u8) -> Error {
    Error::Protocol(format!("不合法的帧类型符：{:?}", tag as char))
}

fn parse_integer(text: &[u8]) -> crate::Result<i64> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::Protocol(format!("不合法的整数：{:?}", text)))
}
