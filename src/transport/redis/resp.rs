use bytes::{BufMut, Bytes, BytesMut};
use relay_error::TransportError;

/// Максимальная длина строки (1mb).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
/// Максимальный размер BulkString (512mb).
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Максимальная вложенность массивов.
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Фрейм протокола RESP2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Содержимое строкового фрейма (Simple или Bulk) как байты.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) => Some(s.as_bytes()),
            Frame::Bulk(Some(b)) => Some(b.as_ref()),
            _ => None,
        }
    }

    /// Разбирает push-сообщение подписки `["message", channel, payload]`.
    pub fn into_pubsub_message(self) -> Option<(String, Bytes)> {
        let Frame::Array(Some(items)) = self else {
            return None;
        };
        let mut items = items.into_iter();
        let kind = items.next()?;
        if !kind.as_bytes()?.eq_ignore_ascii_case(b"message") {
            return None;
        }
        let channel = items.next()?;
        let channel = String::from_utf8(channel.as_bytes()?.to_vec()).ok()?;
        match items.next()? {
            Frame::Bulk(Some(payload)) => Some((channel, payload)),
            Frame::Simple(s) => Some((channel, Bytes::from(s))),
            _ => None,
        }
    }

    /// Канал из подтверждения подписки `["subscribe", channel, count]`.
    pub fn subscribed_channel(&self) -> Option<String> {
        let Frame::Array(Some(items)) = self else {
            return None;
        };
        match items.as_slice() {
            [kind, channel, Frame::Integer(_)]
                if kind
                    .as_bytes()
                    .is_some_and(|k| k.eq_ignore_ascii_case(b"subscribe")) =>
            {
                String::from_utf8(channel.as_bytes()?.to_vec()).ok()
            }
            _ => None,
        }
    }
}

/// Кодирует команду как массив BulkString: `*N\r\n$len\r\narg\r\n...`.
pub fn encode_command(args: &[&[u8]]) -> BytesMut {
    let size: usize = args.iter().map(|a| a.len() + 16).sum::<usize>() + 16;
    let mut out = BytesMut::with_capacity(size);
    out.put_u8(b'*');
    out.put_slice(args.len().to_string().as_bytes());
    out.put_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        out.put_slice(arg.len().to_string().as_bytes());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
    out
}

/// Пытается разобрать один фрейм из начала буфера.
///
/// Возвращает `Ok(None)`, если данных пока недостаточно, иначе фрейм и
/// количество потреблённых байт.
pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, TransportError> {
    let mut pos = 0;
    match parse_at(buf, &mut pos, 0)? {
        Some(frame) => Ok(Some((frame, pos))),
        None => Ok(None),
    }
}

fn parse_at(
    buf: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Option<Frame>, TransportError> {
    let Some(&tag) = buf.get(*pos) else {
        return Ok(None);
    };
    *pos += 1;

    match tag {
        b'+' => Ok(read_line(buf, pos)?.map(|l| Frame::Simple(l.to_string()))),
        b'-' => Ok(read_line(buf, pos)?.map(|l| Frame::Error(l.to_string()))),
        b':' => match read_line(buf, pos)? {
            Some(line) => Ok(Some(Frame::Integer(parse_int(line)?))),
            None => Ok(None),
        },
        b'$' => {
            let Some(line) = read_line(buf, pos)? else {
                return Ok(None);
            };
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some(Frame::Bulk(None)));
            }
            let len = usize::try_from(len).map_err(|_| protocol(format!("Invalid bulk length {len}")))?;
            if len > MAX_BULK_LENGTH {
                return Err(protocol(format!(
                    "Bulk string too long ({len} > {MAX_BULK_LENGTH})"
                )));
            }
            // Тело и завершающий CRLF.
            if buf.len() < *pos + len + 2 {
                return Ok(None);
            }
            if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                return Err(protocol("Bulk string is not terminated by CRLF"));
            }
            let data = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            *pos += len + 2;
            Ok(Some(Frame::Bulk(Some(data))))
        }
        b'*' => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(protocol(format!("Array nesting exceeds {MAX_ARRAY_DEPTH}")));
            }
            let Some(line) = read_line(buf, pos)? else {
                return Ok(None);
            };
            let len = parse_int(line)?;
            if len == -1 {
                return Ok(Some(Frame::Array(None)));
            }
            let len = usize::try_from(len).map_err(|_| protocol(format!("Invalid array length {len}")))?;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                match parse_at(buf, pos, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Frame::Array(Some(items))))
        }
        other => Err(protocol(format!(
            "Unknown RESP type byte 0x{other:02x} at offset {}",
            *pos - 1
        ))),
    }
}

/// Читает строку до CRLF, сдвигая позицию за него.
fn read_line<'a>(
    buf: &'a [u8],
    pos: &mut usize,
) -> Result<Option<&'a str>, TransportError> {
    let rest = &buf[*pos..];
    let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
        if rest.len() > MAX_LINE_LENGTH {
            return Err(protocol("Line exceeds maximum length"));
        }
        return Ok(None);
    };
    let line = std::str::from_utf8(&rest[..end]).map_err(|_| protocol("Line is not valid UTF-8"))?;
    *pos += end + 2;
    Ok(Some(line))
}

fn parse_int(line: &str) -> Result<i64, TransportError> {
    line.parse::<i64>()
        .map_err(|_| protocol(format!("Invalid integer '{line}'")))
}

fn protocol(reason: impl Into<String>) -> TransportError {
    TransportError::Protocol {
        reason: reason.into(),
    }
}
