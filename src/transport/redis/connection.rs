use std::time::Duration;

use bytes::{Buf, BytesMut};
use relay_error::TransportError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::timeout,
};
use tracing::{debug, trace};

use super::resp::{self, Frame};

/// Читающая половина соединения с брокером.
pub struct FrameReader {
    reader: BufReader<OwnedReadHalf>,
    buffer: BytesMut,
}

/// Пишущая половина соединения с брокером.
pub struct CommandWriter {
    writer: BufWriter<OwnedWriteHalf>,
}

/// Соединение «команда → ответ» с RESP-брокером.
///
/// Каждая команда ограничена `command_timeout`; по истечении соединение
/// считается испорченным и должно быть отброшено владельцем.
pub struct Connection {
    address: String,
    reader: FrameReader,
    writer: CommandWriter,
    command_timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Connection {
    /// Устанавливает соединение и, если задан пароль, выполняет `AUTH`.
    pub async fn connect(
        address: &str,
        password: Option<&str>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, TransportError> {
        debug!("Connecting to {address}");

        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                address: address.to_string(),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        debug!("Connection established with {address}");

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            address: address.to_string(),
            reader: FrameReader {
                reader: BufReader::new(read_half),
                buffer: BytesMut::with_capacity(8192),
            },
            writer: CommandWriter {
                writer: BufWriter::new(write_half),
            },
            command_timeout,
        };

        if let Some(password) = password {
            conn.execute(&[b"AUTH", password.as_bytes()]).await?;
        }
        Ok(conn)
    }

    /// Отправляет команду и ждёт ответ.
    ///
    /// Ответ-ошибка брокера превращается в `TransportError::Rejected`.
    pub async fn execute(
        &mut self,
        args: &[&[u8]],
    ) -> Result<Frame, TransportError> {
        let command = command_name(args);
        let limit = self.command_timeout;
        let round_trip = async {
            self.writer.send(args).await?;
            self.reader.read_frame().await
        };

        let frame = timeout(limit, round_trip)
            .await
            .map_err(|_| TransportError::CommandTimeout {
                command: command.clone(),
            })??;

        match frame {
            Frame::Error(reason) => Err(TransportError::Rejected { command, reason }),
            frame => {
                trace!(%command, ?frame, "command completed");
                Ok(frame)
            }
        }
    }

    /// Проверка живости соединения.
    pub async fn ping(&mut self) -> Result<(), TransportError> {
        match self.execute(&[b"PING"]).await? {
            Frame::Simple(ref s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(TransportError::Protocol {
                reason: format!("Unexpected PING reply: {other:?}"),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Разделяет соединение на независимые половины (для режима подписки,
    /// где ответы приходят асинхронно).
    pub fn into_split(self) -> (FrameReader, CommandWriter) {
        (self.reader, self.writer)
    }
}

impl FrameReader {
    /// Читает следующий фрейм, дочитывая сокет по мере необходимости.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            if let Some((frame, used)) = resp::parse(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(frame);
            }

            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
        }
    }
}

impl CommandWriter {
    /// Записывает команду и сбрасывает буфер.
    pub async fn send(
        &mut self,
        args: &[&[u8]],
    ) -> Result<(), TransportError> {
        let encoded = resp::encode_command(args);
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

fn command_name(args: &[&[u8]]) -> String {
    args.first()
        .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
        .unwrap_or_default()
}
