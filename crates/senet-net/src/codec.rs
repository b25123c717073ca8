//! Byte-at-a-time decoding of the line protocol.
//!
//! The decoder never buffers ahead: each byte is read, validated and either
//! accepted or turned into a [`CodecError::Decode`] on the spot, so a peer
//! that sends garbage is answered immediately and a peer that stalls halfway
//! through a message is caught by the per-byte timeout.
//!
//! Only client-to-server forms are decoded (`CMD<len><nick>`, `INFALIVE`,
//! `INFEXIT`, `INFOK`, `INF<wordA><wordB>`, `ERR<nn>`). Tags and literals are
//! case-insensitive; `\n`, `\r` and spaces between messages are skipped.

use std::time::Duration;

use senet_rules::{PIECES_PER_PLAYER, TurnWord, TurnWords};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::messages::{
    DIGITS_PER_PIECE, ErrorCode, MAX_NICKNAME_LEN, MIN_NICKNAME_LEN, Message, Nickname,
};

/// Errors that can occur while reading or writing messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No byte arrived within the allotted time.
    #[error("timed out waiting for the peer")]
    Timeout,

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The bytes received do not form a valid message. Carries the code to
    /// report back to the peer.
    #[error("malformed message (error code {0})")]
    Decode(ErrorCode),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one complete message, allowing at most `timeout` between bytes.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Message, CodecError> {
    let first = read_start(reader, Some(timeout)).await?;
    read_message_from(reader, first, timeout).await
}

/// Skip inter-message whitespace and return the first byte of the next
/// message. With `timeout` set to `None` this waits as long as the peer stays
/// connected.
pub async fn read_start<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<u8, CodecError> {
    loop {
        let byte = read_byte(reader, timeout).await?;
        if !matches!(byte, b'\n' | b'\r' | b' ') {
            return Ok(byte);
        }
    }
}

/// Decode the rest of a message whose first byte was returned by
/// [`read_start`].
pub async fn read_message_from<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    first: u8,
    timeout: Duration,
) -> Result<Message, CodecError> {
    let mut input = ByteInput { reader, timeout };

    match first.to_ascii_uppercase() {
        b'C' => {
            input.expect_literal(b"MD", ErrorCode::BadMessageType).await?;
            input.read_nickname().await.map(Message::Nickname)
        }
        b'I' => {
            input.expect_literal(b"NF", ErrorCode::BadMessageType).await?;
            input.read_informational().await
        }
        b'E' => {
            input.expect_literal(b"RR", ErrorCode::BadMessageType).await?;
            let tens = input.read_digit(ErrorCode::BadMessageContent).await?;
            let ones = input.read_digit(ErrorCode::BadMessageContent).await?;
            Ok(Message::Error(ErrorCode::from_code(tens * 10 + ones)))
        }
        _ => Err(CodecError::Decode(ErrorCode::BadMessageType)),
    }
}

/// Encode `message` and write it out, flushing before returning.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    message: &Message,
    timeout: Duration,
) -> Result<(), CodecError> {
    let bytes = message.encode();
    let write = async {
        writer.write_all(&bytes).await?;
        writer.flush().await
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(classify_io(e)),
        Err(_) => Err(CodecError::Timeout),
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn classify_io(e: std::io::Error) -> CodecError {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted => CodecError::ConnectionClosed,
        _ => CodecError::Io(e),
    }
}

async fn read_byte<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: Option<Duration>,
) -> Result<u8, CodecError> {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read_u8())
            .await
            .map_err(|_| CodecError::Timeout)?,
        None => reader.read_u8().await,
    };
    result.map_err(classify_io)
}

struct ByteInput<'a, R> {
    reader: &'a mut R,
    timeout: Duration,
}

impl<R: AsyncReadExt + Unpin> ByteInput<'_, R> {
    async fn next(&mut self) -> Result<u8, CodecError> {
        read_byte(&mut *self.reader, Some(self.timeout)).await
    }

    /// Match `literal` case-insensitively, failing with `code` on the first
    /// differing byte.
    async fn expect_literal(&mut self, literal: &[u8], code: ErrorCode) -> Result<(), CodecError> {
        for &expected in literal {
            if !self.next().await?.eq_ignore_ascii_case(&expected) {
                return Err(CodecError::Decode(code));
            }
        }
        Ok(())
    }

    async fn read_digit(&mut self, code: ErrorCode) -> Result<u8, CodecError> {
        let byte = self.next().await?;
        if byte.is_ascii_digit() {
            Ok(byte - b'0')
        } else {
            Err(CodecError::Decode(code))
        }
    }

    async fn read_nickname(&mut self) -> Result<Nickname, CodecError> {
        let bad = CodecError::Decode(ErrorCode::BadNickname);
        let len = usize::from(self.read_digit(ErrorCode::BadNickname).await?);
        if !(MIN_NICKNAME_LEN..=MAX_NICKNAME_LEN).contains(&len) {
            return Err(bad);
        }

        let mut raw = String::with_capacity(len);
        for i in 0..len {
            let byte = self.next().await?;
            let valid = if i == 0 {
                byte.is_ascii_alphabetic()
            } else {
                byte.is_ascii_alphanumeric()
            };
            if !valid {
                return Err(bad);
            }
            raw.push(char::from(byte));
        }

        Nickname::parse(&raw).map_err(|_| bad)
    }

    async fn read_informational(&mut self) -> Result<Message, CodecError> {
        let content = ErrorCode::BadMessageContent;
        let first = self.next().await?;

        match first.to_ascii_uppercase() {
            b'A' => {
                self.expect_literal(b"LIVE", content).await?;
                Ok(Message::Alive)
            }
            b'E' => {
                self.expect_literal(b"XIT", content).await?;
                Ok(Message::Exit)
            }
            b'O' => {
                self.expect_literal(b"K", content).await?;
                Ok(Message::Ok)
            }
            digit if digit.is_ascii_digit() => self.read_turn_words(digit - b'0').await,
            _ => Err(CodecError::Decode(content)),
        }
    }

    /// Read the remaining digits of a turn-word pair whose first digit has
    /// already been consumed.
    async fn read_turn_words(&mut self, first_digit: u8) -> Result<Message, CodecError> {
        let content = ErrorCode::BadMessageContent;
        let mut squares = [[0u8; PIECES_PER_PLAYER]; 2];
        let mut pending = Some(first_digit);

        for word in squares.iter_mut() {
            for square in word.iter_mut() {
                let mut value = 0u8;
                for _ in 0..DIGITS_PER_PIECE {
                    let digit = match pending.take() {
                        Some(digit) => digit,
                        None => self.read_digit(content).await?,
                    };
                    value = value * 10 + digit;
                }
                *square = value;
            }
        }

        let words: TurnWords = squares.map(TurnWord::new);
        Ok(Message::EndTurn(words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senet_rules::Side;
    use tokio::io::duplex;

    const STEP: Duration = Duration::from_millis(200);

    async fn decode(wire: &[u8]) -> Result<Message, CodecError> {
        let (mut client, mut server) = duplex(8192);
        client.write_all(wire).await.unwrap();
        client.flush().await.unwrap();
        read_message(&mut server, STEP).await
    }

    fn decode_error(result: Result<Message, CodecError>) -> Option<ErrorCode> {
        match result {
            Err(CodecError::Decode(code)) => Some(code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_nickname_roundtrip() {
        for raw in ["abc", "ALICE", "Bob7", "z1234567", "Q9q9"] {
            let nick = Nickname::parse(raw).unwrap();
            let message = Message::Nickname(nick.clone());
            let decoded = decode(&message.encode()).await.unwrap();
            assert_eq!(decoded, Message::Nickname(nick));
        }
    }

    #[tokio::test]
    async fn test_tags_are_case_insensitive() {
        assert_eq!(
            decode(b"cmd5alice").await.unwrap(),
            Message::Nickname(Nickname::parse("alice").unwrap())
        );
        assert_eq!(decode(b"iNfAlIvE").await.unwrap(), Message::Alive);
        assert_eq!(decode(b"infexit").await.unwrap(), Message::Exit);
        assert_eq!(decode(b"Infok").await.unwrap(), Message::Ok);
    }

    #[tokio::test]
    async fn test_leading_whitespace_skipped() {
        assert_eq!(decode(b"\r\n \nINFOK").await.unwrap(), Message::Ok);
    }

    #[tokio::test]
    async fn test_end_turn_words_decoded() {
        let decoded = decode(b"INF31313131310103050709").await.unwrap();
        assert_eq!(
            decoded,
            Message::EndTurn([TurnWord::new([31; 5]), TurnWord::initial(Side::Second)])
        );
    }

    #[tokio::test]
    async fn test_error_codes_decoded() {
        assert_eq!(
            decode(b"ERR07").await.unwrap(),
            Message::Error(ErrorCode::ServerFull)
        );
        assert_eq!(
            decode(b"ERR42").await.unwrap(),
            Message::Error(ErrorCode::General)
        );
        assert_eq!(
            decode_error(decode(b"ERR4x").await),
            Some(ErrorCode::BadMessageContent)
        );
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected_at_first_bad_byte() {
        assert_eq!(
            decode_error(decode(b"XYZ").await),
            Some(ErrorCode::BadMessageType)
        );
        assert_eq!(
            decode_error(decode(b"CXD5alice").await),
            Some(ErrorCode::BadMessageType)
        );
    }

    #[tokio::test]
    async fn test_bad_nicknames_rejected() {
        for wire in [
            &b"CMD2ab"[..],
            b"CMD9abcdefghi",
            b"CMDxabc",
            b"CMD41abc",
            b"CMD4ab_c",
        ] {
            assert_eq!(
                decode_error(decode(wire).await),
                Some(ErrorCode::BadNickname),
                "wire {:?}",
                String::from_utf8_lossy(wire)
            );
        }
    }

    #[tokio::test]
    async fn test_bad_informational_content_rejected() {
        for wire in [&b"INFALIVX"[..], b"INFQ", b"INF0102x"] {
            assert_eq!(
                decode_error(decode(wire).await),
                Some(ErrorCode::BadMessageContent),
                "wire {:?}",
                String::from_utf8_lossy(wire)
            );
        }
    }

    #[tokio::test]
    async fn test_decode_stops_at_first_bad_byte() {
        // The rejected byte is consumed; everything after it stays unread.
        let (mut client, mut server) = duplex(8192);
        client.write_all(b"INFQINFOK").await.unwrap();
        assert!(matches!(
            read_message(&mut server, STEP).await,
            Err(CodecError::Decode(ErrorCode::BadMessageContent))
        ));
        assert_eq!(read_message(&mut server, STEP).await.unwrap(), Message::Ok);
    }

    #[tokio::test]
    async fn test_back_to_back_messages() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(b"INFALIVE\nINFOK\nINFEXIT\n").await.unwrap();
        assert_eq!(read_message(&mut server, STEP).await.unwrap(), Message::Alive);
        assert_eq!(read_message(&mut server, STEP).await.unwrap(), Message::Ok);
        assert_eq!(read_message(&mut server, STEP).await.unwrap(), Message::Exit);
    }

    #[tokio::test]
    async fn test_partial_message_times_out() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(b"INFAL").await.unwrap();
        let result = read_message(&mut server, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CodecError::Timeout)));
        drop(client);
    }

    #[tokio::test]
    async fn test_idle_start_waits_without_deadline() {
        let (mut client, mut server) = duplex(8192);
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.write_all(b"INFOK").await.unwrap();
            client
        });

        let first = read_start(&mut server, None).await.unwrap();
        let message = read_message_from(&mut server, first, STEP).await.unwrap();
        assert_eq!(message, Message::Ok);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_closed_detected() {
        let (client, mut server) = duplex(8192);
        drop(client);
        assert!(matches!(
            read_message(&mut server, STEP).await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_connection_closed_mid_message() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(b"CMD5al").await.unwrap();
        drop(client);
        assert!(matches!(
            read_message(&mut server, STEP).await,
            Err(CodecError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_message_flushes_line() {
        let (mut client, mut server) = duplex(8192);
        write_message(&mut server, &Message::Error(ErrorCode::Timeout), STEP)
            .await
            .unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ERR10\n");
    }
}
