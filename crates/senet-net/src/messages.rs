//! Wire message types and their textual encoding.
//!
//! Every message starts with a three-letter type tag followed by a payload
//! whose shape depends on the tag:
//!
//! ```text
//! CMD<len><nick>          nickname, client -> server
//! CMD<wordA><wordB>       start of turn, server -> client
//! INFALIVE | INFEXIT | INFOK
//! INF<wordA><wordB>       end of turn, client -> server
//! INFSTART_GAME<a>,<b>;   INFEND_GAME<nick>;   INFWAITING<nick>;
//! ERR<nn>                 two-digit error code
//! ```
//!
//! A turn word is five pieces of two decimal digits each. Outbound messages
//! are terminated by `\n`; the decoder ignores line breaks between messages.

use std::fmt;
use std::str::FromStr;

use senet_rules::TurnWords;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Shortest nickname accepted.
pub const MIN_NICKNAME_LEN: usize = 3;

/// Longest nickname accepted. Also the largest single length digit.
pub const MAX_NICKNAME_LEN: usize = 8;

/// Decimal digits used to encode one piece position.
pub const DIGITS_PER_PIECE: usize = 2;

// ---------------------------------------------------------------------------
// Nickname
// ---------------------------------------------------------------------------

/// Reasons a nickname is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NicknameError {
    /// Too short or too long.
    #[error("nickname length {0} is outside 3..=8")]
    Length(usize),

    /// The first character is not an ASCII letter.
    #[error("nickname must start with a letter")]
    FirstNotLetter,

    /// A later character is not ASCII alphanumeric.
    #[error("nickname contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated player nickname: 3 to 8 ASCII alphanumerics, starting with a
/// letter. Comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nickname(String);

impl Nickname {
    /// Validate and wrap `raw`.
    pub fn parse(raw: &str) -> Result<Self, NicknameError> {
        let len = raw.chars().count();
        if !(MIN_NICKNAME_LEN..=MAX_NICKNAME_LEN).contains(&len) {
            return Err(NicknameError::Length(len));
        }

        let mut chars = raw.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(NicknameError::FirstNotLetter);
        }
        if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric()) {
            return Err(NicknameError::InvalidChar(bad));
        }

        Ok(Self(raw.to_owned()))
    }

    /// The nickname text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Nickname {
    type Err = NicknameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nickname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Two-digit error codes carried by `ERR` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 00: unspecified, also the fallback for unknown codes.
    General,
    /// 01: malformed message or unanswered liveness ping.
    BadMessage,
    /// 02: unknown type tag.
    BadMessageType,
    /// 03: payload does not fit its type.
    BadMessageContent,
    /// 04: nickname has the wrong length or characters.
    BadNickname,
    /// 05: nickname is bound by another player.
    NicknameTaken,
    /// 06: the reported board was rejected.
    IllegalTurn,
    /// 07: no match or connection slot is free.
    ServerFull,
    /// 08: a valid message arrived in a state that does not expect it.
    UnexpectedMessage,
    /// 09: end of turn sent while the opponent holds the turn.
    NotYourTurn,
    /// 10: nothing arrived before the deadline.
    Timeout,
    /// 11: too many failed nickname attempts.
    TooManyAttempts,
}

impl ErrorCode {
    /// Numeric code as sent on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::General => 0,
            Self::BadMessage => 1,
            Self::BadMessageType => 2,
            Self::BadMessageContent => 3,
            Self::BadNickname => 4,
            Self::NicknameTaken => 5,
            Self::IllegalTurn => 6,
            Self::ServerFull => 7,
            Self::UnexpectedMessage => 8,
            Self::NotYourTurn => 9,
            Self::Timeout => 10,
            Self::TooManyAttempts => 11,
        }
    }

    /// Map a numeric code back to its variant. Unknown codes become
    /// [`ErrorCode::General`].
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::BadMessage,
            2 => Self::BadMessageType,
            3 => Self::BadMessageContent,
            4 => Self::BadNickname,
            5 => Self::NicknameTaken,
            6 => Self::IllegalTurn,
            7 => Self::ServerFull,
            8 => Self::UnexpectedMessage,
            9 => Self::NotYourTurn,
            10 => Self::Timeout,
            11 => Self::TooManyAttempts,
            _ => Self::General,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Type tag family of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `CMD`
    Command,
    /// `INF`
    Informational,
    /// `ERR`
    Error,
}

impl MessageKind {
    /// The three-letter tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Command => "CMD",
            Self::Informational => "INF",
            Self::Error => "ERR",
        }
    }
}

/// A single protocol message in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // --- Client -> server ---
    /// Requested nickname.
    Nickname(Nickname),
    /// Voluntary quit.
    Exit,
    /// Board after the sender's move.
    EndTurn(TurnWords),

    // --- Both directions ---
    /// Liveness ping.
    Alive,
    /// Acknowledgement, also the answer to [`Message::Alive`].
    Ok,
    /// Error report.
    Error(ErrorCode),

    // --- Server -> client ---
    /// Both players are seated; side 0 first.
    StartGame {
        /// Nickname on side 0.
        first: Nickname,
        /// Nickname on side 1.
        second: Nickname,
    },
    /// The match is over.
    EndGame {
        /// Nickname of the winning player.
        winner: Nickname,
    },
    /// The receiver holds the turn; carries the current board.
    StartTurn(TurnWords),
    /// The match is paused until the named player comes back.
    Waiting(Nickname),
}

impl Message {
    /// Type tag family of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Nickname(_) | Self::StartTurn(_) => MessageKind::Command,
            Self::Error(_) => MessageKind::Error,
            Self::Exit
            | Self::EndTurn(_)
            | Self::Alive
            | Self::Ok
            | Self::StartGame { .. }
            | Self::EndGame { .. }
            | Self::Waiting(_) => MessageKind::Informational,
        }
    }

    /// Wire bytes of this message, newline-terminated.
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for Message {
    /// The wire form without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().tag())?;
        match self {
            Self::Nickname(nick) => write!(f, "{}{nick}", nick.as_str().len()),
            Self::Exit => f.write_str("EXIT"),
            Self::Alive => f.write_str("ALIVE"),
            Self::Ok => f.write_str("OK"),
            Self::Error(code) => write!(f, "{code}"),
            Self::EndTurn([a, b]) | Self::StartTurn([a, b]) => write!(f, "{a}{b}"),
            Self::StartGame { first, second } => write!(f, "START_GAME{first},{second};"),
            Self::EndGame { winner } => write!(f, "END_GAME{winner};"),
            Self::Waiting(nick) => write!(f, "WAITING{nick};"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use senet_rules::{Side, TurnWord};

    fn nick(raw: &str) -> Nickname {
        Nickname::parse(raw).unwrap()
    }

    #[test]
    fn test_nickname_rules() {
        assert!(Nickname::parse("bob").is_ok());
        assert!(Nickname::parse("Player42").is_ok());
        assert_eq!(Nickname::parse("al"), Err(NicknameError::Length(2)));
        assert_eq!(Nickname::parse("abcdefghi"), Err(NicknameError::Length(9)));
        assert_eq!(Nickname::parse("1abc"), Err(NicknameError::FirstNotLetter));
        assert_eq!(Nickname::parse("ab_c"), Err(NicknameError::InvalidChar('_')));
        assert_eq!(Nickname::parse("ab c"), Err(NicknameError::InvalidChar(' ')));
    }

    #[test]
    fn test_nickname_is_case_sensitive() {
        assert_ne!(nick("Alice"), nick("alice"));
    }

    #[test]
    fn test_error_code_roundtrip_and_fallback() {
        for code in 0..=11 {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
        assert_eq!(ErrorCode::from_code(12), ErrorCode::General);
        assert_eq!(ErrorCode::from_code(99), ErrorCode::General);
        assert_eq!(ErrorCode::ServerFull.to_string(), "07");
        assert_eq!(ErrorCode::TooManyAttempts.to_string(), "11");
    }

    #[test]
    fn test_server_message_encodings() {
        let cases = [
            (Message::Ok, "INFOK\n"),
            (Message::Alive, "INFALIVE\n"),
            (Message::Error(ErrorCode::IllegalTurn), "ERR06\n"),
            (
                Message::StartGame {
                    first: nick("ALICE"),
                    second: nick("BOB"),
                },
                "INFSTART_GAMEALICE,BOB;\n",
            ),
            (
                Message::EndGame {
                    winner: nick("ALICE"),
                },
                "INFEND_GAMEALICE;\n",
            ),
            (
                Message::StartTurn(TurnWord::initial_pair()),
                "CMD02040608100103050709\n",
            ),
            (Message::Waiting(nick("BOB")), "INFWAITINGBOB;\n"),
        ];

        for (message, wire) in cases {
            assert_eq!(message.encode(), wire.as_bytes(), "encoding {message:?}");
        }
    }

    #[test]
    fn test_client_message_encodings() {
        assert_eq!(Message::Nickname(nick("ALICE")).to_string(), "CMD5ALICE");
        assert_eq!(Message::Exit.to_string(), "INFEXIT");
        let words = [TurnWord::new([31; 5]), TurnWord::initial(Side::Second)];
        assert_eq!(
            Message::EndTurn(words).to_string(),
            "INF31313131310103050709"
        );
    }

    #[test]
    fn test_message_kinds() {
        assert_eq!(Message::Nickname(nick("abc")).kind(), MessageKind::Command);
        assert_eq!(
            Message::StartTurn(TurnWord::initial_pair()).kind(),
            MessageKind::Command
        );
        assert_eq!(Message::Exit.kind(), MessageKind::Informational);
        assert_eq!(
            Message::Error(ErrorCode::General).kind(),
            MessageKind::Error
        );
    }
}
