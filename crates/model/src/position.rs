use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid position text: '{0}'")]
pub struct PositionParseError(pub String);

/// Resumable progress marker of a dumper.
///
/// Positions of one task are always of the same concrete kind, apart from
/// `Placeholder` (nothing consumed yet) and `Finished` (stream exhausted),
/// which order below and above every other position respectively.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// Task has not consumed anything yet.
    #[default]
    Placeholder,

    /// MySQL binlog coordinates.
    Binlog {
        file_name: String,
        position: u64,
        server_id: u64,
    },

    /// PostgreSQL WAL log sequence number.
    Wal { lsn: u64 },

    /// Inclusive integer primary-key range of an inventory split.
    IntegerPrimaryKey { begin: i64, end: i64 },

    /// Inclusive string primary-key range of an inventory split.
    StringPrimaryKey { begin: String, end: String },

    /// Source fully consumed (inventory only).
    Finished,
}

impl Position {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Position::Placeholder)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Position::Finished)
    }

    /// Whether replacing `current` with `self` keeps progress monotonic.
    ///
    /// Positions of unrelated kinds are incomparable and never advance.
    pub fn advances(&self, current: &Position) -> bool {
        matches!(
            self.partial_cmp(current),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Position::*;

        match (self, other) {
            (Placeholder, Placeholder) | (Finished, Finished) => Some(Ordering::Equal),
            (Placeholder, _) | (_, Finished) => Some(Ordering::Less),
            (_, Placeholder) | (Finished, _) => Some(Ordering::Greater),
            (
                Binlog {
                    file_name: f1,
                    position: p1,
                    server_id: s1,
                },
                Binlog {
                    file_name: f2,
                    position: p2,
                    server_id: s2,
                },
            ) => {
                // Coordinates of different servers do not describe the same log.
                if s1 != s2 {
                    return None;
                }
                Some((f1, p1).cmp(&(f2, p2)))
            }
            (Wal { lsn: a }, Wal { lsn: b }) => Some(a.cmp(b)),
            (
                IntegerPrimaryKey { begin: b1, end: e1 },
                IntegerPrimaryKey { begin: b2, end: e2 },
            ) => Some((b1, e1).cmp(&(b2, e2))),
            (StringPrimaryKey { begin: b1, end: e1 }, StringPrimaryKey { begin: b2, end: e2 }) => {
                Some((b1, e1).cmp(&(b2, e2)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Placeholder => f.write_str("placeholder"),
            Position::Finished => f.write_str("finished"),
            Position::Binlog {
                file_name,
                position,
                server_id,
            } => {
                if *server_id == 0 {
                    write!(f, "{file_name}#{position}")
                } else {
                    write!(f, "{file_name}#{position}#{server_id}")
                }
            }
            Position::Wal { lsn } => write!(f, "wal:{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF),
            Position::IntegerPrimaryKey { begin, end } => write!(f, "i,{begin},{end}"),
            Position::StringPrimaryKey { begin, end } => {
                write!(f, "s,{},{}", escape_key(begin), escape_key(end))
            }
        }
    }
}

impl FromStr for Position {
    type Err = PositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PositionParseError(s.to_string());

        match s {
            "placeholder" => return Ok(Position::Placeholder),
            "finished" => return Ok(Position::Finished),
            _ => {}
        }

        if let Some(lsn) = s.strip_prefix("wal:") {
            let (hi, lo) = lsn.split_once('/').ok_or_else(invalid)?;
            let hi = u64::from_str_radix(hi, 16).map_err(|_| invalid())?;
            let lo = u64::from_str_radix(lo, 16).map_err(|_| invalid())?;
            if hi > 0xFFFF_FFFF || lo > 0xFFFF_FFFF {
                return Err(invalid());
            }
            return Ok(Position::Wal {
                lsn: (hi << 32) | lo,
            });
        }

        if let Some(range) = s.strip_prefix("i,") {
            let (begin, end) = range.split_once(',').ok_or_else(invalid)?;
            return Ok(Position::IntegerPrimaryKey {
                begin: begin.parse().map_err(|_| invalid())?,
                end: end.parse().map_err(|_| invalid())?,
            });
        }

        if let Some(range) = s.strip_prefix("s,") {
            let (begin, end) = split_string_range(range).ok_or_else(invalid)?;
            return Ok(Position::StringPrimaryKey { begin, end });
        }

        let mut parts = s.split('#');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(file_name), Some(position), server_id, None) if !file_name.is_empty() => {
                Ok(Position::Binlog {
                    file_name: file_name.to_string(),
                    position: position.parse().map_err(|_| invalid())?,
                    server_id: match server_id {
                        Some(id) => id.parse().map_err(|_| invalid())?,
                        None => 0,
                    },
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// Escapes `\` and `,` so a string key survives the `s,begin,end` form.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, '\\' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Splits `begin,end` at the only unescaped comma, unescaping both halves.
fn split_string_range(range: &str) -> Option<(String, String)> {
    let mut begin = None;
    let mut current = String::new();
    let mut chars = range.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next()?),
            ',' if begin.is_none() => begin = Some(std::mem::take(&mut current)),
            ',' => return None,
            c => current.push(c),
        }
    }
    Some((begin?, current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binlog(file: &str, pos: u64) -> Position {
        Position::Binlog {
            file_name: file.to_string(),
            position: pos,
            server_id: 0,
        }
    }

    #[test]
    fn placeholder_orders_below_everything() {
        assert!(Position::Placeholder < binlog("binlog.000001", 4));
        assert!(Position::Placeholder < Position::Wal { lsn: 0 });
        assert!(Position::Placeholder < Position::Finished);
        assert!(!Position::Placeholder.advances(&binlog("binlog.000001", 4)));
    }

    #[test]
    fn finished_orders_above_everything() {
        assert!(Position::Finished > Position::IntegerPrimaryKey { begin: 1, end: 9 });
        assert!(Position::Finished.advances(&Position::Placeholder));
    }

    #[test]
    fn binlog_compares_file_then_offset() {
        assert!(binlog("binlog.000001", 900) < binlog("binlog.000002", 4));
        assert!(binlog("binlog.000002", 4) < binlog("binlog.000002", 120));
        assert!(binlog("binlog.000002", 120).advances(&binlog("binlog.000002", 120)));
    }

    #[test]
    fn different_kinds_are_incomparable() {
        let wal = Position::Wal { lsn: 10 };
        let bin = binlog("binlog.000001", 4);
        assert_eq!(wal.partial_cmp(&bin), None);
        assert!(!wal.advances(&bin));
    }

    #[test]
    fn binlog_of_other_server_is_incomparable() {
        let a = binlog("binlog.000001", 4);
        let b = Position::Binlog {
            file_name: "binlog.000001".into(),
            position: 4,
            server_id: 2,
        };
        assert_eq!(a.partial_cmp(&b), None);
    }

    #[test]
    fn parses_text_forms() {
        let cases = [
            "placeholder",
            "finished",
            "binlog.000001#4",
            "binlog.000003#1200#7",
            "wal:16/B374D848",
            "i,1,100",
            "s,aa,zz",
        ];
        for text in cases {
            let pos: Position = text.parse().unwrap();
            assert_eq!(pos.to_string(), text);
        }
        assert_eq!(
            "wal:16/B374D848".parse::<Position>().unwrap(),
            Position::Wal {
                lsn: (0x16 << 32) | 0xB374_D848
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Position>().is_err());
        assert!("i,one,2".parse::<Position>().is_err());
        assert!("wal:zz".parse::<Position>().is_err());
        assert!("binlog#x".parse::<Position>().is_err());
        assert!("a#1#2#3".parse::<Position>().is_err());
        assert!("s,a,b,c".parse::<Position>().is_err());
        assert!("s,ab\\".parse::<Position>().is_err());
    }

    #[test]
    fn rejects_wal_halves_wider_than_32_bits() {
        assert!("wal:100000000/0".parse::<Position>().is_err());
        assert!("wal:0/100000000".parse::<Position>().is_err());
        assert_eq!(
            "wal:FFFFFFFF/FFFFFFFF".parse::<Position>().unwrap(),
            Position::Wal { lsn: u64::MAX }
        );
    }

    #[test]
    fn string_keys_with_commas_keep_their_bounds() {
        let pos = Position::StringPrimaryKey {
            begin: "a,b".into(),
            end: r"c\d".into(),
        };
        let text = pos.to_string();
        assert_eq!(text, r"s,a\,b,c\\d");
        assert_eq!(text.parse::<Position>().unwrap(), pos);
        assert_eq!(
            r"s,,z\,".parse::<Position>().unwrap(),
            Position::StringPrimaryKey {
                begin: String::new(),
                end: "z,".into(),
            }
        );
    }
}
