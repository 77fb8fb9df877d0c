//! Glob-style key patterns for `KEYS`.
//!
//! Patterns and keys are matched byte by byte. Supported syntax: `*` (any
//! run, including empty), `?` (exactly one byte), `[abc]`, `[a-z]`, `[^a]` /
//! `[!a]` classes, and `\x` to match `x` literally. An unterminated `[` is
//! matched literally.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Literal(u8),
    Single,
    Any,
    Set { negated: bool, ranges: Vec<(u8, u8)> },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    items: Vec<Item>,
}

impl Pattern {
    pub fn compile(chars: &[u8]) -> Self {
        let mut items = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                b'*' => {
                    if items.last() != Some(&Item::Any) {
                        items.push(Item::Any);
                    }
                    i += 1;
                }
                b'?' => {
                    items.push(Item::Single);
                    i += 1;
                }
                b'\\' if i + 1 < chars.len() => {
                    items.push(Item::Literal(chars[i + 1]));
                    i += 2;
                }
                b'[' => match parse_set(chars, i + 1) {
                    Some((item, next)) => {
                        items.push(item);
                        i = next;
                    }
                    None => {
                        items.push(Item::Literal(b'['));
                        i += 1;
                    }
                },
                c => {
                    items.push(Item::Literal(c));
                    i += 1;
                }
            }
        }
        Self { items }
    }

    pub fn is_match(&self, text: &[u8]) -> bool {
        // Iterative matcher with a single backtrack point for the last `*`.
        let (mut p, mut t) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;
        while t < text.len() {
            match self.items.get(p) {
                Some(Item::Any) => {
                    star = Some((p, t));
                    p += 1;
                }
                Some(item) if matches_one(item, text[t]) => {
                    p += 1;
                    t += 1;
                }
                _ => match star {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        star = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }
        self.items[p..].iter().all(|item| *item == Item::Any)
    }
}

fn matches_one(item: &Item, c: u8) -> bool {
    match item {
        Item::Literal(expected) => *expected == c,
        Item::Single => true,
        Item::Any => false,
        Item::Set { negated, ranges } => {
            let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
            hit != *negated
        }
    }
}

/// Parses a class body starting right after `[`; returns the item and the
/// index after the closing `]`.
fn parse_set(chars: &[u8], start: usize) -> Option<(Item, usize)> {
    let mut i = start;
    let negated = matches!(chars.get(i), Some(b'^') | Some(b'!'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == b']' && !first {
            return Some((Item::Set { negated, ranges }, i + 1));
        }
        first = false;
        let lo = if c == b'\\' {
            i += 1;
            *chars.get(i)?
        } else {
            c
        };
        if chars.get(i + 1) == Some(&b'-') && chars.get(i + 2).is_some_and(|c| *c != b']') {
            let hi = chars[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            ranges.push((lo, hi));
            i += 3;
        } else {
            ranges.push((lo, lo));
            i += 1;
        }
    }
}
