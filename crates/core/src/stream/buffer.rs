use serde_json::Value;

/// A buffer that accumulates text deltas which together form a JSON
/// document, possibly truncated at any point.
///
/// The buffer itself never fails: an incomplete document simply has no
/// candidate value yet. Ownership stays with the caller, the assembler
/// only reads from it and reports when a reset is due.
#[derive(Clone, Debug, Default)]
pub struct PartialJsonBuffer {
    raw: String,
}

impl PartialJsonBuffer {
    /// Creates an empty buffer.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text fragment.
    #[inline]
    pub fn push(&mut self, fragment: &str) {
        self.raw.push_str(fragment);
    }

    /// Returns the accumulated raw text.
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns whether nothing has been buffered since the last reset.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Clears the buffer.
    #[inline]
    pub fn reset(&mut self) {
        self.raw.clear();
    }

    /// Returns the current best-effort candidate value.
    ///
    /// A truncated document is completed by closing open strings and
    /// containers and dropping dangling keys, separators and partial
    /// literals. Returns `None` when no candidate exists yet; an
    /// incomplete document is never an error.
    pub fn value(&self) -> Option<Value> {
        let raw = self.raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(value) = serde_json::from_str(raw) {
            return Some(value);
        }
        let completed = complete_partial_json(raw)?;
        serde_json::from_str(&completed).ok()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Expect {
    Value,
    Key,
    CommaOrEnd,
}

fn closers(stack: &[char]) -> String {
    stack.iter().rev().collect()
}

/// Completes a truncated JSON document, rolling back to the last point
/// where a valid document can be produced. Returns `None` when no such
/// point exists (including genuinely malformed input).
fn complete_partial_json(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut expect = Expect::Value;
    // Output length and pending closers of the last completable point.
    let mut good: Option<(usize, String)> = None;
    let mut in_string = false;
    let mut string_is_key = false;
    let mut escaped = false;
    let mut literal = String::new();

    for ch in raw.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => {
                    in_string = false;
                    expect = Expect::CommaOrEnd;
                    if !string_is_key {
                        good = Some((out.len(), closers(&stack)));
                    }
                }
                _ => {}
            }
            continue;
        }

        if !literal.is_empty()
            && (matches!(ch, ',' | '}' | ']') || ch.is_whitespace())
        {
            if serde_json::from_str::<Value>(&literal).is_err() {
                return None;
            }
            literal.clear();
            expect = Expect::CommaOrEnd;
            good = Some((out.len(), closers(&stack)));
        }

        match ch {
            c if c.is_whitespace() => out.push(c),
            '"' => {
                in_string = true;
                escaped = false;
                string_is_key = expect == Expect::Key;
                out.push(ch);
            }
            '{' => {
                out.push(ch);
                stack.push('}');
                expect = Expect::Key;
                good = Some((out.len(), closers(&stack)));
            }
            '[' => {
                out.push(ch);
                stack.push(']');
                expect = Expect::Value;
                good = Some((out.len(), closers(&stack)));
            }
            '}' | ']' => {
                let expected = stack.pop()?;
                if expected != ch {
                    return None;
                }
                out.push(ch);
                expect = Expect::CommaOrEnd;
                good = Some((out.len(), closers(&stack)));
            }
            ':' => {
                out.push(ch);
                expect = Expect::Value;
            }
            ',' => {
                out.push(ch);
                expect = if stack.last() == Some(&'}') {
                    Expect::Key
                } else {
                    Expect::Value
                };
            }
            c => {
                literal.push(c);
                out.push(c);
            }
        }
    }

    if in_string {
        if !string_is_key {
            if escaped {
                out.pop();
            }
            trim_partial_unicode_escape(&mut out);
            out.push('"');
            good = Some((out.len(), closers(&stack)));
        }
        // A truncated key rolls back to the previous completable point.
    } else if !literal.is_empty()
        && serde_json::from_str::<Value>(&literal).is_ok()
    {
        good = Some((out.len(), closers(&stack)));
    }

    let (len, closers) = good?;
    let mut candidate = out[..len].to_owned();
    candidate.push_str(&closers);
    Some(candidate)
}

/// Removes a trailing `\uXXXX` escape that has fewer than four hex
/// digits, so the string can be closed safely.
fn trim_partial_unicode_escape(out: &mut String) {
    let Some(pos) = out.rfind("\\u") else {
        return;
    };
    let tail = &out[pos + 2..];
    if tail.len() < 4 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
        // Only trim when the backslash is a real escape, not escaped
        // itself.
        let backslashes =
            out[..pos].chars().rev().take_while(|c| *c == '\\').count();
        if backslashes % 2 == 0 {
            out.truncate(pos);
        }
    }
}
