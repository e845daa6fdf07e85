// Slice-based STOMP frame parser (produces owned Vecs from input slices)

/// Raw parse output: (command, headers, body, consumed bytes).
type ParseResult = Result<Option<(Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>, Vec<u8>, usize)>, String>;

/// Decode-time limits. A frame exceeding any of them is rejected as soon as
/// the violation is visible in the buffer, without waiting for the rest of
/// the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Maximum number of header lines in one frame.
    pub max_headers: usize,
    /// Maximum length of a header name or value (and of the command line).
    pub max_header_length: usize,
    /// Maximum body length in bytes.
    pub max_body_length: usize,
}

impl FrameLimits {
    pub const DEFAULT_MAX_HEADERS: usize = 1000;
    pub const DEFAULT_MAX_HEADER_LENGTH: usize = 10 * 1024;
    pub const DEFAULT_MAX_BODY_LENGTH: usize = 100 * 1024 * 1024;
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_headers: Self::DEFAULT_MAX_HEADERS,
            max_header_length: Self::DEFAULT_MAX_HEADER_LENGTH,
            max_body_length: Self::DEFAULT_MAX_BODY_LENGTH,
        }
    }
}

/// Extract the optional content-length header value from a header list.
///
/// Returns:
/// - Ok(Some(n)) when a valid Content-Length header is present and parsed.
/// - Ok(None) when no Content-Length header is present.
/// - Err(String) when Content-Length is present but not a valid unsigned integer.
fn get_content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    for (k, v) in headers {
        if k.eq_ignore_ascii_case(&b"content-length"[..]) {
            let s =
                std::str::from_utf8(v).map_err(|e| format!("content-length not utf8: {}", e))?;
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err("empty content-length".to_string());
            }
            return match trimmed.parse::<usize>() {
                Ok(n) => Ok(Some(n)),
                Err(e) => Err(format!("invalid content-length '{}': {}", trimmed, e)),
            };
        }
    }
    Ok(None)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns Ok(Some((command, headers, body, consumed_bytes))) when a full frame
/// was parsed and how many bytes were consumed. Returns Ok(None) when more
/// bytes are required. Returns Err on protocol errors, including limit
/// violations.
pub fn parse_frame_slice(input: &[u8], limits: &FrameLimits) -> ParseResult {
    let mut pos = 0usize;
    let len = input.len();

    // skip any leading EOLs; the codec reports them as heartbeats before
    // calling into the parser
    while pos < len && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }
    if pos >= len {
        return Ok(None);
    }

    // command line
    let command = match input[pos..].iter().position(|&b| b == b'\n') {
        Some(cmd_end_rel) => {
            let command = strip_cr(&input[pos..pos + cmd_end_rel]).to_vec();
            pos += cmd_end_rel + 1;
            command
        }
        None => {
            if len - pos > limits.max_header_length {
                return Err("command line too long".to_string());
            }
            return Ok(None);
        }
    };
    if command.len() > limits.max_header_length {
        return Err("command line too long".to_string());
    }

    // headers until an empty line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let max_line = limits.max_header_length * 2 + 2;
    loop {
        if pos >= len {
            return Ok(None);
        }
        if input[pos] == b'\n' {
            pos += 1;
            break;
        }
        if input[pos] == b'\r' {
            if pos + 1 >= len {
                return Ok(None);
            }
            if input[pos + 1] == b'\n' {
                pos += 2;
                break;
            }
        }
        let line_end_rel = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => {
                if len - pos > max_line {
                    return Err("header line too long".to_string());
                }
                return Ok(None);
            }
        };
        let line = strip_cr(&input[pos..pos + line_end_rel]);
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            )
        })?;
        let key = &line[..colon];
        let val = &line[colon + 1..];
        if headers.len() + 1 > limits.max_headers {
            return Err(format!(
                "number of headers exceeds the limit of {}",
                limits.max_headers
            ));
        }
        if key.len() > limits.max_header_length || val.len() > limits.max_header_length {
            return Err(format!(
                "header length exceeds the limit of {}",
                limits.max_header_length
            ));
        }
        headers.push((key.to_vec(), val.to_vec()));
        pos += line_end_rel + 1;
    }

    // determine body strategy
    let (body, after_body) = match get_content_length(&headers)? {
        Some(content_len) => {
            if content_len > limits.max_body_length {
                return Err(format!(
                    "body length {} exceeds the limit of {}",
                    content_len, limits.max_body_length
                ));
            }
            // need content_len bytes, plus terminating NUL
            if pos + content_len + 1 > len {
                return Ok(None);
            }
            if input[pos + content_len] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            (input[pos..pos + content_len].to_vec(), pos + content_len + 1)
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                if nul_rel > limits.max_body_length {
                    return Err(format!(
                        "body length {} exceeds the limit of {}",
                        nul_rel, limits.max_body_length
                    ));
                }
                (input[pos..pos + nul_rel].to_vec(), pos + nul_rel + 1)
            }
            None => {
                if len - pos > limits.max_body_length {
                    return Err(format!(
                        "body exceeds the limit of {} bytes",
                        limits.max_body_length
                    ));
                }
                return Ok(None);
            }
        },
    };

    Ok(Some((command, headers, body, after_body)))
}

/// Unescape a STOMP 1.2 header name or value.
///
/// Recognised escapes are `\\`, `\n`, `\r` and `\c`; any other escape
/// sequence (or a dangling backslash) is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b'c') => out.push(b':'),
            Some(&other) => {
                return Err(format!("undefined escape sequence '\\{}'", other as char));
            }
            None => return Err("dangling escape character".to_string()),
        }
    }
    Ok(out)
}

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
pub fn escape_header_value(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}
